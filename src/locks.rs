// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-tolerant `RwLock` access.
//!
//! Driver tasks and the download worker share a few small tables behind
//! `std::sync::RwLock`. A panic while one of them is held must not take the
//! whole session down, so the guards are recovered from a poisoned lock and
//! the event is logged.
//!
//! ```
//! use std::sync::RwLock;
//! use cinefetch::locks::{resilient_read, resilient_write};
//!
//! let transfers = RwLock::new(vec![1u64]);
//! resilient_write(&transfers).push(2);
//! assert_eq!(resilient_read(&transfers).len(), 2);
//! ```

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read guard, recovering it if the lock is poisoned.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "cinefetch::locks",
            "RwLock poisoned during read; recovering possibly inconsistent data"
        );
        poisoned.into_inner()
    })
}

/// Acquire a write guard, recovering it if the lock is poisoned.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "cinefetch::locks",
            "RwLock poisoned during write; recovering possibly inconsistent data"
        );
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    fn poisoned_table() -> Arc<RwLock<HashMap<u64, &'static str>>> {
        let table = Arc::new(RwLock::new(HashMap::from([(1, "connecting")])));
        let writer = Arc::clone(&table);

        let handle = thread::spawn(move || {
            let mut guard = writer.write().unwrap();
            guard.insert(2, "downloading");
            panic!("driver task panicked mid-update");
        });
        let _ = handle.join();

        assert!(table.is_poisoned());
        table
    }

    #[test]
    fn test_read_recovers_from_poison() {
        let table = poisoned_table();
        let guard = resilient_read(&table);
        assert_eq!(guard.get(&1), Some(&"connecting"));
        assert_eq!(guard.get(&2), Some(&"downloading"));
    }

    #[test]
    fn test_write_recovers_from_poison() {
        let table = poisoned_table();
        resilient_write(&table).remove(&2);
        assert_eq!(resilient_read(&table).len(), 1);
    }
}
