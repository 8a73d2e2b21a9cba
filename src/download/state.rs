// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent state for the completed-download record.
//!
//! State lives in a small key-value store. The coordinator uses a single
//! entry, [`COMPLETED_KEY`], holding the JSON array of completed items
//! (newest first). The entry is read once at startup and overwritten
//! wholesale on every change.
//!
//! Several processes may share one [`FileStore`]. Writes are serialized
//! with an exclusive lock file and land through temp file + rename, so a
//! reader never sees a torn file, but concurrent sessions are
//! last-writer-wins.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use crate::catalog::CatalogItem;
use crate::locks::{resilient_read, resilient_write};

/// Name of the entry holding the completed record.
pub const COMPLETED_KEY: &str = "completedDownloads";

/// Default timeout for acquiring file locks (5 seconds)
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval when waiting for lock acquisition
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Minimal key-value storage.
pub trait RecordStore: Send {
    /// Read an entry; `Ok(None)` when it was never written.
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace an entry.
    fn write(&self, key: &str, value: &str) -> Result<()>;
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout: LOCK_TIMEOUT,
        }
    }

    /// Use a custom timeout for lock acquisition.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Default state directory, `~/.cinefetch/state`.
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".cinefetch").join("state"))
            .unwrap_or_else(|| PathBuf::from(".cinefetch/state"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Separate lock file, so the lock can be held across the rename.
    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", key))
    }

    fn open_lock_file(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for lock file: {:?}", parent))?;
        }

        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file: {:?}", path))
    }

    /// Acquire an exclusive lock with timeout.
    ///
    /// Returns the locked file handle; the lock is released when it drops.
    fn acquire_exclusive_lock_with_timeout(path: &Path, timeout: Duration) -> Result<File> {
        let lock_file = Self::open_lock_file(path)?;
        let start = Instant::now();

        loop {
            match fs2::FileExt::try_lock_exclusive(&lock_file) {
                Ok(()) => return Ok(lock_file),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        bail!(
                            "Timed out waiting for exclusive lock on {:?} after {:?}. \
                             Another session may be writing the state file.",
                            path,
                            timeout
                        );
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to acquire exclusive lock on {:?}", path));
                }
            }
        }
    }

    /// Acquire a shared lock with timeout.
    fn acquire_shared_lock_with_timeout(path: &Path, timeout: Duration) -> Result<File> {
        let lock_file = Self::open_lock_file(path)?;
        let start = Instant::now();

        loop {
            match fs2::FileExt::try_lock_shared(&lock_file) {
                Ok(()) => return Ok(lock_file),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        bail!(
                            "Timed out waiting for shared lock after {:?}. \
                             Another session may be writing the state file.",
                            timeout
                        );
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(e).with_context(|| "Failed to acquire shared lock on state file");
                }
            }
        }
    }
}

impl RecordStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let _lock_guard = Self::acquire_shared_lock_with_timeout(&self.lock_path(key), self.lock_timeout)?;
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file: {:?}", path))?;
        Ok(Some(content))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let path = self.entry_path(key);
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create directory: {:?}", self.dir))?;

        let _lock_guard = Self::acquire_exclusive_lock_with_timeout(&self.lock_path(key), self.lock_timeout)?;
        let temp_path = path.with_extension("tmp");

        {
            let mut temp_file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;

            temp_file.write_all(value.as_bytes())
                .with_context(|| "Failed to write to temp file")?;
            temp_file.sync_all()
                .with_context(|| "Failed to sync temp file to disk")?;
        }

        fs::rename(&temp_path, &path)
            .with_context(|| format!("Failed to rename temp file to state file: {:?} -> {:?}", temp_path, path))?;
        Ok(())
    }
}

/// Process-local store. Clones share the same entries, which lets tests
/// simulate a restart by handing a clone to a new coordinator.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(resilient_read(&self.entries).get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        resilient_write(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Typed access to the completed record. Never fails: storage problems are
/// logged and otherwise ignored.
pub struct CompletedStore {
    store: Box<dyn RecordStore>,
}

impl CompletedStore {
    pub fn new(store: impl RecordStore + 'static) -> Self {
        Self { store: Box::new(store) }
    }

    /// Load the record; empty when missing or unreadable.
    pub fn load(&self) -> Vec<CatalogItem> {
        let content = match self.store.read(COMPLETED_KEY) {
            Ok(Some(content)) => content,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to load completed downloads: {:#}", e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<CatalogItem>>(&content) {
            Ok(items) => dedup_by_id(items),
            Err(e) => {
                tracing::warn!("Failed to parse completed downloads, starting empty: {}", e);
                Vec::new()
            }
        }
    }

    /// Overwrite the record. Returns false if the write failed.
    pub fn save(&self, items: &[CatalogItem]) -> bool {
        let content = match serde_json::to_string(items) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Failed to serialize completed downloads: {}", e);
                return false;
            }
        };

        match self.store.write(COMPLETED_KEY, &content) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to persist completed downloads: {:#}", e);
                false
            }
        }
    }
}

/// Keep the first occurrence of each id.
fn dedup_by_id(items: Vec<CatalogItem>) -> Vec<CatalogItem> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.id)).collect()
}
