// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transfer drivers.
//!
//! A driver performs the actual acquisition of a [`Variant`] and reports
//! back through an event queue. The coordinator never awaits a driver: it
//! calls `begin`/`suspend`/`resume`/`abort`, which return immediately, and
//! later folds the [`TransferEvent`]s the driver pushed into job state.
//!
//! `suspend` and `resume` are optional. A driver advertises them through
//! [`DriverCapabilities`]; the coordinator falls back to abort-and-restart
//! when they are missing.

pub mod fetch;
pub mod simulated;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::catalog::{ItemId, Variant};
use crate::locks::{resilient_read, resilient_write};
use super::types::TransferId;

pub use fetch::FetchDriver;
pub use simulated::{SimulatedDriver, SimulationSettings};

/// Telemetry reported while receiving data.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// Completed fraction in 0.0..=1.0
    pub ratio: f64,
    /// Bytes per second
    pub rate: u64,
    pub peers: u32,
    pub downloaded_bytes: u64,
    /// `None` when the remaining time cannot be estimated
    pub eta_seconds: Option<u64>,
}

/// Post-download phases a driver may report before completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishPhase {
    Zipping,
    Seeding,
}

/// Content produced by a finished transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Content held in memory
    Bytes(Vec<u8>),
    /// Content already written to a staging file
    File(PathBuf),
}

/// What happened to a transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEventKind {
    /// The transfer found its source
    Connected { peers: u32 },
    Progress(TransferProgress),
    Finishing(FinishPhase),
    Completed(Payload),
    Failed { reason: String },
}

/// Event pushed by a driver into the coordinator's queue.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub item_id: ItemId,
    pub transfer: TransferId,
    pub kind: TransferEventKind,
}

/// Sending half of the coordinator's event queue.
pub type EventSender = mpsc::UnboundedSender<TransferEvent>;

/// Receiving half of the coordinator's event queue.
pub type EventReceiver = mpsc::UnboundedReceiver<TransferEvent>;

/// Everything a driver needs to begin a transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub transfer: TransferId,
    pub item_id: ItemId,
    pub title: String,
    pub variant: Variant,
    /// Fraction already acquired by an earlier transfer; 0.0 for a fresh start
    pub start_ratio: f64,
}

/// Optional features of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverCapabilities {
    /// `suspend`/`resume` keep the transfer alive
    pub suspend: bool,
    /// `begin` honours a non-zero `start_ratio`
    pub partial_restart: bool,
}

/// Errors reported by drivers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    #[error("{driver} driver does not support {operation}")]
    Unsupported {
        driver: &'static str,
        operation: &'static str,
    },
    #[error("unknown transfer {0}")]
    UnknownTransfer(TransferId),
    #[error("could not begin transfer: {0}")]
    Begin(String),
}

/// Capability interface every transfer backend implements.
pub trait TransferDriver: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> DriverCapabilities;

    /// Whether the backend can accept transfers right now.
    fn is_ready(&self) -> bool {
        true
    }

    /// Start a transfer. Events for it go to `events`.
    fn begin(&self, request: TransferRequest, events: EventSender) -> Result<(), DriverError>;

    /// Stop receiving data without losing the transfer.
    fn suspend(&self, _transfer: TransferId) -> Result<(), DriverError> {
        Err(DriverError::Unsupported { driver: self.name(), operation: "suspend" })
    }

    /// Continue a suspended transfer.
    fn resume(&self, _transfer: TransferId) -> Result<(), DriverError> {
        Err(DriverError::Unsupported { driver: self.name(), operation: "resume" })
    }

    /// Destroy a transfer. Unknown ids are ignored.
    fn abort(&self, transfer: TransferId);
}

/// Backend selection, as stored in the config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Timer-driven simulation with optional fault injection
    #[default]
    Simulated,
    /// One-shot HTTP fetch of the variant URL
    Fetch,
}

impl std::str::FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simulated" | "sim" => Ok(DriverKind::Simulated),
            "fetch" | "http" => Ok(DriverKind::Fetch),
            other => Err(format!("unknown driver: {}", other)),
        }
    }
}

/// Convenience wrapper that tags events with their job and transfer.
#[derive(Debug, Clone)]
pub struct Emitter {
    events: EventSender,
    item_id: ItemId,
    transfer: TransferId,
}

impl Emitter {
    pub fn new(events: EventSender, item_id: ItemId, transfer: TransferId) -> Self {
        Self { events, item_id, transfer }
    }

    /// Push an event. Returns false once the coordinator is gone.
    pub fn emit(&self, kind: TransferEventKind) -> bool {
        self.events
            .send(TransferEvent { item_id: self.item_id, transfer: self.transfer, kind })
            .is_ok()
    }

    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.emit(TransferEventKind::Failed { reason: reason.into() })
    }
}

/// Running transfer as tracked by a driver.
struct TransferControl {
    task: JoinHandle<()>,
    suspended: Arc<AtomicBool>,
}

/// Table of running transfer tasks shared by the built-in drivers.
#[derive(Default)]
pub(crate) struct TransferTable {
    entries: RwLock<HashMap<TransferId, TransferControl>>,
}

impl TransferTable {
    /// Register a spawned task together with its suspension flag.
    pub(crate) fn insert(&self, transfer: TransferId, task: JoinHandle<()>, suspended: Arc<AtomicBool>) {
        let mut entries = resilient_write(&self.entries);
        entries.retain(|_, control| !control.task.is_finished());
        entries.insert(transfer, TransferControl { task, suspended });
    }

    pub(crate) fn set_suspended(&self, transfer: TransferId, value: bool) -> Result<(), DriverError> {
        let entries = resilient_read(&self.entries);
        let control = entries
            .get(&transfer)
            .filter(|control| !control.task.is_finished())
            .ok_or(DriverError::UnknownTransfer(transfer))?;
        control.suspended.store(value, Ordering::SeqCst);
        Ok(())
    }

    /// Abort and forget a transfer. Returns false if it was unknown.
    pub(crate) fn abort(&self, transfer: TransferId) -> bool {
        match resilient_write(&self.entries).remove(&transfer) {
            Some(control) => {
                control.task.abort();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        resilient_read(&self.entries).len()
    }
}

impl Drop for TransferTable {
    fn drop(&mut self) {
        let entries = match self.entries.get_mut() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, control) in entries.drain() {
            control.task.abort();
        }
    }
}

/// Build the configured backend.
pub fn build_driver(kind: DriverKind, settings: SimulationSettings, staging_dir: PathBuf) -> Arc<dyn TransferDriver> {
    match kind {
        DriverKind::Simulated => Arc::new(SimulatedDriver::new(settings)),
        DriverKind::Fetch => Arc::new(FetchDriver::new(staging_dir)),
    }
}
