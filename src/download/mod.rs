// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download session for cinefetch
//!
//! This module tracks every movie the user is acquiring:
//! - One job per catalog item, driven through connecting, downloading,
//!   finishing and completion by a pluggable transfer driver
//! - Pause, resume and cancel at any time
//! - A completed record that survives restarts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐ commands ┌─────────────────┐  begin/abort  ┌─────────────────┐
//! │ DownloadManager │─────────▶│ Coordinator     │──────────────▶│ TransferDriver  │
//! │ (handles)       │◀─────────│ (worker task)   │◀──────────────│ (sim / fetch)   │
//! └─────────────────┘ snapshot └────────┬────────┘    events     └─────────────────┘
//!                                       │
//!                          ┌────────────┴────────────┐
//!                          ▼                         ▼
//!                 ┌─────────────────┐       ┌─────────────────┐
//!                 │ CompletedStore  │       │ ArtifactSink    │
//!                 │ (persistent)    │       │ (<Title>.mp4)   │
//!                 └─────────────────┘       └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cinefetch::catalog::CatalogItem;
//! use cinefetch::download::{
//!     CompletedStore, CoordinatorOptions, DownloadManager, FileSaver, FileStore, SimulatedDriver,
//! };
//!
//! # async fn example(item: CatalogItem) -> anyhow::Result<()> {
//! let manager = DownloadManager::spawn(
//!     Arc::new(SimulatedDriver::new(Default::default())),
//!     CompletedStore::new(FileStore::new(FileStore::default_dir())),
//!     Box::new(FileSaver::new(FileSaver::default_dir())),
//!     CoordinatorOptions::default(),
//! );
//!
//! let variant = item.best_variant().cloned().unwrap_or_default();
//! let mut handle = manager.start(item, variant).await?;
//! let outcome = handle.wait().await;
//! println!("Finished: {:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod coordinator;
pub mod driver;
pub mod magnet;
pub mod manager;
pub mod state;
pub mod types;

// Re-export commonly used items
pub use artifact::{ArtifactSink, DiscardSink, FileSaver};
pub use coordinator::{CommandError, Coordinator, CoordinatorOptions};
pub use driver::{build_driver, DriverKind, FetchDriver, SimulatedDriver, SimulationSettings, TransferDriver};
pub use manager::{DownloadCommand, DownloadHandle, DownloadManager, DownloadOutcome};
pub use state::{CompletedStore, FileStore, MemoryStore, RecordStore};
pub use types::{
    Job, JobState, Notice, NoticeLevel, PauseOutcome, PausePolicy, ResumeOutcome, ResumePolicy, Snapshot,
    TransferId,
};
