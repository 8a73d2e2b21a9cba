// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download manager running the session coordinator on a background task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::artifact::ArtifactSink;
use super::coordinator::{CommandError, Coordinator, CoordinatorOptions};
use super::driver::{EventReceiver, TransferDriver};
use super::state::CompletedStore;
use super::types::{Job, JobState, Notice, PauseOutcome, ResumeOutcome, Snapshot};
use crate::catalog::{CatalogItem, ItemId, Variant};

/// How often stalled jobs are looked for, when a stale timeout is set.
const STALE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Buffered notices per subscriber before old ones are dropped.
const NOTICE_CAPACITY: usize = 64;

/// Commands that can be sent to the download worker.
///
/// Every command is answered after the resulting snapshot was published.
#[derive(Debug)]
pub enum DownloadCommand {
    /// Start acquiring an item
    Start {
        item: CatalogItem,
        variant: Variant,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    /// Pause an active download
    Pause {
        item_id: ItemId,
        reply: oneshot::Sender<Result<PauseOutcome, CommandError>>,
    },
    /// Resume a paused or failed download
    Resume {
        item_id: ItemId,
        reply: oneshot::Sender<Result<ResumeOutcome, CommandError>>,
    },
    /// Cancel an active download
    Cancel { item_id: ItemId, reply: oneshot::Sender<bool> },
    /// Remove an item from the completed record
    DeleteCompleted { item_id: ItemId, reply: oneshot::Sender<bool> },
    /// Shutdown the worker
    Shutdown { reply: oneshot::Sender<()> },
}

/// How a download left the active set.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Handle to one item's download, allowing status checks.
#[derive(Debug, Clone)]
pub struct DownloadHandle {
    /// Item being downloaded
    pub item_id: ItemId,
    snapshot_rx: watch::Receiver<Snapshot>,
}

impl DownloadHandle {
    /// Current job, `None` once it left the active set.
    pub fn job(&self) -> Option<Job> {
        self.snapshot_rx.borrow().job(self.item_id).cloned()
    }

    fn outcome(&self) -> Option<DownloadOutcome> {
        let snapshot = self.snapshot_rx.borrow();
        match snapshot.job(self.item_id) {
            Some(job) if job.state == JobState::Error => {
                Some(DownloadOutcome::Failed(job.error.clone().unwrap_or_default()))
            }
            Some(_) => None,
            None if snapshot.is_completed(self.item_id) => Some(DownloadOutcome::Completed),
            None => Some(DownloadOutcome::Cancelled),
        }
    }

    /// Check whether the download completed, failed, or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }

    /// Wait until the download completes, fails, or is cancelled.
    ///
    /// Calls `on_update` with the job on every change while it is active.
    pub async fn wait_with(&mut self, mut on_update: impl FnMut(&Job)) -> DownloadOutcome {
        loop {
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            if let Some(job) = self.snapshot_rx.borrow_and_update().job(self.item_id) {
                on_update(job);
            }
            if self.snapshot_rx.changed().await.is_err() {
                // Manager gone
                return self.outcome().unwrap_or(DownloadOutcome::Cancelled);
            }
        }
    }

    /// Wait for the download to finish.
    pub async fn wait(&mut self) -> DownloadOutcome {
        self.wait_with(|_| {}).await
    }
}

/// Manager for the download session.
///
/// Cheap to clone; all clones talk to the same worker.
#[derive(Clone)]
pub struct DownloadManager {
    /// Channel to send commands to the worker
    command_tx: mpsc::Sender<DownloadCommand>,
    /// Latest published session state
    snapshot_rx: watch::Receiver<Snapshot>,
    notice_tx: broadcast::Sender<Notice>,
}

impl DownloadManager {
    /// Create a manager and start its worker. Must run inside a tokio runtime.
    ///
    /// Loads the completed record from `store`.
    pub fn spawn(
        driver: Arc<dyn TransferDriver>,
        store: CompletedStore,
        sink: Box<dyn ArtifactSink>,
        options: CoordinatorOptions,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(driver, store, sink, event_tx, options);
        Self::with_coordinator(coordinator, event_rx)
    }

    /// Run an existing coordinator. `events` must receive what its drivers send.
    pub fn with_coordinator(coordinator: Coordinator, events: EventReceiver) -> Self {
        let (command_tx, command_rx) = mpsc::channel(100);
        let (snapshot_tx, snapshot_rx) = watch::channel(coordinator.snapshot());
        let (notice_tx, _) = broadcast::channel(NOTICE_CAPACITY);

        let worker_notices = notice_tx.clone();
        tokio::spawn(async move {
            Self::worker_loop(coordinator, command_rx, events, snapshot_tx, worker_notices).await;
        });

        Self {
            command_tx,
            snapshot_rx,
            notice_tx,
        }
    }

    /// Start downloading `item` through `variant`.
    ///
    /// Returns a handle that can be used to track the job.
    pub async fn start(&self, item: CatalogItem, variant: Variant) -> Result<DownloadHandle, CommandError> {
        let item_id = item.id;
        self.request(|reply| DownloadCommand::Start { item, variant, reply })
            .await??;
        Ok(self.handle(item_id))
    }

    pub async fn pause(&self, item_id: ItemId) -> Result<PauseOutcome, CommandError> {
        self.request(|reply| DownloadCommand::Pause { item_id, reply }).await?
    }

    pub async fn resume(&self, item_id: ItemId) -> Result<ResumeOutcome, CommandError> {
        self.request(|reply| DownloadCommand::Resume { item_id, reply }).await?
    }

    /// Cancel a download. Returns false if nothing was active.
    pub async fn cancel(&self, item_id: ItemId) -> Result<bool, CommandError> {
        self.request(|reply| DownloadCommand::Cancel { item_id, reply }).await
    }

    /// Forget a completed download. Returns false if it was not recorded.
    pub async fn delete_completed(&self, item_id: ItemId) -> Result<bool, CommandError> {
        self.request(|reply| DownloadCommand::DeleteCompleted { item_id, reply }).await
    }

    /// Stop the worker, aborting every transfer.
    pub async fn shutdown(&self) -> Result<(), CommandError> {
        self.request(|reply| DownloadCommand::Shutdown { reply }).await
    }

    /// Track an item already in the session.
    pub fn handle(&self, item_id: ItemId) -> DownloadHandle {
        DownloadHandle {
            item_id,
            snapshot_rx: self.snapshot_rx.clone(),
        }
    }

    pub fn get_job(&self, item_id: ItemId) -> Option<Job> {
        self.snapshot_rx.borrow().job(item_id).cloned()
    }

    pub fn is_downloading(&self, item_id: ItemId) -> bool {
        self.snapshot_rx.borrow().is_downloading(item_id)
    }

    pub fn is_completed(&self, item_id: ItemId) -> bool {
        self.snapshot_rx.borrow().is_completed(item_id)
    }

    pub fn active_jobs(&self) -> Vec<Job> {
        self.snapshot_rx.borrow().active.clone()
    }

    /// Completed items, newest first.
    pub fn completed(&self) -> Vec<CatalogItem> {
        self.snapshot_rx.borrow().completed.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receive every state change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// Receive notices raised from now on.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notice_tx.subscribe()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> DownloadCommand) -> Result<T, CommandError> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(command(reply))
            .await
            .map_err(|_| CommandError::ManagerClosed)?;
        response.await.map_err(|_| CommandError::ManagerClosed)
    }

    /// Background worker loop.
    async fn worker_loop(
        mut coordinator: Coordinator,
        mut command_rx: mpsc::Receiver<DownloadCommand>,
        mut event_rx: EventReceiver,
        snapshot_tx: watch::Sender<Snapshot>,
        notice_tx: broadcast::Sender<Notice>,
    ) {
        tracing::debug!("Download worker started");

        let stale_checks = coordinator.options().stale_timeout.is_some();
        let mut stale_check = tokio::time::interval(STALE_CHECK_INTERVAL);
        stale_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        // Every manager handle was dropped
                        coordinator.shutdown();
                        break;
                    };
                    if !Self::handle_command(&mut coordinator, command, &snapshot_tx, &notice_tx) {
                        break;
                    }
                }
                Some(event) = event_rx.recv() => {
                    if coordinator.handle_event(event) {
                        Self::publish(&mut coordinator, &snapshot_tx, &notice_tx);
                    }
                }
                _ = stale_check.tick(), if stale_checks => {
                    let expired = coordinator.expire_stalled(Utc::now());
                    if !expired.is_empty() {
                        tracing::warn!("Expired {} stalled downloads", expired.len());
                        Self::publish(&mut coordinator, &snapshot_tx, &notice_tx);
                    }
                }
            }
        }

        tracing::debug!("Download worker stopped");
    }

    /// Apply one command. Returns false when the worker should stop.
    fn handle_command(
        coordinator: &mut Coordinator,
        command: DownloadCommand,
        snapshot_tx: &watch::Sender<Snapshot>,
        notice_tx: &broadcast::Sender<Notice>,
    ) -> bool {
        match command {
            DownloadCommand::Start { item, variant, reply } => {
                let result = coordinator.start(item, variant);
                Self::publish(coordinator, snapshot_tx, notice_tx);
                let _ = reply.send(result);
            }
            DownloadCommand::Pause { item_id, reply } => {
                let result = coordinator.pause(item_id);
                Self::publish(coordinator, snapshot_tx, notice_tx);
                let _ = reply.send(result);
            }
            DownloadCommand::Resume { item_id, reply } => {
                let result = coordinator.resume(item_id);
                Self::publish(coordinator, snapshot_tx, notice_tx);
                let _ = reply.send(result);
            }
            DownloadCommand::Cancel { item_id, reply } => {
                let result = coordinator.cancel(item_id);
                Self::publish(coordinator, snapshot_tx, notice_tx);
                let _ = reply.send(result);
            }
            DownloadCommand::DeleteCompleted { item_id, reply } => {
                let result = coordinator.delete_completed(item_id);
                Self::publish(coordinator, snapshot_tx, notice_tx);
                let _ = reply.send(result);
            }
            DownloadCommand::Shutdown { reply } => {
                coordinator.shutdown();
                Self::publish(coordinator, snapshot_tx, notice_tx);
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    /// Push the current snapshot and pending notices to subscribers.
    fn publish(
        coordinator: &mut Coordinator,
        snapshot_tx: &watch::Sender<Snapshot>,
        notice_tx: &broadcast::Sender<Notice>,
    ) {
        let snapshot = coordinator.snapshot();
        snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });

        for notice in coordinator.take_notices() {
            // No subscribers is fine
            let _ = notice_tx.send(notice);
        }
    }
}
