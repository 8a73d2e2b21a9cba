// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download session coordinator.
//!
//! Owns the active jobs and the completed record and applies commands and
//! transfer events to them. The coordinator is synchronous and
//! single-owner: [`DownloadManager`](super::DownloadManager) runs it on one
//! task, which gives per-job event ordering for free.
//!
//! Stale events are recognised by their [`TransferId`]: an event whose job is
//! gone, or whose transfer is not the job's current one, is dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use thiserror::Error;

use super::artifact::ArtifactSink;
use super::driver::{
    EventSender, FinishPhase, Payload, TransferDriver, TransferEvent, TransferEventKind, TransferProgress,
    TransferRequest,
};
use super::state::CompletedStore;
use super::types::{
    Job, JobState, Notice, PauseOutcome, PausePolicy, ResumeOutcome, ResumePolicy, Snapshot, TransferId,
};
use crate::catalog::{CatalogItem, ItemId, Variant};

/// Errors returned by coordinator commands.
///
/// Every error is also reported as a [`Notice`]; none of them change state.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    /// The item is already downloading or already downloaded
    #[error("item {0} is already in the download list")]
    AlreadyListed(ItemId),
    /// The transfer backend cannot accept work yet
    #[error("transfer client is not ready")]
    NotReady,
    /// No active job for the item
    #[error("no active download for item {0}")]
    NotFound(ItemId),
    /// The job exists but the command does not apply to its state
    #[error("cannot {action} item {id} while it is {state}")]
    InvalidState {
        id: ItemId,
        state: JobState,
        action: &'static str,
    },
    /// The manager task is gone
    #[error("download manager has shut down")]
    ManagerClosed,
}

impl CommandError {
    /// True for rejected requests (duplicate start, client not ready).
    pub fn is_rejection(&self) -> bool {
        matches!(self, CommandError::AlreadyListed(_) | CommandError::NotReady)
    }

    /// True for commands on missing or ineligible jobs.
    pub fn is_state_violation(&self) -> bool {
        matches!(self, CommandError::NotFound(_) | CommandError::InvalidState { .. })
    }
}

/// Behavioural options of a coordinator.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorOptions {
    pub pause_policy: PausePolicy,
    pub resume_policy: ResumePolicy,
    /// Jobs that stay in `connecting`/`downloading` without any event for
    /// this long are failed. `None` disables the check.
    pub stale_timeout: Option<chrono::Duration>,
}

/// The download session coordinator.
pub struct Coordinator {
    driver: Arc<dyn TransferDriver>,
    store: CompletedStore,
    sink: Box<dyn ArtifactSink>,
    events: EventSender,
    options: CoordinatorOptions,
    active: IndexMap<ItemId, Job>,
    completed: Vec<CatalogItem>,
    /// Content of transfers that finished while their job was paused
    held: IndexMap<ItemId, Payload>,
    notices: Vec<Notice>,
    next_transfer: u64,
}

impl Coordinator {
    /// Create a coordinator, loading the completed record from `store`.
    ///
    /// Drivers push their events into `events`; whoever owns the receiving
    /// half feeds them back through [`handle_event`](Self::handle_event).
    pub fn new(
        driver: Arc<dyn TransferDriver>,
        store: CompletedStore,
        sink: Box<dyn ArtifactSink>,
        events: EventSender,
        options: CoordinatorOptions,
    ) -> Self {
        let completed = store.load();
        tracing::info!(
            "Download session ready ({} driver, {} completed downloads)",
            driver.name(),
            completed.len()
        );

        Self {
            driver,
            store,
            sink,
            events,
            options,
            active: IndexMap::new(),
            completed,
            held: IndexMap::new(),
            notices: Vec::new(),
            next_transfer: 1,
        }
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// True iff the item has an active job. Completed items do not count.
    pub fn is_downloading(&self, id: ItemId) -> bool {
        self.active.contains_key(&id)
    }

    /// True iff the item is in the completed record.
    pub fn is_completed(&self, id: ItemId) -> bool {
        self.completed.iter().any(|item| item.id == id)
    }

    pub fn get_job(&self, id: ItemId) -> Option<&Job> {
        self.active.get(&id)
    }

    pub fn active_jobs(&self) -> impl Iterator<Item = &Job> {
        self.active.values()
    }

    /// Completed items, newest first.
    pub fn completed(&self) -> &[CatalogItem] {
        &self.completed
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            active: self.active.values().cloned().collect(),
            completed: self.completed.clone(),
        }
    }

    /// Drain notices raised since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Begin acquiring `item` through `variant`.
    ///
    /// Rejected while the item is active (unless its job failed) or already
    /// completed. A failed job for the same item is replaced.
    pub fn start(&mut self, item: CatalogItem, variant: Variant) -> Result<(), CommandError> {
        let id = item.id;
        let blocked = self.is_completed(id)
            || self.active.get(&id).is_some_and(|job| job.state != JobState::Error);
        if blocked {
            tracing::debug!("Rejected start for item {}: already listed", id);
            self.notify(
                Notice::info("Already in Downloads")
                    .describe(format!("{} is already in your downloads list.", item.title))
                    .about(id),
            );
            return Err(CommandError::AlreadyListed(id));
        }

        if !self.driver.is_ready() {
            self.notify(
                Notice::destructive("Transfer client not ready")
                    .describe("Please wait a moment and try again.")
                    .about(id),
            );
            return Err(CommandError::NotReady);
        }

        if let Some(previous) = self.active.shift_remove(&id) {
            if let Some(transfer) = previous.transfer {
                self.driver.abort(transfer);
            }
            self.discard_held(id);
        }

        tracing::info!("Starting download of '{}' ({})", item.title, variant.label());
        self.active.insert(id, Job::new(item, variant));
        self.begin_transfer(id, 0.0);
        Ok(())
    }

    /// Pause an active transfer.
    ///
    /// With [`PausePolicy::Suspend`] and a driver that can suspend, the
    /// transfer is kept alive. Otherwise it is aborted and `resume` begins a
    /// new one; the outcome tells the caller which happened.
    pub fn pause(&mut self, id: ItemId) -> Result<PauseOutcome, CommandError> {
        let (state, transfer) = match self.active.get(&id) {
            Some(job) => (job.state, job.transfer),
            None => return Err(self.violation(CommandError::NotFound(id))),
        };
        if !state.is_pausable() {
            return Err(self.violation(CommandError::InvalidState { id, state, action: "pause" }));
        }

        let can_suspend = self.options.pause_policy == PausePolicy::Suspend && self.driver.capabilities().suspend;
        let outcome = match transfer {
            Some(transfer) if can_suspend => match self.driver.suspend(transfer) {
                Ok(()) => PauseOutcome::Suspended,
                Err(e) => {
                    tracing::warn!("Suspend failed for item {}, discarding transfer: {}", id, e);
                    self.driver.abort(transfer);
                    PauseOutcome::Discarded
                }
            },
            Some(transfer) => {
                self.driver.abort(transfer);
                PauseOutcome::Discarded
            }
            None => PauseOutcome::Discarded,
        };

        let Some(job) = self.active.get_mut(&id) else {
            return Err(CommandError::NotFound(id));
        };
        if outcome == PauseOutcome::Discarded {
            job.transfer = None;
        }
        job.paused_from = Some(state);
        job.set_state(JobState::Paused);
        let title = job.item.title.clone();

        tracing::info!("Paused '{}' ({:?})", title, outcome);
        let notice = match outcome {
            PauseOutcome::Suspended => Notice::info("Download Paused").describe(format!("{} is paused.", title)),
            PauseOutcome::Discarded => Notice::info("Download Paused")
                .describe(format!("{} was stopped and will restart its transfer when resumed.", title)),
        };
        self.notify(notice.about(id));
        Ok(outcome)
    }

    /// Resume a paused or failed job with its original variant.
    pub fn resume(&mut self, id: ItemId) -> Result<ResumeOutcome, CommandError> {
        let (state, transfer) = match self.active.get(&id) {
            Some(job) => (job.state, job.transfer),
            None => return Err(self.violation(CommandError::NotFound(id))),
        };
        if !state.is_resumable() {
            return Err(self.violation(CommandError::InvalidState { id, state, action: "resume" }));
        }

        // The transfer finished while the job was paused
        if let Some(payload) = self.held.shift_remove(&id) {
            if let Some(job) = self.active.get_mut(&id) {
                let resumed = job.paused_from.take().unwrap_or(JobState::Seeding);
                job.set_state(resumed);
            }
            tracing::info!("Resumed item {} with a finished transfer", id);
            self.complete(id, payload);
            return Ok(ResumeOutcome::Continued);
        }

        // A suspended transfer just continues
        if let (JobState::Paused, Some(transfer)) = (state, transfer) {
            match self.driver.resume(transfer) {
                Ok(()) => {
                    let Some(job) = self.active.get_mut(&id) else {
                        return Err(CommandError::NotFound(id));
                    };
                    let resumed = job.paused_from.take().unwrap_or(JobState::Downloading);
                    job.set_state(resumed);
                    let title = job.item.title.clone();
                    tracing::info!("Resumed '{}'", title);
                    self.notify(Notice::info("Download Resumed").describe(format!("{} is downloading again.", title)).about(id));
                    return Ok(ResumeOutcome::Continued);
                }
                Err(e) => {
                    tracing::warn!("Resume failed for item {}, beginning a new transfer: {}", id, e);
                }
            }
        }

        if let Some(transfer) = transfer {
            self.driver.abort(transfer);
        }

        let keep_progress = self.options.resume_policy == ResumePolicy::Continue
            && self.driver.capabilities().partial_restart;

        let Some(job) = self.active.get_mut(&id) else {
            return Err(CommandError::NotFound(id));
        };
        job.transfer = None;
        job.paused_from = None;
        let outcome = if keep_progress || job.progress == 0.0 {
            ResumeOutcome::Continued
        } else {
            job.progress = 0.0;
            job.downloaded = 0;
            ResumeOutcome::Restarted
        };
        let start_ratio = job.progress / 100.0;
        let title = job.item.title.clone();

        let notice = match outcome {
            ResumeOutcome::Continued => Notice::info("Download Resumed").describe(format!("{} is downloading again.", title)),
            ResumeOutcome::Restarted => Notice::info("Download Restarted")
                .describe(format!("{} will download again from the beginning.", title)),
        };
        tracing::info!("Resuming '{}' with a new transfer ({:?})", title, outcome);
        self.notify(notice.about(id));

        self.begin_transfer(id, start_ratio);
        Ok(outcome)
    }

    /// Abort and forget a job. Returns false when there was nothing to cancel.
    pub fn cancel(&mut self, id: ItemId) -> bool {
        let Some(job) = self.active.shift_remove(&id) else {
            return false;
        };
        if let Some(transfer) = job.transfer {
            self.driver.abort(transfer);
        }
        self.discard_held(id);

        tracing::info!("Cancelled '{}'", job.item.title);
        self.notify(Notice::destructive("Download Cancelled").describe(job.item.title).about(id));
        true
    }

    /// Remove an item from the completed record. Idempotent.
    pub fn delete_completed(&mut self, id: ItemId) -> bool {
        let before = self.completed.len();
        self.completed.retain(|item| item.id != id);
        if self.completed.len() == before {
            return false;
        }

        self.persist();
        self.notify(Notice::info("Download Removed").about(id));
        true
    }

    /// Fail jobs that have not heard from their transfer within the stale timeout.
    pub fn expire_stalled(&mut self, now: DateTime<Utc>) -> Vec<ItemId> {
        let Some(timeout) = self.options.stale_timeout else {
            return Vec::new();
        };

        let stalled: Vec<ItemId> = self.active
            .values()
            .filter(|job| job.state.is_running() && now - job.updated_at > timeout)
            .map(|job| job.id())
            .collect();

        for id in &stalled {
            let transfer = self.active.get_mut(id).and_then(|job| job.transfer.take());
            if let Some(transfer) = transfer {
                self.driver.abort(transfer);
            }
            self.fail_job(*id, "Transfer stalled".to_string());
        }
        stalled
    }

    /// Abort every transfer. Jobs stay in memory; only the completed record
    /// outlives the session.
    pub fn shutdown(&mut self) {
        for job in self.active.values_mut() {
            if let Some(transfer) = job.transfer.take() {
                self.driver.abort(transfer);
            }
        }
        let held: Vec<ItemId> = self.held.keys().copied().collect();
        for id in held {
            self.discard_held(id);
        }
        tracing::info!("Download session stopped ({} active jobs dropped)", self.active.len());
    }

    // ------------------------------------------------------------------
    // Transfer events
    // ------------------------------------------------------------------

    /// Fold one driver event into job state. Returns false if it was stale.
    pub fn handle_event(&mut self, event: TransferEvent) -> bool {
        let id = event.item_id;
        let Some(job) = self.active.get_mut(&id) else {
            tracing::debug!("Dropping event for inactive item {}", id);
            return false;
        };
        if job.transfer != Some(event.transfer) {
            tracing::debug!("Dropping stale event from transfer {} for item {}", event.transfer, id);
            return false;
        }

        match event.kind {
            TransferEventKind::Connected { peers } => {
                if job.state != JobState::Connecting {
                    return false;
                }
                job.peers = peers;
                job.set_state(JobState::Downloading);
                tracing::debug!("'{}' connected to {} peers", job.item.title, peers);
                true
            }
            TransferEventKind::Progress(progress) => Self::apply_progress(job, progress),
            TransferEventKind::Finishing(phase) => {
                if !matches!(job.state, JobState::Connecting | JobState::Downloading | JobState::Zipping) {
                    return false;
                }
                let state = match phase {
                    FinishPhase::Zipping => JobState::Zipping,
                    FinishPhase::Seeding => JobState::Seeding,
                };
                job.set_state(state);
                job.progress = 100.0;
                job.speed = 0;
                job.eta_seconds = Some(0);
                true
            }
            TransferEventKind::Completed(payload) => {
                if job.state == JobState::Paused {
                    tracing::debug!("Holding finished transfer for paused '{}'", job.item.title);
                    self.held.insert(id, payload);
                    return true;
                }
                self.complete(id, payload);
                true
            }
            TransferEventKind::Failed { reason } => {
                tracing::warn!("Transfer for '{}' failed: {}", job.item.title, reason);
                self.fail_job(id, reason);
                true
            }
        }
    }

    fn apply_progress(job: &mut Job, progress: TransferProgress) -> bool {
        if !job.state.is_running() {
            return false;
        }
        if job.state == JobState::Connecting {
            job.set_state(JobState::Downloading);
        }

        let percent = (progress.ratio * 100.0).clamp(0.0, 100.0);
        job.progress = job.progress.max(percent);
        job.downloaded = job.downloaded.max(progress.downloaded_bytes);
        job.speed = progress.rate;
        job.peers = progress.peers;
        job.eta_seconds = progress.eta_seconds;
        job.touch();
        true
    }

    fn complete(&mut self, id: ItemId, payload: Payload) {
        let item = match self.active.get_mut(&id) {
            Some(job) => {
                job.set_state(JobState::Completed);
                job.progress = 100.0;
                job.item.clone()
            }
            None => return,
        };

        match self.sink.save(&item, payload) {
            Ok(path) => {
                self.active.shift_remove(&id);
                self.completed.retain(|existing| existing.id != id);
                self.completed.insert(0, item.clone());
                self.persist();

                tracing::info!("Download of '{}' complete: {:?}", item.title, path);
                self.notify(
                    Notice::info("Download Complete!")
                        .describe(format!("{} saved to {}", item.title, path.display()))
                        .about(id),
                );
            }
            Err(e) => {
                tracing::warn!("Failed to save '{}': {:#}", item.title, e);
                if let Some(job) = self.active.get_mut(&id) {
                    job.transfer = None;
                    job.set_state(JobState::Error);
                    job.error = Some(format!("{:#}", e));
                }
                self.notify(
                    Notice::destructive("Error creating download link")
                        .describe(format!("{} finished but could not be saved.", item.title))
                        .about(id),
                );
            }
        }
    }

    fn fail_job(&mut self, id: ItemId, reason: String) {
        let Some(job) = self.active.get_mut(&id) else {
            return;
        };
        job.set_state(JobState::Error);
        job.error = Some(reason);
        let title = job.item.title.clone();
        self.notify(
            Notice::destructive("Download Error")
                .describe(format!("Could not download {}.", title))
                .about(id),
        );
    }

    /// Hand the job's variant to the driver under a fresh transfer id.
    fn begin_transfer(&mut self, id: ItemId, start_ratio: f64) {
        let transfer = TransferId(self.next_transfer);
        self.next_transfer += 1;

        let Some(job) = self.active.get_mut(&id) else {
            return;
        };
        job.transfer = Some(transfer);
        job.set_state(JobState::Connecting);
        job.peers = 0;

        let request = TransferRequest {
            transfer,
            item_id: id,
            title: job.item.title.clone(),
            variant: job.variant.clone(),
            start_ratio,
        };

        if let Err(e) = self.driver.begin(request, self.events.clone()) {
            tracing::warn!("Driver refused transfer for item {}: {}", id, e);
            if let Some(job) = self.active.get_mut(&id) {
                job.transfer = None;
            }
            self.fail_job(id, e.to_string());
        }
    }

    fn discard_held(&mut self, id: ItemId) {
        if let Some(Payload::File(path)) = self.held.shift_remove(&id) {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!("Failed to remove staged file {:?}: {}", path, e);
            }
        }
    }

    fn persist(&self) {
        // Failures are logged inside the store and never block a transition
        self.store.save(&self.completed);
    }

    fn violation(&mut self, error: CommandError) -> CommandError {
        tracing::debug!("Ignored command: {}", error);
        let notice = match &error {
            CommandError::InvalidState { id, state, action } => {
                Notice::info("Nothing to do").describe(format!("Cannot {} a download that is {}.", action, state)).about(*id)
            }
            CommandError::NotFound(id) => Notice::info("Nothing to do").describe("That download is not active.").about(*id),
            _ => Notice::info("Nothing to do"),
        };
        self.notify(notice);
        error
    }

    fn notify(&mut self, notice: Notice) {
        tracing::debug!("Notice: {}", notice);
        self.notices.push(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::artifact::DiscardSink;
    use crate::download::driver::{DriverCapabilities, DriverError, EventReceiver};
    use crate::download::state::{MemoryStore, RecordStore, COMPLETED_KEY};
    use crate::download::types::NoticeLevel;
    use crate::locks::{resilient_read, resilient_write};
    use anyhow::bail;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::RwLock;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Begin { transfer: TransferId, hash: String, start_ratio: f64 },
        Suspend(TransferId),
        Resume(TransferId),
        Abort(TransferId),
    }

    /// Driver that only records what the coordinator asked for.
    struct RecordingDriver {
        capabilities: DriverCapabilities,
        ready: AtomicBool,
        refuse_begin: AtomicBool,
        calls: RwLock<Vec<Call>>,
    }

    impl RecordingDriver {
        fn new(capabilities: DriverCapabilities) -> Arc<Self> {
            Arc::new(Self {
                capabilities,
                ready: AtomicBool::new(true),
                refuse_begin: AtomicBool::new(false),
                calls: RwLock::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Call> {
            resilient_read(&self.calls).clone()
        }

        fn begins(&self) -> Vec<Call> {
            self.calls().into_iter().filter(|c| matches!(c, Call::Begin { .. })).collect()
        }
    }

    impl TransferDriver for RecordingDriver {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn capabilities(&self) -> DriverCapabilities {
            self.capabilities
        }

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn begin(&self, request: TransferRequest, _events: EventSender) -> Result<(), DriverError> {
            if self.refuse_begin.load(Ordering::SeqCst) {
                return Err(DriverError::Begin("no route".into()));
            }
            resilient_write(&self.calls).push(Call::Begin {
                transfer: request.transfer,
                hash: request.variant.hash,
                start_ratio: request.start_ratio,
            });
            Ok(())
        }

        fn suspend(&self, transfer: TransferId) -> Result<(), DriverError> {
            if !self.capabilities.suspend {
                return Err(DriverError::Unsupported { driver: "recording", operation: "suspend" });
            }
            resilient_write(&self.calls).push(Call::Suspend(transfer));
            Ok(())
        }

        fn resume(&self, transfer: TransferId) -> Result<(), DriverError> {
            if !self.capabilities.suspend {
                return Err(DriverError::Unsupported { driver: "recording", operation: "resume" });
            }
            resilient_write(&self.calls).push(Call::Resume(transfer));
            Ok(())
        }

        fn abort(&self, transfer: TransferId) {
            resilient_write(&self.calls).push(Call::Abort(transfer));
        }
    }

    struct FailingSink;

    impl ArtifactSink for FailingSink {
        fn save(&self, _item: &CatalogItem, _payload: Payload) -> anyhow::Result<PathBuf> {
            bail!("disk full")
        }
    }

    struct FailingStore;

    impl RecordStore for FailingStore {
        fn read(&self, _key: &str) -> anyhow::Result<Option<String>> {
            bail!("storage unavailable")
        }

        fn write(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            bail!("storage unavailable")
        }
    }

    const FULL: DriverCapabilities = DriverCapabilities { suspend: true, partial_restart: true };
    const BARE: DriverCapabilities = DriverCapabilities { suspend: false, partial_restart: false };

    fn variant(hash: &str) -> Variant {
        Variant {
            hash: hash.into(),
            quality: "1080p".into(),
            size_bytes: 1_000_000,
            ..Default::default()
        }
    }

    fn movie(id: ItemId) -> CatalogItem {
        CatalogItem::new(id, format!("Movie {}", id)).with_variant(variant(&format!("h{}", id)))
    }

    fn session_with(
        driver: Arc<RecordingDriver>,
        store: MemoryStore,
        options: CoordinatorOptions,
    ) -> (Coordinator, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(driver, CompletedStore::new(store), Box::new(DiscardSink), tx, options);
        (coordinator, rx)
    }

    fn session(capabilities: DriverCapabilities) -> (Coordinator, Arc<RecordingDriver>) {
        let driver = RecordingDriver::new(capabilities);
        let (coordinator, _rx) = session_with(driver.clone(), MemoryStore::new(), CoordinatorOptions::default());
        (coordinator, driver)
    }

    fn event(coordinator: &Coordinator, id: ItemId, kind: TransferEventKind) -> TransferEvent {
        let transfer = coordinator.get_job(id).and_then(|job| job.transfer).expect("job has a transfer");
        TransferEvent { item_id: id, transfer, kind }
    }

    fn progress(ratio: f64) -> TransferEventKind {
        TransferEventKind::Progress(TransferProgress {
            ratio,
            rate: 2048,
            peers: 4,
            downloaded_bytes: (ratio * 1_000_000.0) as u64,
            eta_seconds: Some(10),
        })
    }

    fn completion() -> TransferEventKind {
        TransferEventKind::Completed(Payload::Bytes(b"movie".to_vec()))
    }

    fn downloading(coordinator: &mut Coordinator, id: ItemId) {
        coordinator.start(movie(id), variant(&format!("h{}", id))).expect("start accepted");
        let e = event(coordinator, id, TransferEventKind::Connected { peers: 3 });
        assert!(coordinator.handle_event(e));
    }

    #[test]
    fn test_start_creates_connecting_job() {
        let (mut coordinator, driver) = session(FULL);
        coordinator.start(movie(1), variant("h1")).expect("start accepted");

        let job = coordinator.get_job(1).expect("job exists");
        assert_eq!(job.state, JobState::Connecting);
        assert_eq!(job.progress, 0.0);
        assert_eq!(job.speed, 0);
        assert!(job.eta_seconds.is_none());
        assert!(coordinator.is_downloading(1));
        assert_eq!(
            driver.calls(),
            vec![Call::Begin { transfer: TransferId(1), hash: "h1".into(), start_ratio: 0.0 }]
        );
    }

    #[test]
    fn test_duplicate_start_is_rejected() {
        let (mut coordinator, driver) = session(FULL);
        coordinator.start(movie(1), variant("h1")).expect("first start accepted");
        coordinator.take_notices();

        let second = coordinator.start(movie(1), variant("h1-720"));
        assert_eq!(second, Err(CommandError::AlreadyListed(1)));
        assert!(second.unwrap_err().is_rejection());
        assert_eq!(coordinator.active_jobs().count(), 1);
        assert_eq!(coordinator.get_job(1).map(|j| j.variant.hash.as_str()), Some("h1"));
        assert_eq!(driver.begins().len(), 1);

        let notices = coordinator.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Already in Downloads");
    }

    #[test]
    fn test_start_rejected_when_completed() {
        let (mut coordinator, _driver) = session(FULL);
        coordinator.start(movie(1), variant("h1")).expect("start");
        let e = event(&coordinator, 1, completion());
        coordinator.handle_event(e);

        assert_eq!(coordinator.start(movie(1), variant("h1")), Err(CommandError::AlreadyListed(1)));
        assert!(!coordinator.is_downloading(1));
    }

    #[test]
    fn test_start_rejected_when_driver_not_ready() {
        let (mut coordinator, driver) = session(FULL);
        driver.ready.store(false, Ordering::SeqCst);

        assert_eq!(coordinator.start(movie(1), variant("h1")), Err(CommandError::NotReady));
        assert!(coordinator.get_job(1).is_none());
        assert_eq!(coordinator.take_notices()[0].level, NoticeLevel::Destructive);
    }

    #[test]
    fn test_start_replaces_failed_job() {
        let (mut coordinator, driver) = session(FULL);
        coordinator.start(movie(1), variant("h1")).expect("start");
        let e = event(&coordinator, 1, TransferEventKind::Failed { reason: "peer timeout".into() });
        coordinator.handle_event(e);

        coordinator.start(movie(1), variant("h1-720")).expect("restart over failed job");
        let job = coordinator.get_job(1).expect("job exists");
        assert_eq!(job.state, JobState::Connecting);
        assert_eq!(job.variant.hash, "h1-720");
        assert_eq!(coordinator.active_jobs().count(), 1);
        assert!(driver.calls().contains(&Call::Abort(TransferId(1))));
    }

    #[test]
    fn test_begin_refusal_fails_job() {
        let (mut coordinator, driver) = session(FULL);
        driver.refuse_begin.store(true, Ordering::SeqCst);

        coordinator.start(movie(1), variant("h1")).expect("start accepted");
        let job = coordinator.get_job(1).expect("job kept for retry");
        assert_eq!(job.state, JobState::Error);
        assert!(job.transfer.is_none());
        assert!(job.error.as_deref().unwrap_or_default().contains("no route"));
    }

    #[test]
    fn test_progress_then_completion_scenario() {
        let driver = RecordingDriver::new(FULL);
        let store = MemoryStore::new();
        let (mut coordinator, _rx) = session_with(driver, store.clone(), CoordinatorOptions::default());

        coordinator.start(movie(1), variant("h1")).expect("start");
        let e = event(&coordinator, 1, progress(0.5));
        assert!(coordinator.handle_event(e));

        let job = coordinator.get_job(1).expect("job exists");
        assert_eq!(job.progress, 50.0);
        assert_eq!(job.state, JobState::Downloading);
        assert_eq!(job.speed, 2048);
        assert_eq!(job.peers, 4);
        assert_eq!(job.downloaded, 500_000);

        let e = event(&coordinator, 1, completion());
        assert!(coordinator.handle_event(e));

        assert!(coordinator.get_job(1).is_none());
        assert_eq!(coordinator.completed()[0].id, 1);

        let persisted = store.read(COMPLETED_KEY).expect("read").expect("record written");
        let items: Vec<CatalogItem> = serde_json::from_str(&persisted).expect("valid json");
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_progress_is_monotonic_while_downloading() {
        let (mut coordinator, _driver) = session(FULL);
        downloading(&mut coordinator, 1);

        for ratio in [0.1, 0.4, 0.3, 0.35, 0.6] {
            let e = event(&coordinator, 1, progress(ratio));
            coordinator.handle_event(e);
        }
        assert_eq!(coordinator.get_job(1).map(|j| j.progress), Some(60.0));

        let e = event(&coordinator, 1, progress(7.0));
        coordinator.handle_event(e);
        assert_eq!(coordinator.get_job(1).map(|j| j.progress), Some(100.0));
    }

    #[test]
    fn test_duplicate_completion_records_once() {
        let (mut coordinator, _driver) = session(FULL);
        coordinator.start(movie(1), variant("h1")).expect("start");
        let e = event(&coordinator, 1, completion());

        assert!(coordinator.handle_event(e.clone()));
        assert!(!coordinator.handle_event(e));
        assert_eq!(coordinator.completed().len(), 1);
    }

    #[test]
    fn test_completed_record_is_newest_first() {
        let (mut coordinator, _driver) = session(FULL);
        for id in [1, 2, 3] {
            coordinator.start(movie(id), variant("h")).expect("start");
            let e = event(&coordinator, id, completion());
            coordinator.handle_event(e);
        }
        let ids: Vec<_> = coordinator.completed().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_finishing_phases() {
        let (mut coordinator, _driver) = session(FULL);
        downloading(&mut coordinator, 1);

        let e = event(&coordinator, 1, TransferEventKind::Finishing(FinishPhase::Zipping));
        coordinator.handle_event(e);
        assert_eq!(coordinator.get_job(1).map(|j| j.state), Some(JobState::Zipping));

        let e = event(&coordinator, 1, TransferEventKind::Finishing(FinishPhase::Seeding));
        coordinator.handle_event(e);
        let job = coordinator.get_job(1).expect("still active while seeding");
        assert_eq!(job.state, JobState::Seeding);
        assert_eq!(job.progress, 100.0);
    }

    #[test]
    fn test_failure_keeps_job_and_progress() {
        let (mut coordinator, _driver) = session(FULL);
        downloading(&mut coordinator, 2);
        let e = event(&coordinator, 2, progress(0.3));
        coordinator.handle_event(e);
        coordinator.take_notices();

        let e = event(&coordinator, 2, TransferEventKind::Failed { reason: "peer timeout".into() });
        assert!(coordinator.handle_event(e));

        let job = coordinator.get_job(2).expect("failed job is retained");
        assert_eq!(job.state, JobState::Error);
        assert_eq!(job.speed, 0);
        assert_eq!(job.progress, 30.0);
        assert_eq!(job.error.as_deref(), Some("peer timeout"));

        let notices = coordinator.take_notices();
        assert_eq!(notices[0].title, "Download Error");
        assert_eq!(notices[0].level, NoticeLevel::Destructive);
    }

    #[test]
    fn test_resume_after_failure_reuses_variant() {
        let (mut coordinator, driver) = session(FULL);
        coordinator.start(movie(2), variant("h2")).expect("start");
        let e = event(&coordinator, 2, TransferEventKind::Failed { reason: "peer timeout".into() });
        coordinator.handle_event(e);

        assert_eq!(coordinator.resume(2), Ok(ResumeOutcome::Continued));

        let begins = driver.begins();
        assert_eq!(begins.len(), 2);
        assert!(matches!(&begins[1], Call::Begin { hash, transfer, .. } if hash == "h2" && *transfer == TransferId(2)));
        assert_eq!(coordinator.get_job(2).map(|j| j.state), Some(JobState::Connecting));
    }

    #[test]
    fn test_resume_from_error_continues_from_progress() {
        let (mut coordinator, driver) = session(FULL);
        downloading(&mut coordinator, 1);
        let e = event(&coordinator, 1, progress(0.4));
        coordinator.handle_event(e);
        let e = event(&coordinator, 1, TransferEventKind::Failed { reason: "x".into() });
        coordinator.handle_event(e);

        assert_eq!(coordinator.resume(1), Ok(ResumeOutcome::Continued));
        assert_eq!(coordinator.get_job(1).map(|j| j.progress), Some(40.0));
        assert!(matches!(driver.begins().last(), Some(Call::Begin { start_ratio, .. }) if (*start_ratio - 0.4).abs() < 1e-9));
    }

    #[test]
    fn test_resume_from_error_restart_policy_resets_progress() {
        let driver = RecordingDriver::new(FULL);
        let options = CoordinatorOptions { resume_policy: ResumePolicy::Restart, ..Default::default() };
        let (mut coordinator, _rx) = session_with(driver.clone(), MemoryStore::new(), options);

        downloading(&mut coordinator, 1);
        let e = event(&coordinator, 1, progress(0.4));
        coordinator.handle_event(e);
        let e = event(&coordinator, 1, TransferEventKind::Failed { reason: "x".into() });
        coordinator.handle_event(e);

        assert_eq!(coordinator.resume(1), Ok(ResumeOutcome::Restarted));
        let job = coordinator.get_job(1).expect("job exists");
        assert_eq!(job.progress, 0.0);
        assert_eq!(job.downloaded, 0);
        assert!(matches!(driver.begins().last(), Some(Call::Begin { start_ratio, .. }) if *start_ratio == 0.0));
    }

    #[test]
    fn test_pause_and_resume_with_suspend() {
        let (mut coordinator, driver) = session(FULL);
        downloading(&mut coordinator, 1);
        let e = event(&coordinator, 1, progress(0.25));
        coordinator.handle_event(e);

        assert_eq!(coordinator.pause(1), Ok(PauseOutcome::Suspended));
        let job = coordinator.get_job(1).expect("job exists");
        assert_eq!(job.state, JobState::Paused);
        assert_eq!(job.speed, 0);
        assert_eq!(job.transfer, Some(TransferId(1)));

        // Events still in flight when the suspend landed are ignored
        let e = event(&coordinator, 1, progress(0.3));
        assert!(!coordinator.handle_event(e));
        assert_eq!(coordinator.get_job(1).map(|j| j.progress), Some(25.0));

        assert_eq!(coordinator.resume(1), Ok(ResumeOutcome::Continued));
        assert_eq!(coordinator.get_job(1).map(|j| j.state), Some(JobState::Downloading));
        assert_eq!(
            driver.calls()[1..],
            [Call::Suspend(TransferId(1)), Call::Resume(TransferId(1))]
        );
    }

    #[test]
    fn test_pause_while_zipping_restores_phase_on_resume() {
        let (mut coordinator, driver) = session(FULL);
        downloading(&mut coordinator, 1);
        let e = event(&coordinator, 1, TransferEventKind::Finishing(FinishPhase::Zipping));
        coordinator.handle_event(e);

        assert_eq!(coordinator.pause(1), Ok(PauseOutcome::Suspended));
        assert_eq!(coordinator.get_job(1).map(|j| j.state), Some(JobState::Paused));

        // A phase change racing the suspend is ignored
        let e = event(&coordinator, 1, TransferEventKind::Finishing(FinishPhase::Seeding));
        assert!(!coordinator.handle_event(e));

        assert_eq!(coordinator.resume(1), Ok(ResumeOutcome::Continued));
        let job = coordinator.get_job(1).expect("job exists");
        assert_eq!(job.state, JobState::Zipping);
        assert_eq!(job.progress, 100.0);
        assert!(job.paused_from.is_none());
        assert_eq!(driver.begins().len(), 1);
    }

    #[test]
    fn test_completion_while_paused_is_held_until_resume() {
        let (mut coordinator, _driver) = session(FULL);
        downloading(&mut coordinator, 1);
        let e = event(&coordinator, 1, TransferEventKind::Finishing(FinishPhase::Seeding));
        coordinator.handle_event(e);
        assert_eq!(coordinator.pause(1), Ok(PauseOutcome::Suspended));

        let e = event(&coordinator, 1, completion());
        assert!(coordinator.handle_event(e));
        let job = coordinator.get_job(1).expect("paused job stays active");
        assert_eq!(job.state, JobState::Paused);
        assert!(!coordinator.is_completed(1));

        assert_eq!(coordinator.resume(1), Ok(ResumeOutcome::Continued));
        assert!(coordinator.get_job(1).is_none());
        assert!(coordinator.is_completed(1));
        assert!(coordinator.take_notices().iter().any(|n| n.title == "Download Complete!"));
    }

    #[test]
    fn test_cancel_drops_held_completion() {
        let (mut coordinator, _driver) = session(FULL);
        downloading(&mut coordinator, 1);
        let e = event(&coordinator, 1, TransferEventKind::Finishing(FinishPhase::Zipping));
        coordinator.handle_event(e);
        coordinator.pause(1).expect("pause zipping job");
        let e = event(&coordinator, 1, completion());
        coordinator.handle_event(e);

        assert!(coordinator.cancel(1));
        assert!(!coordinator.is_completed(1));
        assert!(coordinator.completed().is_empty());
    }

    #[test]
    fn test_pause_without_suspend_capability_discards_transfer() {
        let (mut coordinator, driver) = session(BARE);
        downloading(&mut coordinator, 1);
        let e = event(&coordinator, 1, progress(0.5));
        coordinator.handle_event(e);
        coordinator.take_notices();

        assert_eq!(coordinator.pause(1), Ok(PauseOutcome::Discarded));
        let job = coordinator.get_job(1).expect("job exists");
        assert_eq!(job.state, JobState::Paused);
        assert!(job.transfer.is_none());
        assert!(driver.calls().contains(&Call::Abort(TransferId(1))));
        let notice = coordinator.take_notices().remove(0);
        assert!(notice.description.unwrap_or_default().contains("restart"));

        // No partial restart either: progress starts over
        assert_eq!(coordinator.resume(1), Ok(ResumeOutcome::Restarted));
        assert_eq!(coordinator.get_job(1).map(|j| j.progress), Some(0.0));
        assert!(matches!(driver.begins().last(), Some(Call::Begin { transfer, .. }) if *transfer == TransferId(2)));
    }

    #[test]
    fn test_discard_policy_never_suspends() {
        let driver = RecordingDriver::new(FULL);
        let options = CoordinatorOptions { pause_policy: PausePolicy::Discard, ..Default::default() };
        let (mut coordinator, _rx) = session_with(driver.clone(), MemoryStore::new(), options);
        downloading(&mut coordinator, 1);
        let e = event(&coordinator, 1, progress(0.5));
        coordinator.handle_event(e);

        assert_eq!(coordinator.pause(1), Ok(PauseOutcome::Discarded));
        assert!(!driver.calls().iter().any(|c| matches!(c, Call::Suspend(_))));

        // Partial restart keeps progress
        assert_eq!(coordinator.resume(1), Ok(ResumeOutcome::Continued));
        assert_eq!(coordinator.get_job(1).map(|j| j.progress), Some(50.0));
    }

    #[test]
    fn test_events_from_superseded_transfer_are_dropped() {
        let (mut coordinator, _driver) = session(BARE);
        downloading(&mut coordinator, 1);
        let old = event(&coordinator, 1, progress(0.9));

        coordinator.pause(1).expect("pause");
        coordinator.resume(1).expect("resume");

        assert!(!coordinator.handle_event(old));
        assert_eq!(coordinator.get_job(1).map(|j| j.progress), Some(0.0));
    }

    #[test]
    fn test_pause_missing_job_is_noop() {
        let (mut coordinator, driver) = session(FULL);
        let before = coordinator.snapshot();

        let result = coordinator.pause(3);
        assert_eq!(result, Err(CommandError::NotFound(3)));
        assert!(result.unwrap_err().is_state_violation());
        assert_eq!(coordinator.snapshot(), before);
        assert!(driver.calls().is_empty());
        assert_eq!(coordinator.take_notices().len(), 1);
    }

    #[test]
    fn test_pause_and_resume_ineligible_states() {
        let (mut coordinator, _driver) = session(FULL);
        coordinator.start(movie(1), variant("h1")).expect("start");

        assert_eq!(
            coordinator.pause(1),
            Err(CommandError::InvalidState { id: 1, state: JobState::Connecting, action: "pause" })
        );
        assert_eq!(
            coordinator.resume(1),
            Err(CommandError::InvalidState { id: 1, state: JobState::Connecting, action: "resume" })
        );
        assert_eq!(coordinator.get_job(1).map(|j| j.state), Some(JobState::Connecting));
    }

    #[test]
    fn test_cancel_removes_job_in_any_state() {
        let (mut coordinator, driver) = session(FULL);
        downloading(&mut coordinator, 1);
        coordinator.start(movie(2), variant("h2")).expect("start");
        let e = event(&coordinator, 2, TransferEventKind::Failed { reason: "x".into() });
        coordinator.handle_event(e);

        let late = event(&coordinator, 1, progress(0.5));
        assert!(coordinator.cancel(1));
        assert!(coordinator.get_job(1).is_none());
        assert!(!coordinator.is_downloading(1));
        assert!(driver.calls().contains(&Call::Abort(TransferId(1))));

        // Late events never resurrect a cancelled job
        assert!(!coordinator.handle_event(late));
        assert!(coordinator.get_job(1).is_none());

        assert!(coordinator.cancel(2));
        assert!(coordinator.get_job(2).is_none());
        assert!(!coordinator.cancel(2), "cancel is idempotent");
    }

    #[test]
    fn test_delete_completed_is_idempotent() {
        let store = MemoryStore::new();
        let (mut coordinator, _rx) = session_with(RecordingDriver::new(FULL), store.clone(), CoordinatorOptions::default());
        coordinator.start(movie(1), variant("h1")).expect("start");
        let e = event(&coordinator, 1, completion());
        coordinator.handle_event(e);

        assert!(coordinator.delete_completed(1));
        assert!(!coordinator.delete_completed(1));
        assert!(!coordinator.is_completed(1));
        assert_eq!(store.read(COMPLETED_KEY).expect("read").as_deref(), Some("[]"));
    }

    #[test]
    fn test_restart_restores_completed_record() {
        let store = MemoryStore::new();
        store.write(COMPLETED_KEY, r#"[{"id":7,"title":"Seven"}]"#).expect("seed record");

        let (coordinator, _rx) = session_with(RecordingDriver::new(FULL), store, CoordinatorOptions::default());
        assert_eq!(coordinator.completed().len(), 1);
        assert_eq!(coordinator.completed()[0].id, 7);
        assert_eq!(coordinator.active_jobs().count(), 0);
        assert!(coordinator.is_completed(7));
        assert!(!coordinator.is_downloading(7));
    }

    #[test]
    fn test_persistence_failure_does_not_block_completion() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut coordinator = Coordinator::new(
            RecordingDriver::new(FULL),
            CompletedStore::new(FailingStore),
            Box::new(DiscardSink),
            tx,
            CoordinatorOptions::default(),
        );

        coordinator.start(movie(1), variant("h1")).expect("start");
        let e = event(&coordinator, 1, completion());
        assert!(coordinator.handle_event(e));
        assert!(coordinator.get_job(1).is_none());
        assert_eq!(coordinator.completed()[0].id, 1);
    }

    #[test]
    fn test_save_failure_moves_job_to_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut coordinator = Coordinator::new(
            RecordingDriver::new(FULL),
            CompletedStore::new(MemoryStore::new()),
            Box::new(FailingSink),
            tx,
            CoordinatorOptions::default(),
        );

        coordinator.start(movie(1), variant("h1")).expect("start");
        let e = event(&coordinator, 1, completion());
        coordinator.handle_event(e);

        let job = coordinator.get_job(1).expect("job kept for retry");
        assert_eq!(job.state, JobState::Error);
        assert!(job.error.as_deref().unwrap_or_default().contains("disk full"));
        assert!(coordinator.completed().is_empty());
        assert_eq!(coordinator.take_notices().last().map(|n| n.title.as_str()), Some("Error creating download link"));
    }

    #[test]
    fn test_expire_stalled_jobs() {
        let driver = RecordingDriver::new(FULL);
        let options = CoordinatorOptions { stale_timeout: Some(chrono::Duration::seconds(30)), ..Default::default() };
        let (mut coordinator, _rx) = session_with(driver.clone(), MemoryStore::new(), options);

        downloading(&mut coordinator, 1);
        downloading(&mut coordinator, 2);
        coordinator.pause(2).expect("pause");

        assert!(coordinator.expire_stalled(Utc::now()).is_empty());

        let later = Utc::now() + chrono::Duration::seconds(31);
        assert_eq!(coordinator.expire_stalled(later), vec![1]);
        let job = coordinator.get_job(1).expect("job kept");
        assert_eq!(job.state, JobState::Error);
        assert_eq!(job.error.as_deref(), Some("Transfer stalled"));
        assert!(driver.calls().contains(&Call::Abort(TransferId(1))));
        assert_eq!(coordinator.get_job(2).map(|j| j.state), Some(JobState::Paused));
    }

    #[test]
    fn test_expire_stalled_disabled_by_default() {
        let (mut coordinator, _driver) = session(FULL);
        downloading(&mut coordinator, 1);
        let later = Utc::now() + chrono::Duration::days(1);
        assert!(coordinator.expire_stalled(later).is_empty());
    }

    #[test]
    fn test_shutdown_aborts_transfers() {
        let (mut coordinator, driver) = session(FULL);
        downloading(&mut coordinator, 1);
        downloading(&mut coordinator, 2);

        coordinator.shutdown();
        let aborts: Vec<_> = driver.calls().into_iter().filter(|c| matches!(c, Call::Abort(_))).collect();
        assert_eq!(aborts, vec![Call::Abort(TransferId(1)), Call::Abort(TransferId(2))]);
    }
}
