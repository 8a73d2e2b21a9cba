// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download types for the session coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogItem, ItemId, Variant};
use crate::utils::{format_eta, format_speed};

/// Identifier of one transfer attempt.
///
/// Every `begin` gets a fresh id, so events from an aborted or superseded
/// transfer can be told apart from the job's current one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for the transfer to start
    Connecting,
    /// Receiving data
    Downloading,
    /// Paused by user
    Paused,
    /// Packaging the received content
    Zipping,
    /// Content complete, still serving peers
    Seeding,
    /// Finished; about to leave the active set
    Completed,
    /// Transfer failed, kept for retry
    Error,
}

impl JobState {
    /// States in which speed/peers/ETA carry meaning.
    pub fn has_telemetry(&self) -> bool {
        matches!(self, JobState::Downloading | JobState::Zipping | JobState::Seeding)
    }

    /// States `pause` accepts.
    pub fn is_pausable(&self) -> bool {
        self.has_telemetry()
    }

    /// States `resume` accepts.
    pub fn is_resumable(&self) -> bool {
        matches!(self, JobState::Paused | JobState::Error)
    }

    /// States in which a transfer is expected to make progress.
    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Connecting | JobState::Downloading)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Connecting => "connecting",
            JobState::Downloading => "downloading",
            JobState::Paused => "paused",
            JobState::Zipping => "zipping",
            JobState::Seeding => "seeding",
            JobState::Completed => "completed",
            JobState::Error => "error",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One in-progress or failed acquisition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// The item being acquired
    pub item: CatalogItem,
    /// Rendition bound at start time
    pub variant: Variant,
    pub state: JobState,
    /// Percentage in 0..=100
    pub progress: f64,
    /// Bytes per second
    pub speed: u64,
    pub peers: u32,
    /// Bytes received so far
    pub downloaded: u64,
    /// Seconds remaining; `None` means unknown (infinite)
    pub eta_seconds: Option<u64>,
    /// Reason of the last failure, set while in `Error`
    pub error: Option<String>,
    /// Current transfer; `None` once the transfer was discarded
    pub transfer: Option<TransferId>,
    /// State the job was paused from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_from: Option<JobState>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Fresh job in `Connecting` with zeroed telemetry.
    pub fn new(item: CatalogItem, variant: Variant) -> Self {
        let now = Utc::now();
        Self {
            item,
            variant,
            state: JobState::Connecting,
            progress: 0.0,
            speed: 0,
            peers: 0,
            downloaded: 0,
            eta_seconds: None,
            error: None,
            transfer: None,
            paused_from: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> ItemId {
        self.item.id
    }

    /// Move to a new state, clearing telemetry the new state cannot carry.
    pub fn set_state(&mut self, state: JobState) {
        self.state = state;
        if !state.has_telemetry() {
            self.speed = 0;
            self.eta_seconds = None;
        }
        if state != JobState::Error {
            self.error = None;
        }
        self.touch();
    }

    /// Refresh the activity timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Formatted speed, e.g. "1.2 MB/s".
    pub fn speed_string(&self) -> String {
        format_speed(self.speed)
    }

    /// Formatted ETA, "∞" when unknown.
    pub fn eta_string(&self) -> String {
        format_eta(self.eta_seconds)
    }
}

/// Severity of a user-visible notice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Destructive,
}

/// Transient message for the user, the equivalent of a toast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notice {
    pub title: String,
    pub description: Option<String>,
    pub level: NoticeLevel,
    /// Item the notice is about, if any
    pub item_id: Option<ItemId>,
}

impl Notice {
    pub fn info(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            level: NoticeLevel::Info,
            item_id: None,
        }
    }

    pub fn destructive(title: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Destructive,
            ..Self::info(title)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn about(mut self, item_id: ItemId) -> Self {
        self.item_id = Some(item_id);
        self
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.title, description),
            None => f.write_str(&self.title),
        }
    }
}

/// What `pause` does to the underlying transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PausePolicy {
    /// Suspend when the driver can; otherwise discard and restart on resume
    #[default]
    Suspend,
    /// Always discard the transfer; resume begins a new one
    Discard,
}

/// How `resume` treats progress when a new transfer has to be begun.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Keep progress and ask the driver to continue from it
    #[default]
    Continue,
    /// Reset progress to zero
    Restart,
}

/// Result of an accepted `pause`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PauseOutcome {
    /// The transfer is suspended and will continue on resume
    Suspended,
    /// The transfer was aborted; resume begins a new one
    Discarded,
}

/// Result of an accepted `resume`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResumeOutcome {
    /// Progress was kept
    Continued,
    /// Progress was reset; the transfer starts from zero
    Restarted,
}

/// Snapshot published to subscribers on every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Snapshot {
    /// Active jobs in start order
    pub active: Vec<Job>,
    /// Completed items, newest first
    pub completed: Vec<CatalogItem>,
}

impl Snapshot {
    pub fn job(&self, id: ItemId) -> Option<&Job> {
        self.active.iter().find(|job| job.id() == id)
    }

    pub fn is_downloading(&self, id: ItemId) -> bool {
        self.job(id).is_some()
    }

    pub fn is_completed(&self, id: ItemId) -> bool {
        self.completed.iter().any(|item| item.id == id)
    }
}
