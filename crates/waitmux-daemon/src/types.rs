use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable tmux pane identifier, e.g. `%12`.
pub type PaneId = String;

/// Rate-limit view derived from a reset time. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub is_limited: bool,
    /// Always `None` when `is_limited` is false.
    pub reset_at: Option<DateTime<Utc>>,
    pub remaining_seconds: Option<i64>,
}

impl RateLimitStatus {
    pub fn not_limited() -> Self {
        Self {
            is_limited: false,
            reset_at: None,
            remaining_seconds: None,
        }
    }
}

/// A pane as listed by tmux.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaneRef {
    pub pane_id: PaneId,
    pub session_label: String,
    pub window_index: usize,
}

/// Captured pane text and the moment it was read.
#[derive(Debug, Clone)]
pub struct PaneCapture {
    pub text: String,
    pub captured_at: DateTime<Utc>,
}

/// How a reset time was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetSource {
    /// "in 5 minutes", "after 1h 30m"
    Relative,
    /// "in 04:59"
    Countdown,
    /// "resets at 3pm"
    Absolute,
    /// "limit reached|1735689600"
    Epoch,
    /// Block message without a parseable time
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedPane {
    pub pane_id: PaneId,
    pub session_label: String,
    #[serde(default)]
    pub window_index: usize,
    pub detected_at: DateTime<Utc>,
    pub reset_at: DateTime<Utc>,
    pub reset_expression: String,
    pub reset_source: ResetSource,
    /// The output line carrying the block; identifies one concrete message.
    pub signature: String,
    pub resumed: bool,
    pub resume_attempted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub missed_scans: u32,
}

impl BlockedPane {
    /// Reset time has passed and no resume has succeeded yet.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.resumed && now >= self.reset_at
    }

    /// Record a successful resume. Callers only do this once `is_due`.
    pub fn mark_resumed(&mut self, at: DateTime<Utc>) {
        debug_assert!(at >= self.reset_at);
        self.resumed = true;
        self.resume_attempted_at = Some(at);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DaemonStatus {
    #[default]
    Stopped,
    Running,
}

/// The persisted root, one per host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonState {
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub status: DaemonStatus,
    pub last_scan_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tracked_panes: BTreeMap<PaneId, BlockedPane>,
    #[serde(default)]
    pub total_resume_attempts: u64,
    #[serde(default)]
    pub successful_resumes: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl DaemonState {
    /// Fresh state claimed by the daemon process `pid`.
    pub fn running(pid: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            pid: Some(pid),
            started_at: Some(started_at),
            status: DaemonStatus::Running,
            ..Default::default()
        }
    }

    pub fn claims_running(&self) -> bool {
        self.status == DaemonStatus::Running
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(message.into());
    }
}
