//! Error types for the rate-limit wait daemon

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("tmux unavailable: {0}")]
    ToolUnavailable(String),

    #[error("pane not found: {pane_id}")]
    PaneNotFound { pane_id: String },

    #[error("capture failed for pane {pane_id}: {reason}")]
    CaptureFailed { pane_id: String, reason: String },

    #[error("failed to send keys to pane {pane_id}: {reason}")]
    SendFailed { pane_id: String, reason: String },

    #[error("corrupt daemon state in {path}: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    #[error("daemon is already running with PID {pid}")]
    AlreadyRunning { pid: u32 },

    #[error("daemon with PID {pid} did not exit within {waited_secs}s")]
    StopTimedOut { pid: u32, waited_secs: u64 },

    #[error("failed to signal PID {pid}: {reason}")]
    SignalFailed { pid: u32, reason: String },

    #[error("state could not be written {failures} times in a row: {last}")]
    PersistFailed { failures: u32, last: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WaitError {
    /// The pane disappeared between listing and use.
    pub fn is_pane_gone(&self) -> bool {
        matches!(self, Self::PaneNotFound { .. })
    }

    /// Worth retrying on the next tick without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CaptureFailed { .. } | Self::SendFailed { .. } | Self::Io(_)
        )
    }
}
