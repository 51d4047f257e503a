use std::path::{Path, PathBuf};
use std::time::Duration;

use waitmux_config::DaemonSettings;
use waitmux_core::{default_state_dir, DAEMON_LOG_FILE, DAEMON_STATE_FILE};

/// Immutable daemon settings, resolved once per invocation.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub poll_interval: Duration,
    pub stale_after_scans: u32,
    pub resume_sequence: Vec<String>,
    pub max_panes: usize,
    pub capture_lines: usize,
    pub capture_max_bytes: usize,
    pub tail_lines: usize,
    pub command_timeout: Duration,
    pub fallback_wait: Duration,
    pub max_persist_failures: u32,
    pub stop_timeout: Duration,
    pub tmux_bin: String,
    pub state_file_path: PathBuf,
    pub log_file_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from(&DaemonSettings::default())
    }
}

impl From<&DaemonSettings> for DaemonConfig {
    fn from(settings: &DaemonSettings) -> Self {
        let state_dir = settings
            .state_dir
            .clone()
            .unwrap_or_else(default_state_dir);

        Self {
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            stale_after_scans: settings.stale_after_scans,
            resume_sequence: settings.resume_sequence.clone(),
            max_panes: settings.max_panes,
            capture_lines: settings.capture_lines,
            capture_max_bytes: settings.capture_max_bytes,
            tail_lines: settings.tail_lines,
            command_timeout: Duration::from_secs(settings.command_timeout_secs),
            fallback_wait: Duration::from_secs(settings.fallback_wait_secs),
            max_persist_failures: settings.max_persist_failures,
            stop_timeout: Duration::from_secs(settings.stop_timeout_secs),
            tmux_bin: settings.tmux_bin.clone(),
            state_file_path: state_dir.join(DAEMON_STATE_FILE),
            log_file_path: state_dir.join(DAEMON_LOG_FILE),
        }
    }
}

impl DaemonConfig {
    /// Same settings with state and log files under `dir`.
    pub fn with_state_dir(mut self, dir: &Path) -> Self {
        self.state_file_path = dir.join(DAEMON_STATE_FILE);
        self.log_file_path = dir.join(DAEMON_LOG_FILE);
        self
    }
}
