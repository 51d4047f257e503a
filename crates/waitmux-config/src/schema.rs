use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use waitmux_telemetry::TelemetryConfig;

/// Main waitmux configuration
///
/// Loaded from (first match wins):
/// 1. an explicit `--config` path
/// 2. `waitmux.jsonc` / `waitmux.json` / `waitmux.yml` / `waitmux.yaml` (and hidden
///    `.waitmux.*` variants) in the working directory
/// 3. the same names under `~/.config/waitmux/`
///
/// A missing file means defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitmuxConfig {
    /// Rate-limit wait daemon settings
    #[serde(default)]
    pub daemon: DaemonSettings,

    /// Logging settings
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Rate-limit wait daemon settings
///
/// # Example
///
/// ```yaml
/// daemon:
///   poll_interval_secs: 30
///   resume_sequence: ["continue", "Enter"]
///   max_panes: 32
///   state_dir: ${HOME}/.waitmux/state
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Seconds between scans (default: 30)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Drop a tracked pane after this many consecutive scans in which it
    /// could not be captured (default: 3)
    #[serde(default = "default_stale_after_scans")]
    pub stale_after_scans: u32,

    /// Keys sent to resume a pane. tmux key names (`Enter`, `C-c`, ...) are
    /// sent as keys, anything else as literal text.
    #[serde(default = "default_resume_sequence")]
    pub resume_sequence: Vec<String>,

    /// Maximum panes tracked at once (default: 32)
    #[serde(default = "default_max_panes")]
    pub max_panes: usize,

    /// Scrollback lines requested from tmux per capture (default: 200)
    #[serde(default = "default_capture_lines")]
    pub capture_lines: usize,

    /// Byte cap applied to each capture (default: 16 KiB)
    #[serde(default = "default_capture_max_bytes")]
    pub capture_max_bytes: usize,

    /// Only the last N lines of a capture are inspected for a block (default: 40)
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,

    /// Timeout for every tmux invocation (default: 5)
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Wait applied to a block message that carries no reset time (default: 300)
    #[serde(default = "default_fallback_wait_secs")]
    pub fallback_wait_secs: u64,

    /// Consecutive failed state writes before the daemon gives up (default: 3)
    #[serde(default = "default_max_persist_failures")]
    pub max_persist_failures: u32,

    /// How long `daemon stop` waits for the daemon to exit (default: 30)
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// tmux executable, as a bare name looked up on `PATH` or a path
    /// (default: `tmux`). It is run directly, not through a shell, so it
    /// cannot carry extra arguments such as `-L socket`.
    #[serde(default = "default_tmux_bin")]
    pub tmux_bin: String,

    /// Directory holding the state and log files (default: `~/.waitmux/state`)
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_stale_after_scans() -> u32 {
    3
}

fn default_resume_sequence() -> Vec<String> {
    vec!["continue".to_string(), "Enter".to_string()]
}

fn default_max_panes() -> usize {
    32
}

fn default_capture_lines() -> usize {
    200
}

fn default_capture_max_bytes() -> usize {
    16 * 1024
}

fn default_tail_lines() -> usize {
    40
}

fn default_command_timeout_secs() -> u64 {
    5
}

fn default_fallback_wait_secs() -> u64 {
    300
}

fn default_max_persist_failures() -> u32 {
    3
}

fn default_stop_timeout_secs() -> u64 {
    30
}

fn default_tmux_bin() -> String {
    "tmux".to_string()
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            stale_after_scans: default_stale_after_scans(),
            resume_sequence: default_resume_sequence(),
            max_panes: default_max_panes(),
            capture_lines: default_capture_lines(),
            capture_max_bytes: default_capture_max_bytes(),
            tail_lines: default_tail_lines(),
            command_timeout_secs: default_command_timeout_secs(),
            fallback_wait_secs: default_fallback_wait_secs(),
            max_persist_failures: default_max_persist_failures(),
            stop_timeout_secs: default_stop_timeout_secs(),
            tmux_bin: default_tmux_bin(),
            state_dir: None,
        }
    }
}

impl DaemonSettings {
    /// Clamp values that would stall or disable the daemon.
    pub fn validate(&mut self) {
        self.poll_interval_secs = self.poll_interval_secs.max(1);
        self.command_timeout_secs = self.command_timeout_secs.max(1);
        self.max_panes = self.max_panes.max(1);
        self.tail_lines = self.tail_lines.max(1);
        self.capture_lines = self.capture_lines.max(self.tail_lines);
        self.capture_max_bytes = self.capture_max_bytes.max(1024);
        self.max_persist_failures = self.max_persist_failures.max(1);
        self.stop_timeout_secs = self.stop_timeout_secs.max(self.command_timeout_secs);
        if self.resume_sequence.iter().all(|k| k.is_empty()) {
            self.resume_sequence = default_resume_sequence();
        }
        if self.tmux_bin.trim().is_empty() {
            self.tmux_bin = default_tmux_bin();
        }
    }
}
