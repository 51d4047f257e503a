use std::path::PathBuf;

pub const WAITMUX_DIR: &str = ".waitmux";

pub const STATE_SUBDIR: &str = "state";

pub const DAEMON_STATE_FILE: &str = "rate-limit-daemon.json";

pub const DAEMON_LOG_FILE: &str = "rate-limit-daemon.log";

/// `~/.waitmux/state`, or `./.waitmux/state` when no home directory is known.
pub fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(WAITMUX_DIR)
        .join(STATE_SUBDIR)
}
