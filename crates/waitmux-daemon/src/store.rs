use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use waitmux_core::atomic_write_json;

use crate::config::DaemonConfig;
use crate::error::WaitError;
use crate::process;
use crate::types::DaemonState;

/// Reads and writes the single daemon state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(&config.state_file_path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no state file exists yet.
    pub fn load(&self) -> Result<Option<DaemonState>, WaitError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Err(self.corrupt("file is empty"));
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| self.corrupt(e.to_string()))
    }

    /// Atomically replace the state file.
    pub fn save(&self, state: &DaemonState) -> Result<(), WaitError> {
        atomic_write_json(&self.path, state)?;
        Ok(())
    }

    /// Like [`load`](Self::load), but a corrupt file is logged and replaced by
    /// a fresh default state instead of failing.
    pub fn load_or_reset(&self) -> Result<DaemonState, WaitError> {
        match self.load() {
            Ok(state) => Ok(state.unwrap_or_default()),
            Err(e @ WaitError::CorruptState { .. }) => {
                warn!(error = %e, "Discarding unreadable daemon state");
                Ok(DaemonState::default())
            }
            Err(e) => Err(e),
        }
    }

    fn corrupt(&self, reason: impl Into<String>) -> WaitError {
        WaitError::CorruptState {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

/// The state claims RUNNING but its recorded process no longer exists.
pub fn is_stale(state: &DaemonState) -> bool {
    state.claims_running() && !state.pid.is_some_and(process::is_alive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockedPane, DaemonStatus, ResetSource};
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> StateStore {
        StateStore::new(dir.path().join("state").join("rate-limit-daemon.json"))
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_returns_equal_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let started = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let mut state = DaemonState::running(4242, started);
        state.last_scan_at = Some(started + Duration::seconds(30));
        state.successful_resumes = 2;
        state.tracked_panes.insert(
            "%3".to_string(),
            BlockedPane {
                pane_id: "%3".to_string(),
                session_label: "agents".to_string(),
                window_index: 1,
                detected_at: started,
                reset_at: started + Duration::minutes(5),
                reset_expression: "in 5 minutes".to_string(),
                reset_source: ResetSource::Relative,
                signature: "rate limited, retry in 5 minutes".to_string(),
                resumed: false,
                resume_attempted_at: None,
                missed_scans: 1,
            },
        );

        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
    }

    #[test]
    fn garbage_is_corrupt_not_default() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();

        fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.load(), Err(WaitError::CorruptState { .. })));

        fs::write(store.path(), "   \n").unwrap();
        assert!(matches!(store.load(), Err(WaitError::CorruptState { .. })));
    }

    #[test]
    fn load_or_reset_recovers_from_corruption() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "[]").unwrap();

        let state = store.load_or_reset().unwrap();
        assert_eq!(state.status, DaemonStatus::Stopped);
        assert!(state.tracked_panes.is_empty());
    }

    #[test]
    fn stale_when_running_pid_is_dead() {
        let now = Utc::now();
        assert!(is_stale(&DaemonState::running(99_999_999, now)));
        assert!(!is_stale(&DaemonState::running(std::process::id(), now)));
        assert!(!is_stale(&DaemonState::default()));

        let mut no_pid = DaemonState::running(1, now);
        no_pid.pid = None;
        assert!(is_stale(&no_pid));
    }
}
