//! Daemon lifecycle: start, the poll loop, stop, and the read-only queries
//! used by the CLI.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::error::WaitError;
use crate::monitor::aggregate_status;
use crate::process;
use crate::scan::{PaneFailure, Recovered, RecoveryReason, Scanner};
use crate::store::{self, StateStore};
use crate::tmux::PaneSource;
use crate::types::{BlockedPane, DaemonState, DaemonStatus, PaneId, RateLimitStatus};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What a single tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// False when listing panes failed; tracked panes then only age toward
    /// being dropped as stale.
    pub scanned: bool,
    pub newly_blocked: Vec<PaneId>,
    pub recovered: Vec<Recovered>,
    pub resumed: Vec<PaneId>,
    pub capture_failures: Vec<PaneFailure>,
    pub resume_failures: Vec<PaneFailure>,
}

/// Cooperative shutdown flag shared between the poll loop and whoever wants
/// it to stop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug, Default)]
struct ShutdownInner {
    triggered: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    async fn notified(&self) {
        self.inner.notify.notified().await
    }

    /// Trigger on SIGTERM or Ctrl-C. Must be called inside a tokio runtime.
    pub fn install_signal_handlers(&self) -> Result<(), WaitError> {
        let this = self.clone();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut term = signal(SignalKind::terminate())?;
            tokio::spawn(async move {
                tokio::select! {
                    _ = term.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received interrupt"),
                }
                this.trigger();
            });
        }

        #[cfg(not(unix))]
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received interrupt");
            }
            this.trigger();
        });

        Ok(())
    }
}

/// The long-running daemon over a pane source.
pub struct RateLimitDaemon<S: PaneSource> {
    config: DaemonConfig,
    source: S,
    store: StateStore,
    scanner: Scanner,
    state: DaemonState,
    persist_failures: u32,
}

impl<S: PaneSource> RateLimitDaemon<S> {
    pub fn new(config: DaemonConfig, source: S) -> Self {
        Self {
            store: StateStore::from_config(&config),
            scanner: Scanner::new(&config),
            config,
            source,
            state: DaemonState::default(),
            persist_failures: 0,
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Claim the state file for the current process.
    pub fn start(&mut self) -> Result<&DaemonState, WaitError> {
        self.start_as(std::process::id(), Utc::now())
    }

    /// Claim the state file for `pid`.
    ///
    /// Fails with [`WaitError::AlreadyRunning`] when another live process
    /// holds it. A RUNNING state whose process is gone is replaced.
    pub fn start_as(&mut self, pid: u32, now: DateTime<Utc>) -> Result<&DaemonState, WaitError> {
        let previous = self.store.load_or_reset()?;

        if previous.claims_running() {
            match previous.pid {
                Some(other) if other != pid && process::is_alive(other) => {
                    return Err(WaitError::AlreadyRunning { pid: other });
                }
                Some(other) if other != pid => {
                    warn!(stale_pid = other, "Replacing state left by a dead daemon");
                }
                _ => {}
            }
        }

        self.state = DaemonState::running(pid, now);
        self.persist_failures = 0;
        self.store.save(&self.state)?;
        info!(pid, state_file = %self.store.path().display(), "Daemon started");
        Ok(&self.state)
    }

    /// One scan-and-resume pass at `now`.
    ///
    /// Only repeated persistence failure is fatal; tmux trouble is logged and
    /// counted in the state.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickReport, WaitError> {
        let mut report = TickReport::default();

        // Resumed on the previous tick; the scanner remembers them as settled.
        self.state.tracked_panes.retain(|_, p| !p.resumed);

        match self
            .scanner
            .scan(&self.source, &self.state.tracked_panes)
            .await
        {
            Ok(outcome) => {
                for r in &outcome.recovered {
                    info!(pane = %r.pane_id, reason = %r.reason, "Stopped tracking pane");
                }
                for f in &outcome.failures {
                    warn!(pane = %f.pane_id, error = %f.message, "Skipping pane this tick");
                }
                self.state.tracked_panes = outcome.tracked;
                report.scanned = true;
                report.newly_blocked = outcome.newly_blocked;
                report.recovered = outcome.recovered;
                report.capture_failures = outcome.failures;
            }
            Err(e) => {
                warn!(error = %e, "Could not list panes");
                self.state.record_error(e.to_string());
                let stale_after = self.config.stale_after_scans;
                let mut stale = Vec::new();
                for pane in self.state.tracked_panes.values_mut() {
                    pane.missed_scans += 1;
                    if pane.missed_scans > stale_after {
                        stale.push(pane.pane_id.clone());
                    }
                }
                for pane_id in stale {
                    warn!(pane = %pane_id, "Dropping pane not observed for too many scans");
                    self.state.tracked_panes.remove(&pane_id);
                    report.recovered.push(Recovered {
                        pane_id,
                        reason: RecoveryReason::Stale,
                    });
                }
            }
        }

        self.state.last_scan_at = Some(now);
        self.persist()?;

        let due: Vec<PaneId> = self
            .state
            .tracked_panes
            .values()
            .filter(|p| p.is_due(now))
            .map(|p| p.pane_id.clone())
            .collect();
        if due.is_empty() {
            return Ok(report);
        }

        for pane_id in due {
            self.state.total_resume_attempts += 1;
            match self
                .source
                .send_keys(&pane_id, &self.config.resume_sequence)
                .await
            {
                Ok(()) => {
                    if let Some(pane) = self.state.tracked_panes.get_mut(&pane_id) {
                        pane.mark_resumed(now);
                        self.scanner.mark_resumed(pane);
                    }
                    self.state.successful_resumes += 1;
                    info!(pane = %pane_id, "Resumed pane");
                    report.resumed.push(pane_id);
                }
                Err(e) if e.is_pane_gone() => {
                    info!(pane = %pane_id, "Pane closed before it could be resumed");
                    self.state.tracked_panes.remove(&pane_id);
                    report.recovered.push(Recovered {
                        pane_id,
                        reason: RecoveryReason::Vanished,
                    });
                }
                Err(e) => {
                    warn!(pane = %pane_id, error = %e, "Resume failed, retrying next tick");
                    self.state.record_error(e.to_string());
                    report.resume_failures.push(PaneFailure {
                        pane_id,
                        message: e.to_string(),
                    });
                }
            }
        }

        self.persist()?;
        Ok(report)
    }

    /// Poll until `shutdown` fires, then record STOPPED.
    pub async fn run(mut self, shutdown: ShutdownSignal) -> Result<DaemonState, WaitError> {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Entering poll loop"
        );

        let result = loop {
            if shutdown.is_triggered() {
                break Ok(());
            }
            match self.tick(Utc::now()).await {
                Ok(report) => debug!(
                    tracked = self.state.tracked_panes.len(),
                    resumed = report.resumed.len(),
                    "Tick complete"
                ),
                Err(e) => break Err(e),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.notified() => {}
            }
        };

        self.state.status = DaemonStatus::Stopped;
        match (self.store.save(&self.state), result) {
            (Ok(()), Ok(())) => {
                info!("Daemon stopped");
                Ok(self.state)
            }
            (Err(e), Ok(())) => {
                error!(error = %e, "Failed to record shutdown");
                Err(e)
            }
            (_, Err(e)) => {
                error!(error = %e, "Daemon exiting on error");
                Err(e)
            }
        }
    }

    fn persist(&mut self) -> Result<(), WaitError> {
        match self.store.save(&self.state) {
            Ok(()) => {
                self.persist_failures = 0;
                Ok(())
            }
            Err(e) => {
                self.persist_failures += 1;
                error!(
                    error = %e,
                    failures = self.persist_failures,
                    "Failed to write daemon state"
                );
                self.state.record_error(e.to_string());
                if self.persist_failures >= self.config.max_persist_failures {
                    Err(WaitError::PersistFailed {
                        failures: self.persist_failures,
                        last: e.to_string(),
                    })
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Snapshot of the persisted daemon state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: DaemonState,
    /// State claims RUNNING but the process is gone.
    pub stale: bool,
    /// Set when the state file exists but could not be read.
    pub load_error: Option<String>,
    pub rate_limit: RateLimitStatus,
    pub state_file: PathBuf,
}

impl StatusReport {
    pub fn is_running(&self) -> bool {
        self.state.claims_running() && !self.stale
    }
}

/// Read the daemon state without modifying anything.
pub fn daemon_status(config: &DaemonConfig) -> StatusReport {
    daemon_status_at(config, Utc::now())
}

pub fn daemon_status_at(config: &DaemonConfig, now: DateTime<Utc>) -> StatusReport {
    let store = StateStore::from_config(config);
    let (state, load_error) = match store.load() {
        Ok(state) => (state.unwrap_or_default(), None),
        Err(e) => (DaemonState::default(), Some(e.to_string())),
    };

    StatusReport {
        stale: store::is_stale(&state),
        rate_limit: aggregate_status(state.tracked_panes.values(), now),
        state_file: store.path().to_path_buf(),
        load_error,
        state,
    }
}

/// Stop the daemon recorded in the state file and mark the state STOPPED.
///
/// Stopping a daemon that is not running succeeds without writing.
pub async fn stop_daemon(config: &DaemonConfig) -> Result<DaemonState, WaitError> {
    let store = StateStore::from_config(config);
    let mut state = store.load_or_reset()?;
    if !state.claims_running() {
        return Ok(state);
    }

    let live_pid = state
        .pid
        .filter(|&pid| pid != std::process::id() && process::is_alive(pid));

    if let Some(pid) = live_pid {
        info!(pid, "Stopping daemon");
        process::terminate(pid)?;

        let deadline = Instant::now() + config.stop_timeout;
        while process::is_alive(pid) {
            if Instant::now() >= deadline {
                return Err(WaitError::StopTimedOut {
                    pid,
                    waited_secs: config.stop_timeout.as_secs(),
                });
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
        // Keep whatever the daemon recorded on its way out.
        state = store.load_or_reset()?;
    } else {
        warn!(pid = ?state.pid, "Daemon process is gone, clearing stale state");
    }

    state.status = DaemonStatus::Stopped;
    store.save(&state)?;
    Ok(state)
}

/// One-shot scan of all panes, independent of any running daemon. Nothing
/// is persisted. Results are ordered by pane id.
pub async fn detect_blocked_panes<S: PaneSource + ?Sized>(
    config: &DaemonConfig,
    source: &S,
) -> Result<Vec<BlockedPane>, WaitError> {
    let mut scanner = Scanner::new(config);
    let outcome = scanner.scan(source, &BTreeMap::new()).await?;
    for f in &outcome.failures {
        warn!(pane = %f.pane_id, error = %f.message, "Skipped pane");
    }
    Ok(outcome.tracked.into_values().collect())
}
