//! Rate Limit Wait - keep AI assistant sessions alive across rate limits
//!
//! The daemon watches tmux panes for "rate limited, retry later" output,
//! remembers when each limit clears, and types a resume sequence into the pane
//! once it has.
//!
//! ## Components
//!
//! - [`tmux`]: the [`PaneSource`] boundary (list, capture, send keys)
//! - [`detector`]: classifies captured text and parses the reset time
//! - [`monitor`]: turns reset times into a [`RateLimitStatus`]
//! - [`scan`]: one pass over all panes, reconciled with tracked panes
//! - [`store`]: the persisted [`DaemonState`]
//! - [`daemon`]: start / run / stop / status / detect
//!
//! ## Usage
//!
//! ```rust,no_run
//! use waitmux_daemon::{daemon_status, DaemonConfig, RateLimitDaemon, ShutdownSignal, TmuxPaneSource};
//!
//! # async fn example() -> Result<(), waitmux_daemon::WaitError> {
//! let config = DaemonConfig::default();
//! let source = TmuxPaneSource::from_config(&config);
//!
//! let mut daemon = RateLimitDaemon::new(config.clone(), source);
//! daemon.start()?;
//! daemon.run(ShutdownSignal::new()).await?;
//!
//! let report = daemon_status(&config);
//! println!("running: {}", report.is_running());
//! # Ok(())
//! # }
//! ```
//!
//! ## State Files
//!
//! Stored in `~/.waitmux/state/` unless configured otherwise:
//! - `rate-limit-daemon.json` - daemon state (pid, status, tracked panes)
//! - `rate-limit-daemon.log` - daemon log when running detached

pub mod config;
pub mod daemon;
pub mod detector;
pub mod error;
pub mod monitor;
pub mod process;
pub mod scan;
pub mod store;
pub mod tmux;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::DaemonConfig;
pub use daemon::{
    daemon_status, daemon_status_at, detect_blocked_panes, stop_daemon, RateLimitDaemon,
    ShutdownSignal, StatusReport, TickReport,
};
pub use detector::{BlockDetector, BlockMatch};
pub use error::WaitError;
pub use monitor::{
    aggregate_status, format_rate_limit_status, format_time_until_reset, resolve_status,
};
pub use scan::{PaneFailure, Recovered, RecoveryReason, ScanOutcome, Scanner};
pub use store::StateStore;
pub use tmux::{PaneSource, TmuxPaneSource};
pub use types::{
    BlockedPane, DaemonState, DaemonStatus, PaneCapture, PaneId, PaneRef, RateLimitStatus,
    ResetSource,
};
