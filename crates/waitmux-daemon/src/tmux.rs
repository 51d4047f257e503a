//! tmux as the pane source.
//!
//! Every call shells out to the tmux client and is bounded by the configured
//! command timeout. Nothing is cached between calls.

use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tracing::debug;

use crate::config::DaemonConfig;
use crate::error::WaitError;
use crate::types::{PaneCapture, PaneRef};

/// Access to terminal panes: enumerate, read, type into.
#[async_trait]
pub trait PaneSource: Send + Sync {
    /// All panes across all sessions. An absent server is an empty list, not an error.
    async fn list_panes(&self) -> Result<Vec<PaneRef>, WaitError>;

    /// The most recent `max_bytes` of the pane's visible and scrollback text.
    async fn capture_pane(&self, pane_id: &str, max_bytes: usize)
        -> Result<PaneCapture, WaitError>;

    /// Type `sequence` into the pane, one entry at a time.
    async fn send_keys(&self, pane_id: &str, sequence: &[String]) -> Result<(), WaitError>;
}

const LIST_FORMAT: &str = "#{pane_id}\t#{session_name}\t#{window_index}";

#[derive(Debug, Clone)]
pub struct TmuxPaneSource {
    bin: String,
    capture_lines: usize,
    timeout: Duration,
}

enum TmuxFailure {
    Missing(std::io::Error),
    TimedOut,
    Exit { code: Option<i32>, stderr: String },
}

impl TmuxFailure {
    fn describe(&self) -> String {
        match self {
            Self::Missing(e) => format!("could not run tmux: {}", e),
            Self::TimedOut => "timed out".to_string(),
            Self::Exit { code, stderr } => match code {
                Some(code) => format!("exit status {}: {}", code, stderr.trim()),
                None => format!("terminated by signal: {}", stderr.trim()),
            },
        }
    }

    fn pane_missing(&self) -> bool {
        match self {
            Self::Exit { stderr, .. } => {
                stderr.contains("can't find pane")
                    || stderr.contains("can't find window")
                    || stderr.contains("can't find session")
            }
            _ => false,
        }
    }

    fn no_server(&self) -> bool {
        match self {
            Self::Exit { stderr, .. } => {
                stderr.contains("no server running")
                    || stderr.contains("error connecting to")
                    || stderr.contains("no sessions")
            }
            _ => false,
        }
    }
}

impl TmuxPaneSource {
    pub fn new(bin: impl Into<String>, capture_lines: usize, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            capture_lines,
            timeout,
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(
            config.tmux_bin.clone(),
            config.capture_lines,
            config.command_timeout,
        )
    }

    /// Whether the tmux client can be executed at all.
    pub async fn is_available(&self) -> bool {
        self.run(&["-V"]).await.is_ok()
    }

    async fn run(&self, args: &[&str]) -> Result<Output, TmuxFailure> {
        let child = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Err(_) => return Err(TmuxFailure::TimedOut),
            Ok(Err(e)) => return Err(TmuxFailure::Missing(e)),
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            Ok(output)
        } else {
            Err(TmuxFailure::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }
}

#[async_trait]
impl PaneSource for TmuxPaneSource {
    async fn list_panes(&self) -> Result<Vec<PaneRef>, WaitError> {
        match self.run(&["list-panes", "-a", "-F", LIST_FORMAT]).await {
            Ok(output) => Ok(parse_list_panes(&String::from_utf8_lossy(&output.stdout))),
            Err(failure) if failure.no_server() => {
                debug!("no tmux server running; nothing to scan");
                Ok(Vec::new())
            }
            Err(failure) => Err(WaitError::ToolUnavailable(failure.describe())),
        }
    }

    async fn capture_pane(
        &self,
        pane_id: &str,
        max_bytes: usize,
    ) -> Result<PaneCapture, WaitError> {
        let start = format!("-{}", self.capture_lines);
        let output = self
            .run(&["capture-pane", "-p", "-J", "-t", pane_id, "-S", &start])
            .await
            .map_err(|failure| match failure {
                f if f.pane_missing() => WaitError::PaneNotFound {
                    pane_id: pane_id.to_string(),
                },
                TmuxFailure::Missing(e) => WaitError::ToolUnavailable(e.to_string()),
                f => WaitError::CaptureFailed {
                    pane_id: pane_id.to_string(),
                    reason: f.describe(),
                },
            })?;

        let captured_at = Utc::now();
        let text = String::from_utf8_lossy(&output.stdout);

        Ok(PaneCapture {
            text: tail_bytes(&text, max_bytes).to_string(),
            captured_at,
        })
    }

    async fn send_keys(&self, pane_id: &str, sequence: &[String]) -> Result<(), WaitError> {
        for key in sequence.iter().filter(|k| !k.is_empty()) {
            let mut args = vec!["send-keys", "-t", pane_id];
            if !is_key_name(key) {
                // "--" keeps text such as "-y" from being read as a flag.
                args.extend(["-l", "--"]);
            }
            args.push(key.as_str());

            self.run(&args).await.map_err(|failure| {
                if failure.pane_missing() {
                    WaitError::PaneNotFound {
                        pane_id: pane_id.to_string(),
                    }
                } else {
                    WaitError::SendFailed {
                        pane_id: pane_id.to_string(),
                        reason: failure.describe(),
                    }
                }
            })?;
        }
        Ok(())
    }
}

/// Parse `list-panes -F "#{pane_id}\t#{session_name}\t#{window_index}"` output.
pub fn parse_list_panes(stdout: &str) -> Vec<PaneRef> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let pane_id = parts.next()?.trim();
            let session = parts.next()?;
            let window = parts.next()?.trim();
            if !pane_id.starts_with('%') {
                return None;
            }
            Some(PaneRef {
                pane_id: pane_id.to_string(),
                session_label: session.to_string(),
                window_index: window.parse().unwrap_or(0),
            })
        })
        .collect()
}

/// The last `max_bytes` of `text`, moved forward to a char boundary.
pub fn tail_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

const NAMED_KEYS: &[&str] = &[
    "Enter", "Escape", "Tab", "BTab", "Space", "BSpace", "Up", "Down", "Left", "Right", "Home",
    "End", "PageUp", "PageDown", "PPage", "NPage", "DC", "IC",
];

/// tmux key names are sent as keys; everything else is typed literally.
pub fn is_key_name(key: &str) -> bool {
    if NAMED_KEYS.contains(&key) {
        return true;
    }
    if let Some(n) = key.strip_prefix('F') {
        return matches!(n.parse::<u8>(), Ok(1..=12));
    }
    ["C-", "M-", "S-"]
        .iter()
        .any(|prefix| key.len() > prefix.len() && key.starts_with(prefix))
}
