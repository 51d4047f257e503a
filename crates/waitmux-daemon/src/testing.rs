//! In-memory pane source for tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::WaitError;
use crate::tmux::PaneSource;
use crate::types::{PaneCapture, PaneRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    /// Behaves as if the pane closed in between.
    Gone,
    /// Any other tmux failure.
    Broken,
}

#[derive(Debug)]
struct FakePane {
    pane: PaneRef,
    text: String,
    capture_failure: Option<Failure>,
}

#[derive(Debug)]
struct Inner {
    panes: BTreeMap<String, FakePane>,
    now: DateTime<Utc>,
    sent: Vec<(String, Vec<String>)>,
    send_failures: HashMap<String, Failure>,
    list_fails: bool,
}

#[derive(Debug)]
pub(crate) struct FakePaneSource {
    inner: Mutex<Inner>,
}

impl FakePaneSource {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                panes: BTreeMap::new(),
                now,
                sent: Vec::new(),
                send_failures: HashMap::new(),
                list_fails: false,
            }),
        }
    }

    pub fn add_pane(&self, pane_id: &str, session: &str, text: &str) {
        self.inner.lock().panes.insert(
            pane_id.to_string(),
            FakePane {
                pane: PaneRef {
                    pane_id: pane_id.to_string(),
                    session_label: session.to_string(),
                    window_index: 0,
                },
                text: text.to_string(),
                capture_failure: None,
            },
        );
    }

    pub fn set_text(&self, pane_id: &str, text: &str) {
        if let Some(p) = self.inner.lock().panes.get_mut(pane_id) {
            p.text = text.to_string();
        }
    }

    pub fn append_text(&self, pane_id: &str, text: &str) {
        if let Some(p) = self.inner.lock().panes.get_mut(pane_id) {
            p.text.push('\n');
            p.text.push_str(text);
        }
    }

    pub fn remove_pane(&self, pane_id: &str) {
        self.inner.lock().panes.remove(pane_id);
    }

    pub fn fail_capture(&self, pane_id: &str, failure: Option<Failure>) {
        if let Some(p) = self.inner.lock().panes.get_mut(pane_id) {
            p.capture_failure = failure;
        }
    }

    pub fn fail_send(&self, pane_id: &str, failure: Failure) {
        self.inner
            .lock()
            .send_failures
            .insert(pane_id.to_string(), failure);
    }

    pub fn fail_list(&self, fails: bool) {
        self.inner.lock().list_fails = fails;
    }

    /// Capture timestamp reported from now on.
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.inner.lock().now = now;
    }

    pub fn sent(&self) -> Vec<(String, Vec<String>)> {
        self.inner.lock().sent.clone()
    }
}

#[async_trait]
impl PaneSource for FakePaneSource {
    async fn list_panes(&self) -> Result<Vec<PaneRef>, WaitError> {
        let inner = self.inner.lock();
        if inner.list_fails {
            return Err(WaitError::ToolUnavailable("server exploded".to_string()));
        }
        Ok(inner.panes.values().map(|p| p.pane.clone()).collect())
    }

    async fn capture_pane(
        &self,
        pane_id: &str,
        _max_bytes: usize,
    ) -> Result<PaneCapture, WaitError> {
        let inner = self.inner.lock();
        let pane = inner.panes.get(pane_id).ok_or_else(|| WaitError::PaneNotFound {
            pane_id: pane_id.to_string(),
        })?;
        match pane.capture_failure {
            Some(Failure::Gone) => Err(WaitError::PaneNotFound {
                pane_id: pane_id.to_string(),
            }),
            Some(Failure::Broken) => Err(WaitError::CaptureFailed {
                pane_id: pane_id.to_string(),
                reason: "exit status 1".to_string(),
            }),
            None => Ok(PaneCapture {
                text: pane.text.clone(),
                captured_at: inner.now,
            }),
        }
    }

    async fn send_keys(&self, pane_id: &str, sequence: &[String]) -> Result<(), WaitError> {
        let mut inner = self.inner.lock();
        match inner.send_failures.get(pane_id) {
            Some(Failure::Gone) => {
                return Err(WaitError::PaneNotFound {
                    pane_id: pane_id.to_string(),
                })
            }
            Some(Failure::Broken) => {
                return Err(WaitError::SendFailed {
                    pane_id: pane_id.to_string(),
                    reason: "exit status 1".to_string(),
                })
            }
            None => {}
        }
        if !inner.panes.contains_key(pane_id) {
            return Err(WaitError::PaneNotFound {
                pane_id: pane_id.to_string(),
            });
        }
        inner.sent.push((pane_id.to_string(), sequence.to_vec()));
        Ok(())
    }
}
