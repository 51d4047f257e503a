//! One detection pass over every pane, reconciled with the panes already
//! being tracked.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::detector::{BlockDetector, BlockMatch};
use crate::error::WaitError;
use crate::tmux::PaneSource;
use crate::types::{BlockedPane, PaneCapture, PaneId, PaneRef};

/// Why a pane stopped being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryReason {
    /// Its output no longer shows a block.
    Cleared,
    /// The pane is gone.
    Vanished,
    /// Dropped to make room under the pane cap.
    Evicted,
    /// Could not be captured for too many consecutive scans.
    Stale,
}

impl fmt::Display for RecoveryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cleared => "cleared",
            Self::Vanished => "vanished",
            Self::Evicted => "evicted",
            Self::Stale => "stale",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered {
    pub pane_id: PaneId,
    pub reason: RecoveryReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneFailure {
    pub pane_id: PaneId,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// The reconciled set of blocked panes.
    pub tracked: BTreeMap<PaneId, BlockedPane>,
    pub newly_blocked: Vec<PaneId>,
    pub recovered: Vec<Recovered>,
    /// Per-pane capture failures. They never abort the scan.
    pub failures: Vec<PaneFailure>,
}

impl ScanOutcome {
    fn recover(&mut self, pane_id: &str, reason: RecoveryReason) {
        self.recovered.push(Recovered {
            pane_id: pane_id.to_string(),
            reason,
        });
    }
}

/// One concrete block message on a pane, as last seen.
#[derive(Debug, Clone)]
struct Sighting {
    signature: String,
    occurrences: usize,
    context: String,
}

impl Sighting {
    fn of(found: &BlockMatch) -> Self {
        Self {
            signature: found.signature.clone(),
            occurrences: found.occurrences,
            context: found.context.clone(),
        }
    }

    /// Whether `found` is this message still on screen rather than a new
    /// copy printed below it.
    fn is_same_message(&self, found: &BlockMatch) -> bool {
        self.signature == found.signature
            && self.context == found.context
            && found.occurrences <= self.occurrences
    }
}

pub struct Scanner {
    detector: BlockDetector,
    max_panes: usize,
    capture_max_bytes: usize,
    stale_after_scans: u32,
    /// Block messages already answered with a resume.
    settled: HashMap<PaneId, Sighting>,
    /// Each tracked pane's block message on the latest capture.
    last_seen: HashMap<PaneId, Sighting>,
}

impl Scanner {
    pub fn new(config: &DaemonConfig) -> Self {
        Self {
            detector: BlockDetector::from_config(config),
            max_panes: config.max_panes.max(1),
            capture_max_bytes: config.capture_max_bytes,
            stale_after_scans: config.stale_after_scans,
            settled: HashMap::new(),
            last_seen: HashMap::new(),
        }
    }

    /// Scan all panes and reconcile against `existing`.
    ///
    /// Only a failure to list panes is an error; per-pane problems are
    /// reported in [`ScanOutcome::failures`].
    pub async fn scan<S: PaneSource + ?Sized>(
        &mut self,
        source: &S,
        existing: &BTreeMap<PaneId, BlockedPane>,
    ) -> Result<ScanOutcome, WaitError> {
        let panes = source.list_panes().await?;
        let listed: HashSet<&str> = panes.iter().map(|p| p.pane_id.as_str()).collect();

        let mut outcome = ScanOutcome::default();
        for (id, pane) in existing {
            if listed.contains(id.as_str()) {
                outcome.tracked.insert(id.clone(), pane.clone());
            } else {
                debug!(pane = %id, "Tracked pane no longer exists");
                outcome.recover(id, RecoveryReason::Vanished);
            }
        }
        self.settled.retain(|id, _| listed.contains(id.as_str()));
        self.last_seen
            .retain(|id, _| existing.contains_key(id) && listed.contains(id.as_str()));

        for pane in &panes {
            match source
                .capture_pane(&pane.pane_id, self.capture_max_bytes)
                .await
            {
                Ok(capture) => self.classify(pane, capture, &mut outcome),
                Err(e) if e.is_pane_gone() => {
                    self.settled.remove(&pane.pane_id);
                    if outcome.tracked.remove(&pane.pane_id).is_some() {
                        outcome.recover(&pane.pane_id, RecoveryReason::Vanished);
                    }
                }
                Err(e) => self.record_capture_failure(&pane.pane_id, e, &mut outcome),
            }
        }

        Ok(outcome)
    }

    /// Remember that the block behind `signature` has been answered, so the
    /// same message left on screen is not resumed twice.
    pub fn mark_resumed(&mut self, pane: &BlockedPane) {
        let sighting = self
            .last_seen
            .remove(&pane.pane_id)
            .filter(|seen| seen.signature == pane.signature)
            .unwrap_or_else(|| Sighting {
                signature: pane.signature.clone(),
                occurrences: 1,
                context: String::new(),
            });
        self.settled.insert(pane.pane_id.clone(), sighting);
    }

    fn classify(&mut self, pane: &PaneRef, capture: PaneCapture, outcome: &mut ScanOutcome) {
        let id = &pane.pane_id;
        let Some(found) = self.detector.detect(&capture.text, capture.captured_at) else {
            self.settled.remove(id);
            if outcome.tracked.remove(id).is_some() {
                info!(pane = %id, "Pane no longer rate limited");
                outcome.recover(id, RecoveryReason::Cleared);
            }
            return;
        };

        if let Some(tracked) = outcome.tracked.get_mut(id) {
            self.last_seen.insert(id.clone(), Sighting::of(&found));
            tracked.missed_scans = 0;
            tracked.session_label = pane.session_label.clone();
            tracked.window_index = pane.window_index;
            // The reset only moves when a different block message shows up;
            // re-reading "in 5 minutes" every scan would push it out forever.
            if tracked.signature != found.signature && !tracked.resumed {
                debug!(pane = %id, reset_at = %found.reset_at, "Block message changed");
                apply_match(tracked, found);
            }
            return;
        }

        if let Some(settled) = self.settled.get_mut(id) {
            if settled.is_same_message(&found) {
                // Older copies scrolling away lower the count.
                settled.occurrences = found.occurrences;
                return;
            }
            self.settled.remove(id);
        }

        if outcome.tracked.len() >= self.max_panes {
            let oldest = outcome
                .tracked
                .values()
                .min_by_key(|p| p.detected_at)
                .map(|p| p.pane_id.clone());
            if let Some(oldest) = oldest {
                warn!(
                    evicted = %oldest,
                    pane = %id,
                    max_panes = self.max_panes,
                    "Tracked pane limit reached, evicting oldest"
                );
                outcome.tracked.remove(&oldest);
                outcome.recover(&oldest, RecoveryReason::Evicted);
            }
        }

        info!(
            pane = %id,
            session = %pane.session_label,
            reset_at = %found.reset_at,
            expression = %found.expression,
            "Detected rate-limited pane"
        );
        self.last_seen.insert(id.clone(), Sighting::of(&found));
        let blocked = BlockedPane {
            pane_id: id.clone(),
            session_label: pane.session_label.clone(),
            window_index: pane.window_index,
            detected_at: capture.captured_at,
            reset_at: found.reset_at,
            reset_expression: found.expression,
            reset_source: found.source,
            signature: found.signature,
            resumed: false,
            resume_attempted_at: None,
            missed_scans: 0,
        };
        outcome.tracked.insert(id.clone(), blocked);
        outcome.newly_blocked.push(id.clone());
    }

    fn record_capture_failure(
        &self,
        id: &PaneId,
        error: WaitError,
        outcome: &mut ScanOutcome,
    ) {
        debug!(pane = %id, error = %error, "Capture failed");
        outcome.failures.push(PaneFailure {
            pane_id: id.clone(),
            message: error.to_string(),
        });

        let Some(tracked) = outcome.tracked.get_mut(id) else {
            return;
        };
        tracked.missed_scans += 1;
        if tracked.missed_scans > self.stale_after_scans {
            warn!(
                pane = %id,
                missed = tracked.missed_scans,
                "Dropping pane that keeps failing capture"
            );
            outcome.tracked.remove(id);
            outcome.recover(id, RecoveryReason::Stale);
        }
    }
}

/// `detected_at` belongs to the first sighting and is left alone.
fn apply_match(pane: &mut BlockedPane, found: BlockMatch) {
    pane.reset_at = found.reset_at;
    pane.reset_expression = found.expression;
    pane.reset_source = found.source;
    pane.signature = found.signature;
}
