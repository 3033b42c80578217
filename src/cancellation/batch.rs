use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::EngineError;
use crate::notify::Notifier;
use crate::tracker::{GridTracker, TrackedGrid};

/// Issues the actual close-position request to the exchange
#[async_trait]
pub trait PositionCloser: Send + Sync {
    async fn close_position(&self, grid: &TrackedGrid) -> anyhow::Result<()>;
}

/// Positions flagged for removal, each with the lowest floor it was flagged at
///
/// Survives across ticks until the position is closed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarkForRemoval {
    marks: BTreeMap<i64, f64>,
}

impl MarkForRemoval {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag a position. Returns the floor now stored, which never rises.
    pub fn mark(&mut self, position_id: i64, floor: f64) -> f64 {
        let stored = self.marks.entry(position_id).or_insert(floor);
        *stored = stored.min(floor);
        *stored
    }

    pub fn floor(&self, position_id: i64) -> Option<f64> {
        self.marks.get(&position_id).copied()
    }

    pub fn clear(&mut self, position_id: i64) -> bool {
        self.marks.remove(&position_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.marks.iter().map(|(&id, &floor)| (id, floor))
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

/// One position the engine wants closed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GridToCancel {
    pub grid_id: i64,
    /// Cancellation floor: the close proceeds only once ROI is at or above it
    pub max_loss_threshold: f64,
    pub reasons: Vec<String>,
    pub cancelled: bool,
}

impl GridToCancel {
    pub fn new(grid_id: i64, max_loss_threshold: f64, reason: impl Into<String>) -> Self {
        Self {
            grid_id,
            max_loss_threshold,
            reasons: vec![reason.into()],
            cancelled: false,
        }
    }

    fn merge(&mut self, max_loss_threshold: f64, reason: impl Into<String>) {
        self.max_loss_threshold = self.max_loss_threshold.min(max_loss_threshold);
        self.reasons.push(reason.into());
    }

    pub fn can_cancel(&self, last_roi: f64) -> bool {
        last_roi >= self.max_loss_threshold
    }
}

/// Audit record of one candidate, as handed to persistence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancellationOutcome {
    pub position_id: i64,
    pub cancelled: bool,
    pub reasons: Vec<String>,
}

/// What one `cancel_all` pass did
#[derive(Debug, Default)]
pub struct CancelReport {
    pub cancelled: Vec<i64>,
    /// ROI below the cancel floor
    pub skipped: Vec<i64>,
    /// Closed by an earlier pass
    pub already_cancelled: Vec<i64>,
    /// No longer in the tracker
    pub untracked: Vec<i64>,
    pub failures: Vec<(i64, EngineError)>,
}

impl CancelReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<i64> {
        self.failures.iter().map(|(id, _)| *id).collect()
    }
}

/// Cancellation candidates of one tick, keyed by position id
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CancellationBatch {
    candidates: BTreeMap<i64, GridToCancel>,
}

impl CancellationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reason to cancel a grid. The stored floor is the minimum of all
    /// floors offered and every reason is kept in order.
    pub fn add_candidate(&mut self, grid_id: i64, max_loss_threshold: f64, reason: impl Into<String>) {
        match self.candidates.get_mut(&grid_id) {
            Some(candidate) => candidate.merge(max_loss_threshold, reason),
            None => {
                self.candidates
                    .insert(grid_id, GridToCancel::new(grid_id, max_loss_threshold, reason));
            }
        }
    }

    pub fn get(&self, grid_id: i64) -> Option<&GridToCancel> {
        self.candidates.get(&grid_id)
    }

    pub fn candidates(&self) -> impl Iterator<Item = &GridToCancel> {
        self.candidates.values()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn has_cancelled(&self) -> bool {
        self.candidates.values().any(|c| c.cancelled)
    }

    pub fn cancelled_ids(&self) -> HashSet<i64> {
        self.candidates
            .values()
            .filter(|c| c.cancelled)
            .map(|c| c.grid_id)
            .collect()
    }

    pub fn outcomes(&self) -> Vec<CancellationOutcome> {
        self.candidates
            .values()
            .map(|c| CancellationOutcome {
                position_id: c.grid_id,
                cancelled: c.cancelled,
                reasons: c.reasons.clone(),
            })
            .collect()
    }

    /// Close every candidate whose ROI has reached its floor
    ///
    /// A failed close leaves the candidate uncancelled so a later pass retries it,
    /// and the remaining candidates are still processed.
    pub async fn cancel_all(
        &mut self,
        tracker: &GridTracker,
        closer: &dyn PositionCloser,
        notifier: &dyn Notifier,
    ) -> CancelReport {
        let mut report = CancelReport::default();

        for candidate in self.candidates.values_mut() {
            let id = candidate.grid_id;
            let reasons = candidate.reasons.join("; ");

            if candidate.cancelled {
                notifier.info(&format!("Grid #{} already cancelled. Reasons: {}", id, reasons));
                report.already_cancelled.push(id);
                continue;
            }

            let Some(grid) = tracker.get(id) else {
                notifier.skip(&format!("Grid #{} is no longer tracked, not cancelling. Reasons: {}", id, reasons));
                report.untracked.push(id);
                continue;
            };

            if !candidate.can_cancel(grid.last_roi) {
                notifier.skip(&format!(
                    "Not cancelling {}: ROI {:.2}% is below the cancel floor {:.2}%. Reasons: {}",
                    grid,
                    grid.last_roi * 100.0,
                    candidate.max_loss_threshold * 100.0,
                    reasons
                ));
                report.skipped.push(id);
                continue;
            }

            match closer.close_position(grid).await {
                Ok(()) => {
                    candidate.cancelled = true;
                    tracing::info!(position_id = id, "Cancelled grid");
                    notifier.action(&format!("Cancelled {}. Reasons: {}", grid, reasons));
                    report.cancelled.push(id);
                }
                Err(source) => {
                    let err = EngineError::CloseFailed {
                        position_id: id,
                        source,
                    };
                    tracing::warn!(position_id = id, "{}", err);
                    notifier.warning(&format!("{}. Reasons: {}", err, reasons));
                    report.failures.push((id, err));
                }
            }
        }

        report
    }
}
