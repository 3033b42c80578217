use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{CancellationBatch, MarkForRemoval};
use crate::blacklist::Blacklist;
use crate::config::checked_seconds;
use crate::error::EngineError;
use crate::tracker::{GridTracker, TrackedGrid};

/// Rules that turn tracker state into cancellation candidates
///
/// Every rule that fires adds one reason and one floor for the grid. The ROI rules
/// are off until a threshold is configured, so a config file turns a rule off by
/// leaving its key out. A zero cooldown disables the post-cancel block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CancelPolicy {
    /// Close once ROI reaches this
    pub take_profit_roi: Option<f64>,
    /// ROI must not have dipped below the take-profit level for this long
    pub take_profit_hold_secs: i64,
    /// Close when ROI falls this far from its high...
    pub trailing_giveback: Option<f64>,
    /// ...once the high has exceeded this
    pub trailing_activation: f64,
    pub max_continuous_loss: Option<u32>,
    /// Close when ROI has not moved for this long
    pub stale_after_secs: Option<i64>,
    pub cancel_out_of_range: bool,
    /// Floor for loss-driven rules
    pub loss_floor: f64,
    /// Floor for profit-driven rules
    pub profit_floor: f64,
    /// Floor for grids hit by a blacklist entry
    pub blacklist_floor: f64,
    /// Block the symbol+direction this long after a successful cancel
    pub cooldown_after_cancel_secs: Option<i64>,
}

impl Default for CancelPolicy {
    fn default() -> Self {
        Self {
            take_profit_roi: None,
            take_profit_hold_secs: 0,
            trailing_giveback: None,
            trailing_activation: 0.03,
            max_continuous_loss: None,
            stale_after_secs: None,
            cancel_out_of_range: false,
            loss_floor: -0.05,
            profit_floor: 0.0,
            blacklist_floor: -0.10,
            cooldown_after_cancel_secs: Some(3600),
        }
    }
}

impl CancelPolicy {
    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some(giveback) = self.trailing_giveback {
            if giveback <= 0.0 {
                return Err(EngineError::Config(format!(
                    "policy.trailing_giveback must be positive, got {}",
                    giveback
                )));
            }
        }
        if self.take_profit_hold_secs < 0 {
            return Err(EngineError::Config("policy.take_profit_hold_secs is negative".to_string()));
        }
        checked_seconds("policy.take_profit_hold_secs", self.take_profit_hold_secs)?;
        if let Some(secs) = self.stale_after_secs {
            if secs <= 0 {
                return Err(EngineError::Config("policy.stale_after_secs must be positive".to_string()));
            }
            checked_seconds("policy.stale_after_secs", secs)?;
        }
        if let Some(secs) = self.cooldown_after_cancel_secs {
            if secs < 0 {
                return Err(EngineError::Config(
                    "policy.cooldown_after_cancel_secs is negative".to_string(),
                ));
            }
            checked_seconds("policy.cooldown_after_cancel_secs", secs)?;
        }
        if self.max_continuous_loss == Some(0) {
            return Err(EngineError::Config("policy.max_continuous_loss must be at least 1".to_string()));
        }
        Ok(())
    }

    /// `None` when unset, zero or beyond what a duration can hold
    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown_after_cancel_secs
            .filter(|secs| *secs > 0)
            .and_then(Duration::try_seconds)
    }

    /// Build this tick's cancellation batch
    ///
    /// Marked positions are always included, tracked or not, so the batch
    /// reports on them.
    pub fn plan(
        &self,
        tracker: &GridTracker,
        blacklist: &Blacklist,
        marks: &MarkForRemoval,
        now: DateTime<Utc>,
    ) -> CancellationBatch {
        let mut batch = CancellationBatch::new();

        for grid in tracker.grids() {
            self.evaluate(grid, blacklist, now, &mut batch);
        }

        for (id, floor) in marks.iter() {
            batch.add_candidate(id, floor, "marked for removal");
        }

        if !batch.is_empty() {
            tracing::info!(
                "Planned {} cancellation candidates out of {} grids",
                batch.len(),
                tracker.len()
            );
        }
        batch
    }

    fn evaluate(&self, grid: &TrackedGrid, blacklist: &Blacklist, now: DateTime<Utc>, batch: &mut CancellationBatch) {
        let id = grid.position_id();

        if let Some(block) = blacklist.check_grid(id, grid.symbol(), grid.direction(), now) {
            batch.add_candidate(
                id,
                self.blacklist_floor,
                format!(
                    "{} blacklisted until {}: {}",
                    block.tier,
                    block.till.format("%Y-%m-%d %H:%M"),
                    block.reason
                ),
            );
        }

        if let Some(target) = self.take_profit_roi {
            let hold = Duration::try_seconds(self.take_profit_hold_secs).unwrap_or(Duration::MAX);
            if grid.last_roi >= target && grid.no_dip_within(hold, target, now) {
                batch.add_candidate(
                    id,
                    self.profit_floor,
                    format!(
                        "ROI {:.2}% reached take profit {:.2}%",
                        grid.last_roi * 100.0,
                        target * 100.0
                    ),
                );
            }
        }

        if let Some(giveback) = self.trailing_giveback {
            let given_back = grid.highest_roi - grid.last_roi;
            if grid.highest_roi > self.trailing_activation && given_back >= giveback {
                batch.add_candidate(
                    id,
                    self.loss_floor,
                    format!(
                        "ROI {:.2}% gave back {:.2}% from high {:.2}%",
                        grid.last_roi * 100.0,
                        given_back * 100.0,
                        grid.highest_roi * 100.0
                    ),
                );
            }
        }

        if let Some(limit) = self.max_continuous_loss {
            if grid.continuous_loss >= limit {
                batch.add_candidate(
                    id,
                    self.loss_floor,
                    format!("ROI fell {} ticks in a row", grid.continuous_loss),
                );
            }
        }

        if let Some(window) = self.stale_after_secs.and_then(Duration::try_seconds) {
            let unchanged = grid.unchanged_for(now);
            if unchanged >= window {
                batch.add_candidate(
                    id,
                    self.loss_floor,
                    format!("ROI unchanged for {}h", unchanged.num_hours()),
                );
            }
        }

        if self.cancel_out_of_range && !grid.within_range() {
            batch.add_candidate(
                id,
                self.loss_floor,
                format!(
                    "price {} outside grid range ({}, {})",
                    grid.market_price, grid.lower_price, grid.upper_price
                ),
            );
        }
    }
}
