use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::blacklist::{Blacklist, BlacklistSnapshot};
use crate::cancellation::{CancelReport, CancellationBatch, MarkForRemoval, PositionCloser};
use crate::config::EngineConfig;
use crate::models::{ConcludedTrade, GridSnapshot, StrategySnapshot};
use crate::notify::Notifier;
use crate::ranking::{self, RankedStrategy, TrackedStrategies, WinLossBundle};
use crate::tracker::{GridTracker, TrackedGrid};

/// What one `observe_tick` call did
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TickSummary {
    pub observed: Vec<i64>,
    /// No longer reported open, tracking dropped
    pub removed: Vec<i64>,
    pub out_of_range: Vec<i64>,
    /// Reported open but no market price for the symbol, left untouched this tick
    pub missing_price: Vec<i64>,
}

/// Everything the engine carries between process restarts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineState {
    pub grids: Vec<TrackedGrid>,
    pub blacklist: BlacklistSnapshot,
    pub marks: MarkForRemoval,
}

/// Tracking, ranking and cancellation state for one account
///
/// Constructed by the orchestrator and driven once per tick.
pub struct Engine {
    config: EngineConfig,
    tracker: GridTracker,
    blacklist: Arc<Blacklist>,
    marks: MarkForRemoval,
    notifier: Arc<dyn Notifier>,
}

impl Engine {
    pub fn new(config: EngineConfig, notifier: Arc<dyn Notifier>) -> Self {
        let tracker = GridTracker::new(config.tracker.sample_retention());
        let blacklist = Arc::new(Blacklist::new(notifier.clone()));
        Self {
            config,
            tracker,
            blacklist,
            marks: MarkForRemoval::new(),
            notifier,
        }
    }

    /// Rebuild an engine from persisted state; expired blacklist entries are dropped
    pub fn restore(config: EngineConfig, state: EngineState, notifier: Arc<dyn Notifier>, now: DateTime<Utc>) -> Self {
        let tracker = GridTracker::from_grids(state.grids, config.tracker.sample_retention());
        let blacklist = Arc::new(Blacklist::from_snapshot(state.blacklist, notifier.clone(), now));
        Self {
            config,
            tracker,
            blacklist,
            marks: state.marks,
            notifier,
        }
    }

    pub fn state(&self) -> EngineState {
        EngineState {
            grids: self.tracker.grids().cloned().collect(),
            blacklist: self.blacklist.snapshot(),
            marks: self.marks.clone(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tracker(&self) -> &GridTracker {
        &self.tracker
    }

    /// Shared handle for background lookups
    pub fn blacklist(&self) -> Arc<Blacklist> {
        self.blacklist.clone()
    }

    pub fn marks(&self) -> &MarkForRemoval {
        &self.marks
    }

    pub fn mark_for_removal(&mut self, position_id: i64, floor: f64, reason: &str) -> f64 {
        let stored = self.marks.mark(position_id, floor);
        self.notifier.info(&format!(
            "Grid #{} marked for removal (floor {:.2}%): {}",
            position_id,
            stored * 100.0,
            reason
        ));
        stored
    }

    /// Fold a full snapshot of open grids into the tracker
    ///
    /// Grids missing from `grids` are dropped along with their removal marks.
    pub fn observe_tick(
        &mut self,
        grids: Vec<GridSnapshot>,
        prices: &HashMap<String, f64>,
        track_continuous: bool,
        now: DateTime<Utc>,
    ) -> TickSummary {
        let mut summary = TickSummary::default();

        let open: HashSet<i64> = grids.iter().map(|g| g.position_id).collect();
        summary.removed = self.tracker.reconcile(&open);
        for id in &summary.removed {
            self.marks.clear(*id);
            self.notifier.info(&format!("Grid #{} is closed, stopped tracking", id));
        }

        for snapshot in grids {
            let id = snapshot.position_id;
            match prices.get(&snapshot.symbol) {
                Some(&price) => {
                    self.tracker.observe_at(snapshot, price, track_continuous, now);
                    summary.observed.push(id);
                }
                None => {
                    tracing::warn!(position_id = id, symbol = %snapshot.symbol, "No market price, skipping grid this tick");
                    summary.missing_price.push(id);
                }
            }
        }

        summary.out_of_range = self.tracker.out_of_range();

        tracing::info!(
            "Tick: {} observed, {} removed, {} out of range, {} without price",
            summary.observed.len(),
            summary.removed.len(),
            summary.out_of_range.len(),
            summary.missing_price.len()
        );
        summary
    }

    pub fn plan_cancellations(&self, now: DateTime<Utc>) -> CancellationBatch {
        self.config
            .policy
            .plan(&self.tracker, &self.blacklist, &self.marks, now)
    }

    /// Run a batch against the exchange
    ///
    /// Each successful close clears the grid's removal mark and, with a cooldown
    /// configured, blocks its symbol+direction.
    pub async fn execute(
        &mut self,
        batch: &mut CancellationBatch,
        closer: &dyn PositionCloser,
        now: DateTime<Utc>,
    ) -> CancelReport {
        let report = batch
            .cancel_all(&self.tracker, closer, self.notifier.as_ref())
            .await;

        for id in &report.cancelled {
            self.marks.clear(*id);

            let (Some(cooldown), Some(grid)) = (self.config.policy.cooldown(), self.tracker.get(*id)) else {
                continue;
            };
            self.blacklist.add_by_symbol_direction_at(
                grid.symbol(),
                grid.direction(),
                cooldown,
                &format!("cooldown after cancelling grid #{}", id),
                now,
            );
        }

        if report.has_failures() {
            tracing::warn!(
                "{} of {} cancellations failed: {:?}",
                report.failures.len(),
                batch.len(),
                report.failed_ids()
            );
        }
        report
    }

    /// Pre-sort by ROI and build the ranking view
    pub fn rank_strategies(&self, strategies: Vec<StrategySnapshot>) -> TrackedStrategies {
        ranking::to_tracked(ranking::sort_by_roi_desc(strategies))
    }

    pub fn openable<'a>(&self, tracked: &'a TrackedStrategies, now: DateTime<Utc>) -> Vec<&'a RankedStrategy> {
        ranking::select_openable(tracked, &self.blacklist, self.config.scoring.max_cohort_rank, now)
    }

    pub fn score_trades(&self, trades: &[ConcludedTrade]) -> BTreeMap<i64, WinLossBundle> {
        ranking::score_all(trades, &self.config.scoring.win_loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancelPolicy;
    use crate::models::Direction;
    use crate::notify::MemoryNotifier;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    struct AlwaysClose;

    #[async_trait]
    impl PositionCloser for AlwaysClose {
        async fn close_position(&self, _grid: &TrackedGrid) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn grid(id: i64, symbol: &str, realized: &str) -> GridSnapshot {
        GridSnapshot {
            position_id: id,
            strategy_id: id * 10,
            symbol: symbol.to_string(),
            direction: Direction::Long,
            leverage: 2,
            realized_profit: realized.to_string(),
            funding_fee: "0".to_string(),
            position_size: "0".to_string(),
            entry_price: "10".to_string(),
            lower_price: "8".to_string(),
            upper_price: "12".to_string(),
            initial_value: "200".to_string(),
        }
    }

    fn prices() -> HashMap<String, f64> {
        HashMap::from([("BTCUSDT".to_string(), 10.0), ("ETHUSDT".to_string(), 13.0)])
    }

    fn engine(policy: CancelPolicy) -> (Engine, Arc<MemoryNotifier>) {
        let notifier = Arc::new(MemoryNotifier::default());
        let config = EngineConfig {
            policy,
            ..EngineConfig::default()
        };
        (Engine::new(config, notifier.clone()), notifier)
    }

    #[test]
    fn test_observe_tick_summary() {
        let (mut engine, _) = engine(CancelPolicy::default());
        let summary = engine.observe_tick(
            vec![grid(1, "BTCUSDT", "1"), grid(2, "ETHUSDT", "1"), grid(3, "SOLUSDT", "1")],
            &prices(),
            true,
            t0(),
        );

        assert_eq!(summary.observed, vec![1, 2]);
        assert_eq!(summary.missing_price, vec![3]);
        assert_eq!(summary.out_of_range, vec![2]);
        assert!(!engine.tracker().contains(3));

        let summary = engine.observe_tick(vec![grid(2, "ETHUSDT", "1")], &prices(), true, t0());
        assert_eq!(summary.removed, vec![1]);
        assert_eq!(engine.tracker().len(), 1);
    }

    #[test]
    fn test_removed_grid_drops_its_mark() {
        let (mut engine, notifier) = engine(CancelPolicy::default());
        engine.observe_tick(vec![grid(1, "BTCUSDT", "0")], &prices(), true, t0());
        engine.mark_for_removal(1, -0.02, "manual");
        assert_eq!(engine.marks().floor(1), Some(-0.02));

        engine.observe_tick(Vec::new(), &prices(), true, t0());
        assert!(engine.marks().is_empty());
        assert!(notifier.messages().iter().any(|m| m.contains("stopped tracking")));
    }

    #[tokio::test]
    async fn test_execute_applies_cooldown() {
        let policy = CancelPolicy {
            take_profit_roi: Some(0.05),
            cooldown_after_cancel_secs: Some(1800),
            ..CancelPolicy::default()
        };
        let (mut engine, _) = engine(policy);
        // initial 200 / 2 = 100, realized 6 → ROI 6%
        engine.observe_tick(vec![grid(1, "BTCUSDT", "6")], &prices(), true, t0());
        engine.mark_for_removal(1, -0.5, "manual");

        let mut batch = engine.plan_cancellations(t0());
        let report = engine.execute(&mut batch, &AlwaysClose, t0()).await;

        assert_eq!(report.cancelled, vec![1]);
        assert!(engine.marks().is_empty());
        let (blocked, till) = engine
            .blacklist()
            .is_blocked_by_symbol_direction_at("BTCUSDT", Direction::Long, t0());
        assert!(blocked);
        assert_eq!(till, Some(t0() + Duration::minutes(30)));
    }

    #[tokio::test]
    async fn test_longest_cooldown_saturates() {
        let policy = CancelPolicy {
            cooldown_after_cancel_secs: Some(i64::MAX / 1000),
            ..CancelPolicy::default()
        };
        assert!(policy.validate().is_ok());
        let (mut engine, _) = engine(policy);
        engine.observe_tick(vec![grid(1, "BTCUSDT", "1")], &prices(), true, t0());
        engine.mark_for_removal(1, -0.5, "manual");

        let mut batch = engine.plan_cancellations(t0());
        let report = engine.execute(&mut batch, &AlwaysClose, t0()).await;

        assert_eq!(report.cancelled, vec![1]);
        let (blocked, till) = engine
            .blacklist()
            .is_blocked_by_symbol_direction_at("BTCUSDT", Direction::Long, t0());
        assert!(blocked);
        assert_eq!(till, Some(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_state_round_trip_restores_tracking() {
        let (mut engine, notifier) = engine(CancelPolicy::default());
        engine.observe_tick(vec![grid(1, "BTCUSDT", "4")], &prices(), true, t0());
        engine.mark_for_removal(1, -0.01, "manual");
        engine
            .blacklist()
            .add_by_symbol_at("ETHUSDT", Duration::hours(2), "listing review", t0());

        let json = serde_json::to_string(&engine.state()).unwrap();
        let state: EngineState = serde_json::from_str(&json).unwrap();
        let restored = Engine::restore(EngineConfig::default(), state, notifier, t0() + Duration::hours(1));

        assert_eq!(restored.tracker().get(1).unwrap().last_roi, 0.04);
        assert_eq!(restored.marks().floor(1), Some(-0.01));
        assert!(restored.blacklist().is_blocked_by_symbol_at("ETHUSDT", t0() + Duration::hours(1)).0);
    }
}
