use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{parse_decimal, Direction, StrategySnapshot};

/// Min or max of each ranked metric across a snapshot
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricBundle {
    pub copy_count: u32,
    pub roi: f64,
    pub pnl: f64,
    pub running_time: i64,
    pub matched_count: u32,
    pub last_day_matched_count: u32,
}

impl MetricBundle {
    fn of(strategy: &StrategySnapshot, roi: f64, pnl: f64) -> Self {
        Self {
            copy_count: strategy.copy_count,
            roi,
            pnl,
            running_time: strategy.running_time,
            matched_count: strategy.matched_count,
            last_day_matched_count: strategy.last_day_matched_count,
        }
    }

    fn raise_to(&mut self, other: &MetricBundle) {
        self.copy_count = self.copy_count.max(other.copy_count);
        self.roi = self.roi.max(other.roi);
        self.pnl = self.pnl.max(other.pnl);
        self.running_time = self.running_time.max(other.running_time);
        self.matched_count = self.matched_count.max(other.matched_count);
        self.last_day_matched_count = self.last_day_matched_count.max(other.last_day_matched_count);
    }

    fn lower_to(&mut self, other: &MetricBundle) {
        self.copy_count = self.copy_count.min(other.copy_count);
        self.roi = self.roi.min(other.roi);
        self.pnl = self.pnl.min(other.pnl);
        self.running_time = self.running_time.min(other.running_time);
        self.matched_count = self.matched_count.min(other.matched_count);
        self.last_day_matched_count = self.last_day_matched_count.min(other.last_day_matched_count);
    }
}

/// A deduplicated strategy with its parsed figures and position in the ordering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedStrategy {
    pub snapshot: StrategySnapshot,
    pub roi: f64,
    pub pnl: f64,
    pub rank: usize,
    pub cohort_rank: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CohortCount {
    pub symbol: String,
    pub direction: Direction,
    pub count: usize,
}

/// Serializable summary handed to the persistence collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankingReport {
    pub strategies: Vec<RankedStrategy>,
    pub cohorts: Vec<CohortCount>,
    pub highest: MetricBundle,
    pub lowest: MetricBundle,
    pub duplicates_dropped: usize,
}

type CohortKey = (String, Direction);

/// Immutable view over one snapshot of candidate strategies
///
/// Built in a single pass. The first record seen for an id wins, so callers that
/// pre-sort by ROI (see [`sort_by_roi_desc`]) keep the best-performing copy.
#[derive(Debug, Clone, Default)]
pub struct TrackedStrategies {
    strategies: Vec<RankedStrategy>,
    index: HashMap<i64, usize>,
    by_user: HashMap<i64, Vec<usize>>,
    by_symbol: HashMap<String, Vec<usize>>,
    by_symbol_direction: HashMap<CohortKey, Vec<usize>>,
    cohorts: Vec<CohortKey>,
    cohort_order: HashMap<CohortKey, usize>,
    highest: MetricBundle,
    lowest: MetricBundle,
    duplicates: usize,
}

impl TrackedStrategies {
    pub fn from_snapshot(snapshot: Vec<StrategySnapshot>) -> Self {
        let mut tracked = Self::default();

        for strategy in snapshot {
            if tracked.index.contains_key(&strategy.strategy_id) {
                tracked.duplicates += 1;
                continue;
            }

            let roi = parse_decimal("roi", &strategy.roi);
            let pnl = parse_decimal("pnl", &strategy.pnl);
            let metrics = MetricBundle::of(&strategy, roi, pnl);

            let position = tracked.strategies.len();
            if position == 0 {
                tracked.highest = metrics;
                tracked.lowest = metrics;
            } else {
                tracked.highest.raise_to(&metrics);
                tracked.lowest.lower_to(&metrics);
            }

            let key = (strategy.symbol.clone(), strategy.direction);
            let next_cohort = tracked.cohorts.len();
            let cohort_rank = *tracked.cohort_order.entry(key.clone()).or_insert(next_cohort);
            if cohort_rank == next_cohort {
                tracked.cohorts.push(key.clone());
            }

            tracked.index.insert(strategy.strategy_id, position);
            tracked.by_user.entry(strategy.user_id).or_default().push(position);
            tracked
                .by_symbol
                .entry(strategy.symbol.clone())
                .or_default()
                .push(position);
            tracked.by_symbol_direction.entry(key).or_default().push(position);

            tracked.strategies.push(RankedStrategy {
                snapshot: strategy,
                roi,
                pnl,
                rank: position,
                cohort_rank,
            });
        }

        if tracked.duplicates > 0 {
            tracing::debug!(
                "Dropped {} duplicate strategy records, {} unique",
                tracked.duplicates,
                tracked.strategies.len()
            );
        }

        tracked
    }

    pub fn exists(&self, strategy_id: i64) -> bool {
        self.index.contains_key(&strategy_id)
    }

    pub fn get(&self, strategy_id: i64) -> Option<&RankedStrategy> {
        self.index.get(&strategy_id).map(|&i| &self.strategies[i])
    }

    /// Zero-based position in the deduplicated ordering
    pub fn rank(&self, strategy_id: i64) -> Option<usize> {
        self.index.get(&strategy_id).copied()
    }

    /// How many distinct symbol+direction cohorts first appear ahead of this
    /// strategy's cohort, or -1 when the cohort was never seen
    pub fn rank_within_symbol_direction(&self, strategy: &StrategySnapshot) -> i32 {
        self.cohort_order
            .get(&(strategy.symbol.clone(), strategy.direction))
            .map(|&rank| rank as i32)
            .unwrap_or(-1)
    }

    pub fn cohort_size(&self, symbol: &str, direction: Direction) -> usize {
        self.by_symbol_direction
            .get(&(symbol.to_string(), direction))
            .map(|members| members.len())
            .unwrap_or(0)
    }

    pub fn by_user(&self, user_id: i64) -> Vec<&RankedStrategy> {
        self.members(self.by_user.get(&user_id))
    }

    pub fn by_symbol(&self, symbol: &str) -> Vec<&RankedStrategy> {
        self.members(self.by_symbol.get(symbol))
    }

    pub fn by_symbol_direction(&self, symbol: &str, direction: Direction) -> Vec<&RankedStrategy> {
        self.members(self.by_symbol_direction.get(&(symbol.to_string(), direction)))
    }

    fn members(&self, positions: Option<&Vec<usize>>) -> Vec<&RankedStrategy> {
        positions
            .map(|p| p.iter().map(|&i| &self.strategies[i]).collect())
            .unwrap_or_default()
    }

    pub fn strategies(&self) -> &[RankedStrategy] {
        &self.strategies
    }

    pub fn user_ids(&self) -> Vec<i64> {
        let mut users: Vec<i64> = self.by_user.keys().copied().collect();
        users.sort_unstable();
        users
    }

    pub fn highest(&self) -> &MetricBundle {
        &self.highest
    }

    pub fn lowest(&self) -> &MetricBundle {
        &self.lowest
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn duplicates_dropped(&self) -> usize {
        self.duplicates
    }

    /// Cohorts in first-appearance order with their member counts
    pub fn cohort_counts(&self) -> Vec<CohortCount> {
        self.cohorts
            .iter()
            .map(|(symbol, direction)| CohortCount {
                symbol: symbol.clone(),
                direction: *direction,
                count: self.cohort_size(symbol, *direction),
            })
            .collect()
    }

    pub fn report(&self) -> RankingReport {
        RankingReport {
            strategies: self.strategies.clone(),
            cohorts: self.cohort_counts(),
            highest: self.highest,
            lowest: self.lowest,
            duplicates_dropped: self.duplicates,
        }
    }
}

/// Build the ranking view for a snapshot
pub fn to_tracked(strategies: Vec<StrategySnapshot>) -> TrackedStrategies {
    TrackedStrategies::from_snapshot(strategies)
}

/// Stable sort by parsed ROI, best first
pub fn sort_by_roi_desc(strategies: Vec<StrategySnapshot>) -> Vec<StrategySnapshot> {
    let mut keyed: Vec<(f64, StrategySnapshot)> = strategies
        .into_iter()
        .map(|s| (parse_decimal("roi", &s.roi), s))
        .collect();
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
    keyed.into_iter().map(|(_, s)| s).collect()
}
