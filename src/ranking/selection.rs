use chrono::{DateTime, Utc};

use super::{RankedStrategy, TrackedStrategies};
use crate::blacklist::Blacklist;

/// Strategies that may be opened right now, in ranking order
///
/// Nothing is openable while a global block is active. Otherwise a strategy is
/// dropped when its symbol or symbol+direction is blocked, or when its cohort
/// ranks at or beyond `max_cohort_rank`.
pub fn select_openable<'a>(
    tracked: &'a TrackedStrategies,
    blacklist: &Blacklist,
    max_cohort_rank: usize,
    now: DateTime<Utc>,
) -> Vec<&'a RankedStrategy> {
    let (global, till) = blacklist.is_blocked_global_at(now);
    if global {
        tracing::info!("Global block active until {:?}, nothing to open", till);
        return Vec::new();
    }

    tracked
        .strategies()
        .iter()
        .filter(|candidate| {
            let strategy = &candidate.snapshot;

            if candidate.cohort_rank >= max_cohort_rank {
                tracing::debug!(
                    strategy_id = strategy.strategy_id,
                    "Cohort {} {} ranked {} (limit {})",
                    strategy.symbol,
                    strategy.direction,
                    candidate.cohort_rank,
                    max_cohort_rank
                );
                return false;
            }
            if blacklist.is_blocked_by_symbol_at(&strategy.symbol, now).0 {
                tracing::debug!(strategy_id = strategy.strategy_id, "Symbol {} blocked", strategy.symbol);
                return false;
            }
            if blacklist
                .is_blocked_by_symbol_direction_at(&strategy.symbol, strategy.direction, now)
                .0
            {
                tracing::debug!(
                    strategy_id = strategy.strategy_id,
                    "{} {} blocked",
                    strategy.symbol,
                    strategy.direction
                );
                return false;
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, GridParams, StrategySnapshot};
    use crate::notify::MemoryNotifier;
    use crate::ranking::to_tracked;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn strategy(id: i64, symbol: &str, direction: Direction) -> StrategySnapshot {
        StrategySnapshot {
            strategy_id: id,
            user_id: 1,
            symbol: symbol.to_string(),
            direction,
            copy_count: 0,
            roi: "0.1".to_string(),
            pnl: "1".to_string(),
            running_time: 3600,
            matched_count: 0,
            last_day_matched_count: 0,
            params: GridParams::default(),
        }
    }

    fn ids(selected: &[&RankedStrategy]) -> Vec<i64> {
        selected.iter().map(|s| s.snapshot.strategy_id).collect()
    }

    #[test]
    fn test_select_respects_blocks_and_cohort_limit() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let tracked = to_tracked(vec![
            strategy(1, "BTCUSDT", Direction::Long),
            strategy(2, "ETHUSDT", Direction::Short),
            strategy(3, "SOLUSDT", Direction::Long),
            strategy(4, "BTCUSDT", Direction::Long),
            strategy(5, "XRPUSDT", Direction::Neutral),
        ]);
        let blacklist = Blacklist::new(Arc::new(MemoryNotifier::default()));

        assert_eq!(ids(&select_openable(&tracked, &blacklist, 3, now)), vec![1, 2, 3, 4]);

        blacklist.add_by_symbol_at("ETHUSDT", Duration::hours(1), "delisting", now);
        blacklist.add_by_symbol_direction_at("SOLUSDT", Direction::Long, Duration::hours(1), "stop hit", now);
        assert_eq!(ids(&select_openable(&tracked, &blacklist, 3, now)), vec![1, 4]);

        // Blocks lapse
        let later = now + Duration::hours(2);
        assert_eq!(ids(&select_openable(&tracked, &blacklist, 10, later)), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_global_block_selects_nothing() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let tracked = to_tracked(vec![strategy(1, "BTCUSDT", Direction::Long)]);
        let blacklist = Blacklist::new(Arc::new(MemoryNotifier::default()));
        blacklist.add_global_at(Duration::minutes(30), "drawdown", now);

        assert!(select_openable(&tracked, &blacklist, 5, now).is_empty());
    }
}
