use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use gridwarden::cancellation::{CancelPolicy, PositionCloser};
use gridwarden::notify::NoticeLevel;
use gridwarden::ranking::ScoreBucket;
use gridwarden::tracker::PortfolioTotals;
use gridwarden::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Fails for the ids in `fail` and records every call
#[derive(Default)]
struct FlakyCloser {
    fail: Mutex<HashSet<i64>>,
    calls: Mutex<Vec<i64>>,
}

#[async_trait]
impl PositionCloser for FlakyCloser {
    async fn close_position(&self, grid: &TrackedGrid) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(grid.position_id());
        if self.fail.lock().unwrap().contains(&grid.position_id()) {
            anyhow::bail!("order rejected");
        }
        Ok(())
    }
}

fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn grid(id: i64, symbol: &str, direction: Direction, realized: &str) -> GridSnapshot {
    GridSnapshot {
        position_id: id,
        strategy_id: id * 100,
        symbol: symbol.to_string(),
        direction,
        leverage: 1,
        realized_profit: realized.to_string(),
        funding_fee: "0".to_string(),
        position_size: "0".to_string(),
        entry_price: "100".to_string(),
        lower_price: "50".to_string(),
        upper_price: "150".to_string(),
        initial_value: "100".to_string(),
    }
}

fn strategy(id: i64, user: i64, symbol: &str, direction: Direction, roi: &str) -> StrategySnapshot {
    StrategySnapshot {
        strategy_id: id,
        user_id: user,
        symbol: symbol.to_string(),
        direction,
        copy_count: 3,
        roi: roi.to_string(),
        pnl: "10".to_string(),
        running_time: 7200,
        matched_count: 12,
        last_day_matched_count: 2,
        params: GridParams::default(),
    }
}

fn prices() -> HashMap<String, f64> {
    HashMap::from([
        ("BTCUSDT".to_string(), 100.0),
        ("ETHUSDC".to_string(), 100.0),
        ("SOLUSDT".to_string(), 100.0),
    ])
}

#[tokio::test]
async fn test_engine_workflow() {
    let _ = tracing_subscriber::fmt::try_init();

    let notifier = Arc::new(MemoryNotifier::default());
    let config = EngineConfig {
        policy: CancelPolicy {
            max_continuous_loss: Some(3),
            loss_floor: -0.05,
            cooldown_after_cancel_secs: Some(3600),
            ..CancelPolicy::default()
        },
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config, notifier.clone());

    // 1. Four ticks of tracking
    println!("1. Observing four ticks...");
    let series = [("1", "-1", "0"), ("2", "-2", "0"), ("2", "-3", "0"), ("1.5", "-4", "0")];
    for (minute, (btc, eth, sol)) in series.iter().enumerate() {
        let summary = engine.observe_tick(
            vec![
                grid(1, "BTCUSDT", Direction::Long, btc),
                grid(2, "ETHUSDC", Direction::Short, eth),
                grid(3, "SOLUSDT", Direction::Neutral, sol),
            ],
            &prices(),
            true,
            at(minute as i64),
        );
        assert_eq!(summary.observed, vec![1, 2, 3]);
    }

    let btc = engine.tracker().get(1).unwrap();
    assert_eq!(btc.last_roi, 0.015);
    assert_eq!(btc.highest_roi, 0.02);
    assert_eq!(btc.highest_roi_at, at(1));
    assert_eq!((btc.continuous_growth, btc.continuous_loss, btc.continuous_no_change), (0, 1, 0));

    let eth = engine.tracker().get(2).unwrap();
    assert_eq!(eth.continuous_loss, 3);
    assert_eq!(engine.tracker().portfolio(QuoteAsset::Usdc).positions, 1);
    println!("   ✓ BTC ROI {:.3}, ETH loss streak {}", btc.last_roi, eth.continuous_loss);

    // 2. Plan: loss streak on #2, manual mark on #3
    println!("\n2. Planning cancellations...");
    engine.mark_for_removal(3, -0.01, "strategy delisted");
    let mut batch = engine.plan_cancellations(at(3));
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.get(2).unwrap().max_loss_threshold, -0.05);
    assert_eq!(batch.get(3).unwrap().reasons, vec!["marked for removal"]);

    // 3. First pass: #3 fails, #2 closes
    println!("\n3. Executing with a flaky closer...");
    let closer = FlakyCloser::default();
    closer.fail.lock().unwrap().insert(3);
    let report = engine.execute(&mut batch, &closer, at(3)).await;
    assert_eq!(report.cancelled, vec![2]);
    assert_eq!(report.failed_ids(), vec![3]);
    assert_eq!(batch.cancelled_ids(), HashSet::from([2]));
    assert!(engine
        .blacklist()
        .is_blocked_by_symbol_direction_at("ETHUSDC", Direction::Short, at(3))
        .0);
    assert_eq!(engine.marks().floor(3), Some(-0.01));
    println!("   ✓ cancelled {:?}, failed {:?}", report.cancelled, report.failed_ids());

    // 4. Retry pass never closes #2 again
    println!("\n4. Retrying...");
    closer.fail.lock().unwrap().clear();
    let report = engine.execute(&mut batch, &closer, at(4)).await;
    assert_eq!(report.cancelled, vec![3]);
    assert_eq!(report.already_cancelled, vec![2]);
    assert_eq!(*closer.calls.lock().unwrap(), vec![2, 3, 3]);
    assert!(engine.marks().is_empty());
    assert_eq!(notifier.count(NoticeLevel::Warning), 1);

    // 5. Next tick reports only #1 open
    println!("\n5. Reconciling closed grids...");
    let summary = engine.observe_tick(vec![grid(1, "BTCUSDT", Direction::Long, "2")], &prices(), true, at(5));
    assert_eq!(summary.removed, vec![2, 3]);
    assert_eq!(engine.tracker().len(), 1);
    assert_eq!(engine.tracker().portfolio(QuoteAsset::Usdc), PortfolioTotals::default());
    assert_eq!(engine.tracker().portfolio(QuoteAsset::Usdt).pnl, 2.0);

    // 6. Ranking respects the cooldown block
    println!("\n6. Ranking strategies...");
    let tracked = engine.rank_strategies(vec![
        strategy(10, 1, "BTCUSDT", Direction::Long, "0.3"),
        strategy(20, 2, "ETHUSDC", Direction::Short, "0.5"),
        strategy(10, 1, "BTCUSDT", Direction::Long, "0.1"),
        strategy(30, 3, "SOLUSDT", Direction::Neutral, "0.2"),
    ]);
    assert_eq!(tracked.len(), 3);
    assert_eq!(tracked.get(10).unwrap().snapshot.roi, "0.3");
    assert_eq!(tracked.rank(20), Some(0));

    let openable: Vec<i64> = engine
        .openable(&tracked, at(5))
        .iter()
        .map(|s| s.snapshot.strategy_id)
        .collect();
    assert_eq!(openable, vec![10, 30]);

    // 7. Win/loss scoring
    println!("\n7. Scoring concluded trades...");
    let trades = vec![ConcludedTrade {
        strategy_id: 10,
        user_id: 1,
        symbol: "BTCUSDT".to_string(),
        direction: Direction::Long,
        start_price: 100.0,
        end_price: 110.0,
        high_price: 112.0,
        low_price: 99.0,
        start_time: at(0),
        end_time: at(60 * 24),
        lower_bound: 90.0,
        upper_bound: 120.0,
        roi: 0.04,
    }];
    let scores = engine.score_trades(&trades);
    assert_eq!(scores[&1].bucket(ScoreBucket::Long).win_ratio, 1.0);
    assert_eq!(scores[&1].total().eligible_trades, 1);

    println!("\n=== Engine workflow complete ===");
}
