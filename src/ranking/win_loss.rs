use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{ConcludedTrade, Direction};

/// Constants of the win/loss scoring rules
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WinLossParams {
    /// Trades that ran at most this long count as short-running
    pub short_running_secs: i64,
    /// Net move below this fraction on a short-running trade excludes it
    pub negligible_change: f64,
    /// Adverse excursion from the start price counted as a deep drawdown
    pub deep_drawdown: f64,
    /// Net move below this fraction counts as a small move
    pub small_move: f64,
    /// Credit kept when price touched the adverse grid bound
    pub bound_touch_credit: f64,
    pub drawdown_discount: f64,
    pub small_move_discount: f64,
    /// Score of a neutral trade whose exit price left its bounds
    pub neutral_escape_penalty: f64,
}

impl Default for WinLossParams {
    fn default() -> Self {
        Self {
            short_running_secs: 2 * 3600,
            negligible_change: 0.006,
            deep_drawdown: 0.10,
            small_move: 0.02,
            bound_touch_credit: 0.1,
            drawdown_discount: 0.5,
            small_move_discount: 0.5,
            neutral_escape_penalty: -12.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScoreBucket {
    Long,
    Short,
    Neutral,
    Total,
}

impl From<Direction> for ScoreBucket {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Long => ScoreBucket::Long,
            Direction::Short => ScoreBucket::Short,
            Direction::Neutral => ScoreBucket::Neutral,
        }
    }
}

/// Aggregated score of one user's trades in one bucket
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct WinLoss {
    pub total_trades: u32,
    pub eligible_trades: u32,
    pub short_running_count: u32,
    pub win_credit: f64,
    pub win_ratio: f64,
    pub short_running_ratio: f64,
}

impl WinLoss {
    fn record(&mut self, short_running: bool, credit: Option<f64>) {
        self.total_trades += 1;
        if short_running {
            self.short_running_count += 1;
        }
        if let Some(credit) = credit {
            self.eligible_trades += 1;
            self.win_credit += credit;
        }
    }

    fn absorb(&mut self, other: &WinLoss) {
        self.total_trades += other.total_trades;
        self.eligible_trades += other.eligible_trades;
        self.short_running_count += other.short_running_count;
        self.win_credit += other.win_credit;
    }

    fn finalize(&mut self) {
        self.win_ratio = if self.eligible_trades > 0 {
            self.win_credit / self.eligible_trades as f64
        } else {
            0.0
        };
        self.short_running_ratio = if self.total_trades > 0 {
            self.short_running_count as f64 / self.total_trades as f64
        } else {
            0.0
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WinLossBundle {
    pub user_id: i64,
    pub buckets: BTreeMap<ScoreBucket, WinLoss>,
}

impl WinLossBundle {
    pub fn bucket(&self, bucket: ScoreBucket) -> WinLoss {
        self.buckets.get(&bucket).copied().unwrap_or_default()
    }

    pub fn total(&self) -> WinLoss {
        self.bucket(ScoreBucket::Total)
    }
}

/// Scored outcome of one trade
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeScore {
    pub short_running: bool,
    /// `None` when the trade is too short and too flat to count
    pub credit: Option<f64>,
}

fn net_change(trade: &ConcludedTrade) -> f64 {
    if trade.start_price == 0.0 {
        return 0.0;
    }
    (trade.end_price - trade.start_price).abs() / trade.start_price
}

pub fn score_trade(trade: &ConcludedTrade, params: &WinLossParams) -> TradeScore {
    let running = trade.end_time - trade.start_time;
    let short_running = running <= Duration::try_seconds(params.short_running_secs).unwrap_or(Duration::MAX);
    let change = net_change(trade);

    if short_running && change < params.negligible_change {
        return TradeScore {
            short_running,
            credit: None,
        };
    }

    let credit = match trade.direction {
        Direction::Long => long_credit(trade, change, params),
        Direction::Short => short_credit(trade, change, params),
        Direction::Neutral => neutral_credit(trade, params),
    };

    TradeScore {
        short_running,
        credit: Some(credit),
    }
}

fn long_credit(trade: &ConcludedTrade, change: f64, params: &WinLossParams) -> f64 {
    if !(trade.end_price > trade.start_price && trade.roi > 0.0) {
        return -1.0;
    }

    let mut credit = 1.0;
    if trade.low_price <= trade.lower_bound {
        credit *= params.bound_touch_credit;
    }
    let drawdown = (trade.start_price - trade.low_price) / trade.start_price;
    if drawdown > params.deep_drawdown {
        credit *= params.drawdown_discount;
    }
    if change < params.small_move {
        credit *= params.small_move_discount;
    }
    credit
}

fn short_credit(trade: &ConcludedTrade, change: f64, params: &WinLossParams) -> f64 {
    if !(trade.end_price < trade.start_price && trade.roi > 0.0) {
        return -1.0;
    }

    let mut credit = 1.0;
    if trade.high_price >= trade.upper_bound {
        credit *= params.bound_touch_credit;
    }
    let rally = (trade.high_price - trade.start_price) / trade.start_price;
    if rally > params.deep_drawdown {
        credit *= params.drawdown_discount;
    }
    if change < params.small_move {
        credit *= params.small_move_discount;
    }
    credit
}

fn neutral_credit(trade: &ConcludedTrade, params: &WinLossParams) -> f64 {
    let (lower, upper) = (trade.lower_bound, trade.upper_bound);

    if trade.end_price <= lower || trade.end_price >= upper {
        return params.neutral_escape_penalty;
    }
    if trade.low_price <= lower || trade.high_price >= upper {
        return 0.0;
    }
    if trade.roi <= 0.0 {
        return params.neutral_escape_penalty;
    }

    let half_range = (upper - lower) / 2.0;
    if half_range <= 0.0 {
        return 1.0;
    }
    let midpoint = (upper + lower) / 2.0;
    let distance = (trade.end_price - trade.start_price)
        .abs()
        .min((trade.end_price - midpoint).abs());
    (1.0 - distance / half_range).clamp(0.0, 1.0)
}

/// Score every trade of one user, per direction plus a TOTAL bucket
pub fn score_user(user_id: i64, trades: &[ConcludedTrade], params: &WinLossParams) -> WinLossBundle {
    let mut buckets: BTreeMap<ScoreBucket, WinLoss> = BTreeMap::new();

    for trade in trades.iter().filter(|t| t.user_id == user_id) {
        let score = score_trade(trade, params);
        buckets
            .entry(trade.direction.into())
            .or_default()
            .record(score.short_running, score.credit);
    }

    let mut total = WinLoss::default();
    for stats in buckets.values_mut() {
        total.absorb(stats);
        stats.finalize();
    }
    total.finalize();
    buckets.insert(ScoreBucket::Total, total);

    WinLossBundle { user_id, buckets }
}

/// Score every user present in `trades`, ordered by user id
pub fn score_all(trades: &[ConcludedTrade], params: &WinLossParams) -> BTreeMap<i64, WinLossBundle> {
    let mut users: Vec<i64> = trades.iter().map(|t| t.user_id).collect();
    users.sort_unstable();
    users.dedup();

    users
        .into_iter()
        .map(|user| (user, score_user(user, trades, params)))
        .collect()
}
