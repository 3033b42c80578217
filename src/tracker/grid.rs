use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::models::{parse_decimal, Direction, GridSnapshot, QuoteAsset};

/// `now - window`, saturating at the earliest representable instant
fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RoiSample {
    pub roi: f64,
    pub at: DateTime<Utc>,
}

/// Figures derived from one snapshot at one market price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridFigures {
    pub initial_value: f64,
    pub total_pnl: f64,
    pub roi: f64,
    pub lower_price: f64,
    pub upper_price: f64,
}

impl GridFigures {
    /// `initial = raw / leverage`, `pnl = realized + funding + size * (price - entry)`.
    ///
    /// Size is signed, so the same formula covers long and short exposure.
    pub fn compute(snapshot: &GridSnapshot, market_price: f64) -> Self {
        let leverage = if snapshot.leverage == 0 {
            tracing::warn!(
                position_id = snapshot.position_id,
                "Leverage reported as 0, using 1"
            );
            1.0
        } else {
            snapshot.leverage as f64
        };

        let initial_value = parse_decimal("initial_value", &snapshot.initial_value) / leverage;
        let realized = parse_decimal("realized_profit", &snapshot.realized_profit);
        let funding = parse_decimal("funding_fee", &snapshot.funding_fee);
        let size = parse_decimal("position_size", &snapshot.position_size);
        let entry = parse_decimal("entry_price", &snapshot.entry_price);

        let total_pnl = realized + funding + size * (market_price - entry);
        let roi = if initial_value != 0.0 {
            total_pnl / initial_value
        } else {
            tracing::warn!(
                position_id = snapshot.position_id,
                "Initial value is 0, reading ROI as 0"
            );
            0.0
        };

        Self {
            initial_value,
            total_pnl,
            roi,
            lower_price: parse_decimal("lower_price", &snapshot.lower_price),
            upper_price: parse_decimal("upper_price", &snapshot.upper_price),
        }
    }
}

/// Rolling state of one open grid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedGrid {
    pub snapshot: GridSnapshot,
    pub quote: QuoteAsset,
    pub market_price: f64,
    pub lower_price: f64,
    pub upper_price: f64,
    pub initial_value: f64,
    pub total_pnl: f64,
    pub last_roi: f64,
    pub lowest_roi: f64,
    pub lowest_roi_at: DateTime<Utc>,
    pub highest_roi: f64,
    pub highest_roi_at: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub time_last_change: DateTime<Utc>,
    pub continuous_growth: u32,
    pub continuous_loss: u32,
    pub continuous_no_change: u32,
    samples: VecDeque<RoiSample>,
}

impl TrackedGrid {
    pub(crate) fn new(snapshot: GridSnapshot, market_price: f64, figures: GridFigures, now: DateTime<Utc>) -> Self {
        let quote = QuoteAsset::from_symbol(&snapshot.symbol);
        let mut samples = VecDeque::new();
        samples.push_back(RoiSample {
            roi: figures.roi,
            at: now,
        });

        Self {
            snapshot,
            quote,
            market_price,
            lower_price: figures.lower_price,
            upper_price: figures.upper_price,
            initial_value: figures.initial_value,
            total_pnl: figures.total_pnl,
            last_roi: figures.roi,
            lowest_roi: figures.roi,
            lowest_roi_at: now,
            highest_roi: figures.roi,
            highest_roi_at: now,
            first_seen: now,
            last_seen: now,
            time_last_change: now,
            continuous_growth: 0,
            continuous_loss: 0,
            continuous_no_change: 0,
            samples,
        }
    }

    /// Fold a new reading into the rolling state
    pub(crate) fn update(
        &mut self,
        snapshot: GridSnapshot,
        market_price: f64,
        figures: GridFigures,
        track_continuous: bool,
        now: DateTime<Utc>,
    ) {
        let previous = self.last_roi;
        let roi = figures.roi;

        self.quote = QuoteAsset::from_symbol(&snapshot.symbol);
        self.snapshot = snapshot;
        self.market_price = market_price;
        self.lower_price = figures.lower_price;
        self.upper_price = figures.upper_price;
        self.initial_value = figures.initial_value;
        self.total_pnl = figures.total_pnl;
        self.last_roi = roi;
        self.last_seen = now;

        // Ties keep the older timestamp
        if roi < self.lowest_roi {
            self.lowest_roi = roi;
            self.lowest_roi_at = now;
        }
        if roi > self.highest_roi {
            self.highest_roi = roi;
            self.highest_roi_at = now;
        }

        if roi != previous {
            self.time_last_change = now;
        }

        if track_continuous {
            if roi > previous {
                self.continuous_growth += 1;
                self.continuous_loss = 0;
                self.continuous_no_change = 0;
            } else if roi < previous {
                self.continuous_growth = 0;
                self.continuous_loss += 1;
                self.continuous_no_change = 0;
            } else {
                self.continuous_growth = 0;
                self.continuous_loss = 0;
                self.continuous_no_change += 1;
            }
        }

        self.samples.push_back(RoiSample { roi, at: now });
    }

    /// Drop samples older than `retention` relative to the newest insertion time
    pub(crate) fn cap_samples(&mut self, retention: Duration, now: DateTime<Utc>) {
        let cutoff = window_start(now, retention);
        while self.samples.front().is_some_and(|s| s.at < cutoff) {
            self.samples.pop_front();
        }
    }

    pub fn position_id(&self) -> i64 {
        self.snapshot.position_id
    }

    pub fn strategy_id(&self) -> i64 {
        self.snapshot.strategy_id
    }

    pub fn symbol(&self) -> &str {
        &self.snapshot.symbol
    }

    pub fn direction(&self) -> Direction {
        self.snapshot.direction
    }

    pub fn samples(&self) -> impl DoubleEndedIterator<Item = &RoiSample> {
        self.samples.iter()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Market price strictly between the configured bounds
    pub fn within_range(&self) -> bool {
        self.lower_price < self.market_price && self.market_price < self.upper_price
    }

    /// True when no sample inside `[now - window, now]` fell below `floor`
    pub fn no_dip_within(&self, window: Duration, floor: f64, now: DateTime<Utc>) -> bool {
        let since = window_start(now, window);
        self.samples
            .iter()
            .rev()
            .take_while(|s| s.at >= since)
            .all(|s| s.roi >= floor)
    }

    /// Lowest ROI sampled inside `[now - window, now]`
    pub fn lowest_within(&self, window: Duration, now: DateTime<Utc>) -> Option<f64> {
        let since = window_start(now, window);
        self.samples
            .iter()
            .rev()
            .take_while(|s| s.at >= since)
            .map(|s| s.roi)
            .reduce(f64::min)
    }

    /// Drop samples older than `cutoff` (for callers with a known maximum lookback)
    pub fn truncate_before(&mut self, cutoff: DateTime<Utc>) {
        while self.samples.front().is_some_and(|s| s.at < cutoff) {
            self.samples.pop_front();
        }
    }

    /// How long ROI has not moved
    pub fn unchanged_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.time_last_change
    }
}

impl fmt::Display for TrackedGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} x{} | ROI {:.2}% (low {:.2}% @ {}, high {:.2}% @ {}) | PnL {:.2} on {:.2} | up {} down {} flat {}",
            self.snapshot.position_id,
            self.snapshot.symbol,
            self.snapshot.direction,
            self.snapshot.leverage,
            self.last_roi * 100.0,
            self.lowest_roi * 100.0,
            self.lowest_roi_at.format("%m-%d %H:%M"),
            self.highest_roi * 100.0,
            self.highest_roi_at.format("%m-%d %H:%M"),
            self.total_pnl,
            self.initial_value,
            self.continuous_growth,
            self.continuous_loss,
            self.continuous_no_change,
        )?;
        if !self.within_range() {
            write!(
                f,
                " | OUT OF RANGE {} not in ({}, {})",
                self.market_price, self.lower_price, self.upper_price
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(realized: &str, size: &str, entry: &str) -> GridSnapshot {
        GridSnapshot {
            position_id: 1,
            strategy_id: 10,
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Long,
            leverage: 5,
            realized_profit: realized.to_string(),
            funding_fee: "-0.5".to_string(),
            position_size: size.to_string(),
            entry_price: entry.to_string(),
            lower_price: "90".to_string(),
            upper_price: "110".to_string(),
            initial_value: "500".to_string(),
        }
    }

    #[test]
    fn test_figures_long_exposure() {
        // initial 500 / 5 = 100; pnl = 2 - 0.5 + 1 * (105 - 100) = 6.5
        let figures = GridFigures::compute(&snapshot("2", "1", "100"), 105.0);
        assert_eq!(figures.initial_value, 100.0);
        assert_eq!(figures.total_pnl, 6.5);
        assert!((figures.roi - 0.065).abs() < 1e-12);
    }

    #[test]
    fn test_figures_short_exposure_same_formula() {
        // Short 1 unit from 100, price falls to 95: 2 - 0.5 + (-1) * (95 - 100) = 6.5
        let figures = GridFigures::compute(&snapshot("2", "-1", "100"), 95.0);
        assert_eq!(figures.total_pnl, 6.5);
    }

    #[test]
    fn test_figures_zero_initial_value() {
        let mut snap = snapshot("2", "1", "100");
        snap.initial_value = "0".to_string();
        let figures = GridFigures::compute(&snap, 105.0);
        assert_eq!(figures.roi, 0.0);
    }

    #[test]
    fn test_figures_malformed_field_reads_zero() {
        let mut snap = snapshot("oops", "1", "100");
        snap.funding_fee = "".to_string();
        let figures = GridFigures::compute(&snap, 105.0);
        assert_eq!(figures.total_pnl, 5.0);
    }

    #[test]
    fn test_no_dip_within_window() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let snap = snapshot("0", "0", "100");
        let mut figures = GridFigures::compute(&snap, 100.0);
        let mut grid = TrackedGrid::new(snap.clone(), 100.0, figures, t0);

        for (minutes, roi) in [(10, -0.03), (20, 0.01), (30, 0.02)] {
            figures.roi = roi;
            grid.update(snap.clone(), 100.0, figures, true, t0 + Duration::minutes(minutes));
        }

        let now = t0 + Duration::minutes(30);
        assert!(grid.no_dip_within(Duration::minutes(15), 0.0, now));
        assert!(!grid.no_dip_within(Duration::minutes(25), 0.0, now));
        assert_eq!(grid.lowest_within(Duration::minutes(25), now), Some(-0.03));
        assert_eq!(grid.lowest_within(Duration::minutes(5), now), Some(0.02));

        grid.truncate_before(t0 + Duration::minutes(15));
        assert_eq!(grid.sample_count(), 2);
    }

    #[test]
    fn test_summary_flags_out_of_range() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let snap = snapshot("0", "1", "100");
        let grid = TrackedGrid::new(snap.clone(), 120.0, GridFigures::compute(&snap, 120.0), t0);

        let summary = grid.to_string();
        assert!(summary.starts_with("#1 BTCUSDT LONG x5"));
        assert!(summary.contains("OUT OF RANGE"));
    }
}
