use chrono::{DateTime, Duration, Utc};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::grid::{GridFigures, TrackedGrid};
use super::portfolio::PortfolioTotals;
use crate::models::{Direction, GridSnapshot, QuoteAsset};

/// Rolling state for every open grid, plus portfolio aggregates
///
/// Owned by the orchestrator and threaded through each tick; nothing here is global.
#[derive(Debug, Default)]
pub struct GridTracker {
    grids: HashMap<i64, TrackedGrid>,
    ids: BTreeSet<i64>,
    by_direction: HashMap<Direction, BTreeSet<i64>>,
    by_symbol: HashMap<String, BTreeSet<i64>>,
    portfolio: BTreeMap<QuoteAsset, PortfolioTotals>,
    sample_retention: Option<Duration>,
}

impl GridTracker {
    pub fn new(sample_retention: Option<Duration>) -> Self {
        Self {
            sample_retention,
            ..Default::default()
        }
    }

    /// Rebuild a tracker from previously persisted grids
    pub fn from_grids(grids: Vec<TrackedGrid>, sample_retention: Option<Duration>) -> Self {
        let mut tracker = Self::new(sample_retention);
        for grid in grids {
            let id = grid.position_id();
            tracker.index(id, &grid.snapshot.symbol, grid.direction());
            tracker
                .portfolio
                .entry(grid.quote)
                .or_default()
                .add(grid.initial_value, grid.total_pnl);
            tracker.grids.insert(id, grid);
        }

        tracing::info!("Restored {} tracked grids", tracker.grids.len());
        tracker
    }

    pub fn observe(&mut self, snapshot: GridSnapshot, market_price: f64, track_continuous: bool) -> &TrackedGrid {
        self.observe_at(snapshot, market_price, track_continuous, Utc::now())
    }

    /// Fold one snapshot into the tracking state
    ///
    /// With `track_continuous` false, extrema and samples are updated but the
    /// run-length counters are left alone (off-cycle refreshes).
    pub fn observe_at(
        &mut self,
        snapshot: GridSnapshot,
        market_price: f64,
        track_continuous: bool,
        now: DateTime<Utc>,
    ) -> &TrackedGrid {
        let id = snapshot.position_id;
        let figures = GridFigures::compute(&snapshot, market_price);

        // Take the previous contribution out before adding the new one, so repeated
        // observation leaves the totals where a single observation would
        if let Some(previous) = self.grids.get(&id) {
            let quote = previous.quote;
            let (initial_value, pnl) = (previous.initial_value, previous.total_pnl);
            let (symbol, direction) = (previous.snapshot.symbol.clone(), previous.direction());

            self.portfolio.entry(quote).or_default().subtract(initial_value, pnl);
            if symbol != snapshot.symbol || direction != snapshot.direction {
                self.unindex(id, &symbol, direction);
            }
        }
        self.index(id, &snapshot.symbol, snapshot.direction);

        let grid = match self.grids.entry(id) {
            Entry::Occupied(entry) => {
                let grid = entry.into_mut();
                grid.update(snapshot, market_price, figures, track_continuous, now);
                grid
            }
            Entry::Vacant(entry) => {
                tracing::debug!(position_id = id, roi = figures.roi, "Tracking new grid");
                entry.insert(TrackedGrid::new(snapshot, market_price, figures, now))
            }
        };

        if let Some(retention) = self.sample_retention {
            grid.cap_samples(retention, now);
        }

        self.portfolio
            .entry(grid.quote)
            .or_default()
            .add(grid.initial_value, grid.total_pnl);

        grid
    }

    /// Stop tracking a grid that is no longer open. A second call is a no-op.
    pub fn remove(&mut self, position_id: i64) -> Option<TrackedGrid> {
        let grid = self.grids.remove(&position_id)?;

        self.portfolio
            .entry(grid.quote)
            .or_default()
            .subtract(grid.initial_value, grid.total_pnl);
        self.unindex(position_id, &grid.snapshot.symbol, grid.direction());

        tracing::debug!(
            position_id,
            last_roi = grid.last_roi,
            "Stopped tracking grid"
        );
        Some(grid)
    }

    /// Remove every tracked grid that is not in `open_ids`
    pub fn reconcile(&mut self, open_ids: &HashSet<i64>) -> Vec<i64> {
        let gone: Vec<i64> = self
            .ids
            .iter()
            .copied()
            .filter(|id| !open_ids.contains(id))
            .collect();

        for id in &gone {
            self.remove(*id);
        }
        gone
    }

    fn index(&mut self, id: i64, symbol: &str, direction: Direction) {
        self.ids.insert(id);
        self.by_direction.entry(direction).or_default().insert(id);
        self.by_symbol.entry(symbol.to_string()).or_default().insert(id);
    }

    fn unindex(&mut self, id: i64, symbol: &str, direction: Direction) {
        self.ids.remove(&id);

        if let Some(set) = self.by_direction.get_mut(&direction) {
            set.remove(&id);
            if set.is_empty() {
                self.by_direction.remove(&direction);
            }
        }
        if let Some(set) = self.by_symbol.get_mut(symbol) {
            set.remove(&id);
            if set.is_empty() {
                self.by_symbol.remove(symbol);
            }
        }
    }

    pub fn get(&self, position_id: i64) -> Option<&TrackedGrid> {
        self.grids.get(&position_id)
    }

    pub fn contains(&self, position_id: i64) -> bool {
        self.grids.contains_key(&position_id)
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    /// Tracked grids ordered by position id
    pub fn grids(&self) -> impl Iterator<Item = &TrackedGrid> {
        self.ids.iter().filter_map(|id| self.grids.get(id))
    }

    pub fn ids(&self) -> &BTreeSet<i64> {
        &self.ids
    }

    pub fn ids_by_direction(&self, direction: Direction) -> Vec<i64> {
        self.by_direction
            .get(&direction)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn ids_by_symbol(&self, symbol: &str) -> Vec<i64> {
        self.by_symbol
            .get(symbol)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn portfolio(&self, quote: QuoteAsset) -> PortfolioTotals {
        self.portfolio.get(&quote).copied().unwrap_or_default()
    }

    /// Grids whose market price left the configured bounds
    pub fn out_of_range(&self) -> Vec<i64> {
        self.grids()
            .filter(|grid| !super::within_range(grid))
            .map(|grid| grid.position_id())
            .collect()
    }
}
