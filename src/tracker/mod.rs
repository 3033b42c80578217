// Per-grid rolling state and portfolio aggregates
pub mod grid;
pub mod grid_tracker;
pub mod portfolio;
pub mod subject;

pub use grid::{GridFigures, RoiSample, TrackedGrid};
pub use grid_tracker::GridTracker;
pub use portfolio::PortfolioTotals;
pub use subject::Subject;

/// Market price strictly between the grid's lower and upper bound
pub fn within_range(grid: &TrackedGrid) -> bool {
    grid.within_range()
}
