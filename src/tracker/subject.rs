use std::fmt;

use super::TrackedGrid;
use crate::models::StrategySnapshot;

/// What a report line is about: a strategy, a grid, or both
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    StrategyOnly(&'a StrategySnapshot),
    GridOnly(&'a TrackedGrid),
    Consistent {
        strategy: &'a StrategySnapshot,
        grid: &'a TrackedGrid,
    },
    /// The grid claims to follow the strategy but symbol, direction or id disagree
    Divergent {
        strategy: &'a StrategySnapshot,
        grid: &'a TrackedGrid,
    },
}

impl<'a> Subject<'a> {
    pub fn new(strategy: Option<&'a StrategySnapshot>, grid: Option<&'a TrackedGrid>) -> Option<Self> {
        match (strategy, grid) {
            (None, None) => None,
            (Some(strategy), None) => Some(Subject::StrategyOnly(strategy)),
            (None, Some(grid)) => Some(Subject::GridOnly(grid)),
            (Some(strategy), Some(grid)) => {
                let consistent = grid.strategy_id() == strategy.strategy_id
                    && grid.symbol() == strategy.symbol
                    && grid.direction() == strategy.direction;
                if consistent {
                    Some(Subject::Consistent { strategy, grid })
                } else {
                    Some(Subject::Divergent { strategy, grid })
                }
            }
        }
    }
}

fn write_strategy(f: &mut fmt::Formatter<'_>, strategy: &StrategySnapshot) -> fmt::Result {
    write!(
        f,
        "strategy {} {} {} (user {}, ROI {}, copies {})",
        strategy.strategy_id,
        strategy.symbol,
        strategy.direction,
        strategy.user_id,
        strategy.roi,
        strategy.copy_count
    )
}

impl fmt::Display for Subject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::StrategyOnly(strategy) => write_strategy(f, strategy),
            Subject::GridOnly(grid) => write!(f, "grid {}", grid),
            Subject::Consistent { strategy, grid } => {
                write!(f, "grid {} <- ", grid)?;
                write_strategy(f, strategy)
            }
            Subject::Divergent { strategy, grid } => {
                write!(f, "grid {} <- MISMATCHED ", grid)?;
                write_strategy(f, strategy)
            }
        }
    }
}
