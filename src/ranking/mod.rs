// Strategy ranking and historical win/loss scoring
pub mod selection;
pub mod tracked_strategies;
pub mod win_loss;

pub use selection::select_openable;
pub use tracked_strategies::{
    sort_by_roi_desc, to_tracked, CohortCount, MetricBundle, RankedStrategy, RankingReport, TrackedStrategies,
};
pub use win_loss::{score_all, score_trade, score_user, ScoreBucket, TradeScore, WinLoss, WinLossBundle, WinLossParams};
