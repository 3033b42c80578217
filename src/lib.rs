// Core modules
pub mod blacklist;
pub mod cache;
pub mod cancellation;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod notify;
pub mod ranking;
pub mod tracker;

// Re-export commonly used types
pub use blacklist::Blacklist;
pub use cache::{KeyedCache, TtlCache};
pub use cancellation::{CancelPolicy, CancelReport, CancellationBatch, MarkForRemoval, PositionCloser};
pub use config::EngineConfig;
pub use engine::{Engine, EngineState, TickSummary};
pub use error::{EngineError, StaleRead};
pub use models::*;
pub use notify::{LogNotifier, MemoryNotifier, Notifier};
pub use ranking::{TrackedStrategies, WinLossBundle};
pub use tracker::{GridTracker, TrackedGrid};

// Error handling
pub type Result<T> = std::result::Result<T, EngineError>;
