// Cancellation candidates, loss-floor gating and idempotent close execution
pub mod batch;
pub mod policy;

pub use batch::{
    CancelReport, CancellationBatch, CancellationOutcome, GridToCancel, MarkForRemoval, PositionCloser,
};
pub use policy::CancelPolicy;
