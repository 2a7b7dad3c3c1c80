#![warn(missing_docs)]
//! Sharebench Planner
//!
//! Decides which batch sizes a sweep measures:
//! - `find_max_batch_size` searches for the largest batch size a strategy
//!   sustains, driven by a caller-supplied dry-run probe
//! - `expovariate_plan` samples at most N batch sizes up to that maximum,
//!   denser towards small sizes

mod sample;
mod search;

pub use sample::expovariate_plan;
pub use search::find_max_batch_size;

use thiserror::Error;

/// Planning errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    /// Even B = 1 did not pass the dry run
    #[error("No feasible batch size: B = 1 failed its dry run")]
    NoFeasibleBatchSize,

    /// Arguments outside the planner's domain
    #[error("Invalid planner argument: {0}")]
    InvalidArgument(String),
}
