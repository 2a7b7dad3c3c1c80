//! Trial contract
//!
//! A trial is one invocation of the training workload. Sharebench never looks
//! inside it: it hands over a `TrialRequest` and gets back whether the run
//! succeeded.

use crate::types::{Device, Precision};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Iteration cap meaning "run whole epochs"
pub const MAX_ITERS_PER_EPOCH: u64 = 1_000_000_000;

/// Errors raised by a trial implementation
///
/// These mean the trial could not be carried out at all. A trial that ran but
/// did not fit (e.g. out of memory) reports `Ok(false)` instead.
#[derive(Debug, Error)]
pub enum TrialError {
    #[error("Failed to launch trial '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Trial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Trial failed: {0}")]
    Failed(String),
}

/// Parameters for a single trial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialRequest {
    /// Fused batch size B under `hfta`; 0 (one unfused model) otherwise
    pub batch: u32,
    /// Device to run on
    pub device: Device,
    /// Numeric precision
    pub precision: Precision,
    /// Number of epochs
    pub epochs: u32,
    /// Iteration cap per epoch
    pub iters_per_epoch: u64,
    /// Output directory, `None` for dry runs. Exists by the time the trial runs.
    pub outdir: Option<PathBuf>,
    /// Device configuration in force for this measurement
    pub env: BTreeMap<String, String>,
}

impl TrialRequest {
    /// Whether this is a dry-run probe (no persisted output)
    pub fn is_dry_run(&self) -> bool {
        self.outdir.is_none()
    }
}

/// The training workload
pub trait Trial: Send + Sync {
    /// Run the workload. `Ok(true)` on success, `Ok(false)` if it failed.
    fn run(&self, request: &TrialRequest) -> Result<bool, TrialError>;
}

impl<F> Trial for F
where
    F: Fn(&TrialRequest) -> Result<bool, TrialError> + Send + Sync,
{
    fn run(&self, request: &TrialRequest) -> Result<bool, TrialError> {
        self(request)
    }
}
