#![warn(missing_docs)]
//! # Sharebench
//!
//! Batch-size sweeps for comparing ways of sharing one accelerator between
//! B training jobs.
//!
//! - **Strategies**: `serial` (baseline), `concurrent` (B threads), `mps`
//!   (B threads under the Multi-Process Service daemon) and `hfta` (one
//!   fused job of width B)
//! - **Planning**: dry-run search for the largest batch size that fits,
//!   then an exponentially weighted sample of sizes to measure
//! - **Lifecycle**: per-measurement device configuration and telemetry with
//!   cleanup that always runs
//! - **Fail-fast**: the first failed measurement ends the sweep
//!
//! ## Quick Start
//!
//! ```ignore
//! use sharebench::prelude::*;
//!
//! let trial = |req: &TrialRequest| -> Result<bool, TrialError> {
//!     Ok(train(req.batch, req.precision, req.outdir.as_deref()))
//! };
//! let strategy = Strategy::build(StrategyKind::Hfta, StrategyOptions::default());
//! let report = Sweep::new(&strategy).run(&trial, &SweepOptions::default())?;
//! assert!(report.succeeded());
//! ```

// Re-export core types
pub use sharebench_core::{
    CommandLine, Device, DeviceConfig, DeviceConfigError, MAX_ITERS_PER_EPOCH, ParseTagError,
    Precision, StrategyKind, Trial, TrialError, TrialRequest,
};

// Re-export planner
pub use sharebench_plan::{PlanError, expovariate_plan, find_max_batch_size};

// Re-export runner
pub use sharebench_runner::{
    BatchRun, CommandRunner, ConcurrentStrategy, ExecutionStrategy, HftaStrategy,
    MeasurementRecord, MpsSettings, MpsStrategy, NUMERIC_OVERRIDE_FLAG, PlannerParams,
    PrecisionReport, RunnerError, SerialStrategy, SmiTelemetry, Strategy, StrategyOptions, Sweep,
    SweepOptions, SweepReport, SweepStatus, SystemCommandRunner, Teardown, TelemetryError,
    TelemetryMonitor, TelemetrySession, drive,
};

// Re-export CLI pieces usable as a library
pub use sharebench_cli::{CommandTrial, SharebenchConfig};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Device, ExecutionStrategy, Precision, Strategy, StrategyKind, StrategyOptions, Sweep,
        SweepOptions, SweepReport, Trial, TrialError, TrialRequest,
    };
}

/// Run the Sharebench CLI.
///
/// ```ignore
/// fn main() -> anyhow::Result<()> {
///     sharebench::run()
/// }
/// ```
pub use sharebench_cli::run;
