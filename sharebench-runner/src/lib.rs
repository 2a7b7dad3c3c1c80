#![warn(missing_docs)]
//! Sharebench Runner - Strategies and Sweep Control
//!
//! Measures how training throughput scales when one accelerator is shared
//! by B models:
//! - Execution strategies (`serial`, `concurrent`, `mps`, `hfta`)
//! - Dry-run planning of the batch sizes worth measuring
//! - Measurement lifecycle with guaranteed cleanup
//! - Device telemetry sessions
//! - The precision × batch-size sweep and its report

mod command;
mod error;
mod lifecycle;
mod pool;
mod report;
mod strategy;
mod sweep;
mod telemetry;

pub use command::{CommandRunner, SystemCommandRunner};
pub use error::RunnerError;
pub use lifecycle::{Teardown, drive};
pub use report::{
    MeasurementRecord, PrecisionReport, SCHEMA_VERSION, SweepMeta, SweepReport, SweepStatus,
};
pub use strategy::{
    BatchRun, ConcurrentStrategy, ExecutionStrategy, HftaStrategy, MPS_LOG_DIRECTORY,
    MPS_PIPE_DIRECTORY, MpsSettings, MpsStrategy, PlannerParams, SerialStrategy, Strategy,
    StrategyOptions, VISIBLE_DEVICES,
};
pub use sweep::{NUMERIC_OVERRIDE_FLAG, Sweep, SweepOptions};
pub use telemetry::{
    DEFAULT_QUERY, SmiTelemetry, TELEMETRY_FILE, TelemetryError, TelemetryMonitor,
    TelemetrySession,
};
