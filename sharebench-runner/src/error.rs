//! Runner errors

use crate::telemetry::TelemetryError;
use sharebench_core::{Device, DeviceConfigError, Precision, StrategyKind};
use sharebench_plan::PlanError;
use thiserror::Error;

/// Errors raised while planning or running a sweep
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("serial mode only runs B = 1, got B = {0}")]
    SerialBatchSize(u32),

    #[error("{mode} mode requires the cuda device, got {device}")]
    RequiresCuda { mode: StrategyKind, device: Device },

    #[error("No precisions to sweep")]
    NoPrecisions,

    #[error("Planning failed for {precision}: {source}")]
    Plan {
        precision: Precision,
        #[source]
        source: PlanError,
    },

    #[error("Device config error: {0}")]
    Config(#[from] DeviceConfigError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Measurement panicked: {0}")]
    Faulted(String),
}

impl RunnerError {
    /// Precondition violations are raised before any resource is touched
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RunnerError::SerialBatchSize(_)
                | RunnerError::RequiresCuda { .. }
                | RunnerError::NoPrecisions
        )
    }
}
