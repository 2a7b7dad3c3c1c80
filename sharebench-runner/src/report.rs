//! Sweep Report Data Structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sharebench_core::{Device, Precision, StrategyKind};
use std::path::PathBuf;

/// Report schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Outcome of a whole sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub meta: SweepMeta,
    pub precisions: Vec<PrecisionReport>,
    pub status: SweepStatus,
}

/// What was swept, where, and when
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepMeta {
    pub schema_version: u32,
    pub version: String,
    pub mode: StrategyKind,
    pub device: Device,
    pub device_model: String,
    pub outdir_prefix: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Overall and per-precision status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepStatus {
    Running,
    Passed,
    Failed,
}

/// One precision: its plan and the measurements run so far
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecisionReport {
    pub precision: Precision,
    /// Batch sizes chosen by the planner, in execution order
    pub planned: Vec<u32>,
    pub measurements: Vec<MeasurementRecord>,
    pub status: SweepStatus,
    /// Planning error, if the planner gave up
    pub error: Option<String>,
}

/// One batch size measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub batch_size: u32,
    pub outdir: PathBuf,
    pub succeeded: bool,
    pub elapsed_ms: f64,
    pub error: Option<String>,
}

impl SweepReport {
    pub(crate) fn start(
        mode: StrategyKind,
        device: Device,
        device_model: &str,
        outdir_prefix: PathBuf,
    ) -> Self {
        Self {
            meta: SweepMeta {
                schema_version: SCHEMA_VERSION,
                version: env!("CARGO_PKG_VERSION").to_string(),
                mode,
                device,
                device_model: device_model.to_string(),
                outdir_prefix,
                started_at: Utc::now(),
                finished_at: None,
            },
            precisions: Vec::new(),
            status: SweepStatus::Running,
        }
    }

    pub(crate) fn finish(mut self, succeeded: bool) -> Self {
        self.meta.finished_at = Some(Utc::now());
        self.status = if succeeded {
            SweepStatus::Passed
        } else {
            SweepStatus::Failed
        };
        self
    }

    /// Whether every planned measurement of every precision succeeded
    pub fn succeeded(&self) -> bool {
        self.status == SweepStatus::Passed
    }

    /// Measurements across all precisions, in execution order
    pub fn measurements(&self) -> impl Iterator<Item = (Precision, &MeasurementRecord)> {
        self.precisions
            .iter()
            .flat_map(|p| p.measurements.iter().map(move |m| (p.precision, m)))
    }

    /// The first failed measurement, if any
    pub fn first_failure(&self) -> Option<(Precision, &MeasurementRecord)> {
        self.measurements().find(|(_, m)| !m.succeeded)
    }
}

impl PrecisionReport {
    pub(crate) fn new(precision: Precision) -> Self {
        Self {
            precision,
            planned: Vec::new(),
            measurements: Vec::new(),
            status: SweepStatus::Running,
            error: None,
        }
    }

    /// Planned batch sizes that were never measured
    pub fn skipped(&self) -> &[u32] {
        let done = self.measurements.len().min(self.planned.len());
        &self.planned[done..]
    }
}
