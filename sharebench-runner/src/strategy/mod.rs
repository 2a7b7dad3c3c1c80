//! Execution Strategies
//!
//! A strategy decides how one batch size B is executed: how many workers run,
//! what device state is installed around them and how their results combine.
//!
//! | Mode | Workers | Trial batch | Output |
//! |------|---------|-------------|--------|
//! | `serial` | 1 (B must be 1) | 0 | `<prefix>/serial` |
//! | `concurrent` | B threads | 0 each | `<prefix>/concurrent/B<B>/idx<b>` |
//! | `mps` | B threads under MPS | 0 each | `<prefix>/mps/B<B>/idx<b>` |
//! | `hfta` | 1 | B (fused) | `<prefix>/hfta/B<B>` |
//!
//! The hardware-sharing modes plan their batch sizes by probing their own
//! `execute_batch` at dry-run settings, so a probe sees exactly the resource
//! policy the real measurement will use.

mod concurrent;
mod hfta;
mod mps;
mod serial;

pub use concurrent::ConcurrentStrategy;
pub use hfta::HftaStrategy;
pub use mps::{MPS_LOG_DIRECTORY, MPS_PIPE_DIRECTORY, MpsSettings, MpsStrategy, VISIBLE_DEVICES};
pub use serial::SerialStrategy;

use crate::RunnerError;
use crate::command::{CommandRunner, SystemCommandRunner};
use sharebench_core::{
    Device, DeviceConfig, ParseTagError, Precision, StrategyKind, Trial, TrialRequest,
};
use sharebench_plan::{expovariate_plan, find_max_batch_size};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Dry-run search and sampling parameters of a hardware-sharing strategy
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerParams {
    /// Consecutive dry-run successes required for a batch size to count
    pub dry_run_repeats: u32,
    /// Maximum number of batch sizes measured
    pub max_num_batch_sizes: usize,
    /// Decay rate of the sampling density
    pub lambda: f64,
    /// Epochs per dry run
    pub dry_run_epochs: u32,
    /// Iteration cap per dry-run epoch
    pub dry_run_iters_per_epoch: u64,
    /// Largest batch size the search will probe
    pub max_batch_size: u32,
}

impl PlannerParams {
    /// Defaults for `concurrent` and `mps`
    pub fn concurrent() -> Self {
        Self {
            dry_run_repeats: 10,
            max_num_batch_sizes: 5,
            lambda: 4.0,
            dry_run_epochs: 2,
            dry_run_iters_per_epoch: 10,
            max_batch_size: 64,
        }
    }

    /// Defaults for `hfta`
    pub fn hfta() -> Self {
        Self {
            dry_run_repeats: 1,
            max_num_batch_sizes: 10,
            lambda: 4.0,
            dry_run_epochs: 2,
            dry_run_iters_per_epoch: 3,
            max_batch_size: 4096,
        }
    }

    /// Defaults for a strategy kind (`serial` does not plan and uses the
    /// concurrent values only for completeness)
    pub fn defaults_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Hfta => Self::hfta(),
            _ => Self::concurrent(),
        }
    }
}

/// Everything needed to run one batch size except the device configuration
#[derive(Clone, Copy)]
pub struct BatchRun<'a> {
    /// Workload
    pub trial: &'a dyn Trial,
    /// Device to run on
    pub device: Device,
    /// Numeric precision
    pub precision: Precision,
    /// Epochs per trial
    pub epochs: u32,
    /// Iteration cap per epoch
    pub iters_per_epoch: u64,
    /// Measurement directory, `None` for dry runs
    pub outdir: Option<&'a Path>,
}

impl BatchRun<'_> {
    /// Request for one worker
    pub fn request(&self, batch: u32, outdir: Option<PathBuf>, env: &DeviceConfig) -> TrialRequest {
        TrialRequest {
            batch,
            device: self.device,
            precision: self.precision,
            epochs: self.epochs,
            iters_per_epoch: self.iters_per_epoch,
            outdir,
            env: env.snapshot(),
        }
    }
}

/// Capability interface shared by all strategies
pub trait ExecutionStrategy: Send + Sync {
    /// Which strategy this is
    fn kind(&self) -> StrategyKind;

    /// Mode name used in output paths and logs
    fn mode(&self) -> &'static str {
        self.kind().mode()
    }

    /// Batch sizes to measure for one precision, in execution order
    fn plan_batch_sizes(
        &self,
        trial: &dyn Trial,
        device: Device,
        precision: Precision,
        env: &mut DeviceConfig,
    ) -> Result<Vec<u32>, RunnerError>;

    /// Execute one batch size. `Ok(false)` means the measurement failed.
    fn execute_batch(
        &self,
        batch: u32,
        run: &BatchRun<'_>,
        env: &mut DeviceConfig,
    ) -> Result<bool, RunnerError>;

    /// Output directory of batch size `batch` under the per-precision prefix
    fn outdir_mode_batch(&self, prefix: &Path, batch: u32) -> PathBuf {
        prefix.join(self.mode()).join(format!("B{}", batch))
    }
}

/// Search for the largest feasible batch size with dry-run probes of
/// `strategy`, then sample the batch sizes to measure.
pub(crate) fn search_and_sample<S>(
    strategy: &S,
    params: &PlannerParams,
    trial: &dyn Trial,
    device: Device,
    precision: Precision,
    env: &mut DeviceConfig,
) -> Result<Vec<u32>, RunnerError>
where
    S: ExecutionStrategy + ?Sized,
{
    let mode = strategy.mode();
    let dry_run = BatchRun {
        trial,
        device,
        precision,
        epochs: params.dry_run_epochs,
        iters_per_epoch: params.dry_run_iters_per_epoch,
        outdir: None,
    };

    info!(mode, %precision, "Searching for max B ...");
    let max_b = find_max_batch_size(
        |batch| {
            info!(mode, "Trying B: {} ...", batch);
            let succeeded = match strategy.execute_batch(batch, &dry_run, env) {
                Ok(succeeded) => succeeded,
                Err(e) => {
                    warn!(mode, batch, "Dry run error: {}", e);
                    false
                }
            };
            info!(mode, "--> {}", if succeeded { "OK" } else { "FAIL" });
            succeeded
        },
        params.dry_run_repeats,
        params.max_batch_size,
    )
    .map_err(|source| RunnerError::Plan { precision, source })?;
    info!(mode, "Found max B: {} !", max_b);

    let plan = expovariate_plan(max_b, params.max_num_batch_sizes, params.lambda)
        .map_err(|source| RunnerError::Plan { precision, source })?;
    info!(mode, "Planned Bs to measure: {:?} !", plan);
    Ok(plan)
}

/// Options consumed by the strategy factory
#[derive(Clone)]
pub struct StrategyOptions {
    /// Planner overrides; `None` keeps the strategy's defaults
    pub planner: Option<PlannerParams>,
    /// MPS device and directories
    pub mps: MpsSettings,
    /// Runner for device and daemon commands
    pub commands: Arc<dyn CommandRunner>,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            planner: None,
            mps: MpsSettings::default(),
            commands: Arc::new(SystemCommandRunner),
        }
    }
}

/// The closed set of strategies
pub enum Strategy {
    /// One trial at a time
    Serial(SerialStrategy),
    /// B trials as threads
    Concurrent(ConcurrentStrategy),
    /// B threads under the Multi-Process Service
    Mps(MpsStrategy),
    /// One fused trial of width B
    Hfta(HftaStrategy),
}

impl Strategy {
    /// Build a strategy of the given kind
    pub fn build(kind: StrategyKind, options: StrategyOptions) -> Self {
        let planner = options
            .planner
            .unwrap_or_else(|| PlannerParams::defaults_for(kind));
        match kind {
            StrategyKind::Serial => Strategy::Serial(SerialStrategy),
            StrategyKind::Concurrent => Strategy::Concurrent(ConcurrentStrategy::new(planner)),
            StrategyKind::Mps => {
                Strategy::Mps(MpsStrategy::new(planner, options.mps, options.commands))
            }
            StrategyKind::Hfta => Strategy::Hfta(HftaStrategy::new(planner)),
        }
    }

    /// Build a strategy from its mode name
    pub fn from_name(name: &str, options: StrategyOptions) -> Result<Self, ParseTagError> {
        Ok(Self::build(name.parse()?, options))
    }

    fn inner(&self) -> &dyn ExecutionStrategy {
        match self {
            Strategy::Serial(s) => s,
            Strategy::Concurrent(s) => s,
            Strategy::Mps(s) => s,
            Strategy::Hfta(s) => s,
        }
    }
}

impl ExecutionStrategy for Strategy {
    fn kind(&self) -> StrategyKind {
        self.inner().kind()
    }

    fn plan_batch_sizes(
        &self,
        trial: &dyn Trial,
        device: Device,
        precision: Precision,
        env: &mut DeviceConfig,
    ) -> Result<Vec<u32>, RunnerError> {
        self.inner().plan_batch_sizes(trial, device, precision, env)
    }

    fn execute_batch(
        &self,
        batch: u32,
        run: &BatchRun<'_>,
        env: &mut DeviceConfig,
    ) -> Result<bool, RunnerError> {
        self.inner().execute_batch(batch, run, env)
    }

    fn outdir_mode_batch(&self, prefix: &Path, batch: u32) -> PathBuf {
        self.inner().outdir_mode_batch(prefix, batch)
    }
}
