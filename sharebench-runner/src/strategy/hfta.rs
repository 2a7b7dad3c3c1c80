use super::{BatchRun, ExecutionStrategy, PlannerParams, search_and_sample};
use crate::RunnerError;
use crate::pool::{mk_outdir_and_run_trial, run_workers};
use sharebench_core::{Device, DeviceConfig, Precision, StrategyKind, Trial};
use std::path::Path;

/// One trial training B fused models at once
#[derive(Debug, Clone)]
pub struct HftaStrategy {
    planner: PlannerParams,
}

impl HftaStrategy {
    /// Create with the given planner parameters
    pub fn new(planner: PlannerParams) -> Self {
        Self { planner }
    }
}

impl Default for HftaStrategy {
    fn default() -> Self {
        Self::new(PlannerParams::hfta())
    }
}

impl ExecutionStrategy for HftaStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Hfta
    }

    fn plan_batch_sizes(
        &self,
        trial: &dyn Trial,
        device: Device,
        precision: Precision,
        env: &mut DeviceConfig,
    ) -> Result<Vec<u32>, RunnerError> {
        search_and_sample(self, &self.planner, trial, device, precision, env)
    }

    fn execute_batch(
        &self,
        batch: u32,
        run: &BatchRun<'_>,
        env: &mut DeviceConfig,
    ) -> Result<bool, RunnerError> {
        let request = run.request(batch, run.outdir.map(Path::to_path_buf), env);
        let results = run_workers(1, |_| mk_outdir_and_run_trial(run.trial, &request))?;
        Ok(results.iter().all(|&ok| ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharebench_core::{TrialError, TrialRequest};
    use std::sync::Mutex;

    #[test]
    fn test_single_fused_worker() {
        let seen = Mutex::new(Vec::new());
        let trial = |req: &TrialRequest| -> Result<bool, TrialError> {
            seen.lock().unwrap().push(req.batch);
            Ok(true)
        };
        let run = BatchRun {
            trial: &trial,
            device: Device::Xla,
            precision: Precision::Amp,
            epochs: 1,
            iters_per_epoch: 1,
            outdir: None,
        };

        assert!(HftaStrategy::default()
            .execute_batch(8, &run, &mut DeviceConfig::new())
            .unwrap());
        assert_eq!(*seen.lock().unwrap(), vec![8]);
    }

    #[test]
    fn test_plan_uses_dry_run_settings() {
        let probes = Mutex::new(Vec::new());
        let trial = |req: &TrialRequest| -> Result<bool, TrialError> {
            assert!(req.is_dry_run());
            assert_eq!((req.epochs, req.iters_per_epoch), (2, 3));
            probes.lock().unwrap().push(req.batch);
            Ok(req.batch <= 20)
        };

        let plan = HftaStrategy::default()
            .plan_batch_sizes(&trial, Device::Cuda, Precision::Fp32, &mut DeviceConfig::new())
            .unwrap();

        assert_eq!(plan.len(), 10);
        assert_eq!(plan.last(), Some(&20));
        assert!(plan.windows(2).all(|w| w[0] < w[1]));
        // Repeats default to 1 for hfta, so each size is probed once
        let probes = probes.into_inner().unwrap();
        assert_eq!(probes[..6], [1, 2, 4, 8, 16, 32]);
    }

    #[test]
    fn test_no_feasible_batch_is_a_plan_error() {
        let trial = |_: &TrialRequest| -> Result<bool, TrialError> { Ok(false) };
        let err = HftaStrategy::default()
            .plan_batch_sizes(&trial, Device::Cuda, Precision::Amp, &mut DeviceConfig::new())
            .unwrap_err();
        assert!(matches!(err, RunnerError::Plan { precision: Precision::Amp, .. }));
    }
}
