use super::{BatchRun, ExecutionStrategy};
use crate::RunnerError;
use crate::pool::{mk_outdir_and_run_trial, run_workers};
use sharebench_core::{Device, DeviceConfig, Precision, StrategyKind, Trial};
use std::path::{Path, PathBuf};
use tracing::info;

/// Baseline: one unfused trial, batch size always 1
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialStrategy;

impl ExecutionStrategy for SerialStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Serial
    }

    fn plan_batch_sizes(
        &self,
        _trial: &dyn Trial,
        _device: Device,
        _precision: Precision,
        _env: &mut DeviceConfig,
    ) -> Result<Vec<u32>, RunnerError> {
        info!(mode = self.mode(), "Planned Bs to measure: [1] !");
        Ok(vec![1])
    }

    fn execute_batch(
        &self,
        batch: u32,
        run: &BatchRun<'_>,
        env: &mut DeviceConfig,
    ) -> Result<bool, RunnerError> {
        if batch != 1 {
            return Err(RunnerError::SerialBatchSize(batch));
        }
        let request = run.request(0, run.outdir.map(Path::to_path_buf), env);
        let results = run_workers(1, |_| mk_outdir_and_run_trial(run.trial, &request))?;
        Ok(results.iter().all(|&ok| ok))
    }

    fn outdir_mode_batch(&self, prefix: &Path, _batch: u32) -> PathBuf {
        prefix.join(self.mode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharebench_core::{TrialError, TrialRequest};
    use std::sync::Mutex;

    #[test]
    fn test_rejects_batch_other_than_one() {
        let trial = |_: &TrialRequest| -> Result<bool, TrialError> { Ok(true) };
        let run = BatchRun {
            trial: &trial,
            device: Device::Cpu,
            precision: Precision::Fp32,
            epochs: 1,
            iters_per_epoch: 1,
            outdir: None,
        };
        let mut env = DeviceConfig::new();

        let err = SerialStrategy.execute_batch(2, &run, &mut env).unwrap_err();
        assert!(matches!(err, RunnerError::SerialBatchSize(2)));
        assert!(SerialStrategy.execute_batch(1, &run, &mut env).unwrap());
    }

    #[test]
    fn test_plans_single_batch_without_probing() {
        let calls = Mutex::new(0);
        let trial = |_: &TrialRequest| -> Result<bool, TrialError> {
            *calls.lock().unwrap() += 1;
            Ok(true)
        };
        let plan = SerialStrategy
            .plan_batch_sizes(&trial, Device::Cuda, Precision::Amp, &mut DeviceConfig::new())
            .unwrap();
        assert_eq!(plan, vec![1]);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_single_worker_runs_unfused() {
        let dir = tempfile::tempdir().unwrap();
        let outdir = dir.path().join("serial");
        let seen = Mutex::new(Vec::new());
        let trial = |req: &TrialRequest| -> Result<bool, TrialError> {
            seen.lock().unwrap().push((req.batch, req.outdir.clone()));
            Ok(true)
        };
        let run = BatchRun {
            trial: &trial,
            device: Device::Cuda,
            precision: Precision::Fp32,
            epochs: 5,
            iters_per_epoch: 100,
            outdir: Some(&outdir),
        };

        assert!(SerialStrategy.execute_batch(1, &run, &mut DeviceConfig::new()).unwrap());
        assert_eq!(*seen.lock().unwrap(), vec![(0, Some(outdir.clone()))]);
        assert!(outdir.is_dir());
    }
}
