use super::{BatchRun, ExecutionStrategy, PlannerParams, search_and_sample};
use crate::RunnerError;
use crate::pool::{mk_outdir_and_run_trial, run_workers};
use sharebench_core::{Device, DeviceConfig, Precision, StrategyKind, Trial};
use tracing::warn;

/// B independent trials started together as parallel threads
#[derive(Debug, Clone)]
pub struct ConcurrentStrategy {
    planner: PlannerParams,
}

impl ConcurrentStrategy {
    /// Create with the given planner parameters
    pub fn new(planner: PlannerParams) -> Self {
        Self { planner }
    }

    /// Planner parameters in use
    pub fn planner(&self) -> &PlannerParams {
        &self.planner
    }

    /// Run B workers on behalf of `kind`. Shared with MPS, which runs the
    /// same fan-out under its daemon.
    pub(crate) fn fan_out(
        kind: StrategyKind,
        batch: u32,
        run: &BatchRun<'_>,
        env: &DeviceConfig,
    ) -> Result<bool, RunnerError> {
        if !run.device.is_cuda() {
            return Err(RunnerError::RequiresCuda {
                mode: kind,
                device: run.device,
            });
        }

        let requests: Vec<_> = (0..batch)
            .map(|b| {
                let outdir = run.outdir.map(|dir| dir.join(format!("idx{}", b)));
                run.request(0, outdir, env)
            })
            .collect();

        let results = run_workers(requests.len(), |index| {
            mk_outdir_and_run_trial(run.trial, &requests[index])
        })?;

        let failed: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, ok)| !**ok)
            .map(|(i, _)| i)
            .collect();
        if !failed.is_empty() {
            warn!(mode = kind.mode(), batch, ?failed, "Workers failed");
        }
        Ok(failed.is_empty())
    }
}

impl Default for ConcurrentStrategy {
    fn default() -> Self {
        Self::new(PlannerParams::concurrent())
    }
}

impl ExecutionStrategy for ConcurrentStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Concurrent
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
        Self::fan_out(self.kind(), batch, run, env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharebench_core::{TrialError, TrialRequest};
    use std::sync::Mutex;

    fn small_planner() -> PlannerParams {
        PlannerParams {
            dry_run_repeats: 2,
            max_num_batch_sizes: 3,
            lambda: 4.0,
            dry_run_epochs: 2,
            dry_run_iters_per_epoch: 10,
            max_batch_size: 64,
        }
    }

    #[test]
    fn test_one_failing_worker_fails_batch_but_siblings_finish() {
        let dir = tempfile::tempdir().unwrap();
        let outdir = dir.path().join("concurrent/B4");
        let trial = |req: &TrialRequest| -> Result<bool, TrialError> {
            let outdir = req.outdir.as_ref().unwrap();
            std::fs::write(outdir.join("done"), b"ok")?;
            Ok(!outdir.ends_with("idx2"))
        };
        let run = BatchRun {
            trial: &trial,
            device: Device::Cuda,
            precision: Precision::Fp32,
            epochs: 1,
            iters_per_epoch: 1,
            outdir: Some(&outdir),
        };

        let strategy = ConcurrentStrategy::default();
        assert!(!strategy.execute_batch(4, &run, &mut DeviceConfig::new()).unwrap());
        for b in 0..4 {
            assert!(outdir.join(format!("idx{}", b)).join("done").is_file());
        }
    }

    #[test]
    fn test_workers_receive_unfused_batch_and_own_outdir() {
        let seen = Mutex::new(Vec::new());
        let trial = |req: &TrialRequest| -> Result<bool, TrialError> {
            seen.lock().unwrap().push((req.batch, req.outdir.clone()));
            Ok(true)
        };
        let run = BatchRun {
            trial: &trial,
            device: Device::Cuda,
            precision: Precision::Amp,
            epochs: 1,
            iters_per_epoch: 1,
            outdir: None,
        };

        assert!(ConcurrentStrategy::default()
            .execute_batch(3, &run, &mut DeviceConfig::new())
            .unwrap());
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(batch, dir)| *batch == 0 && dir.is_none()));
    }

    #[test]
    fn test_requires_cuda() {
        let trial = |_: &TrialRequest| -> Result<bool, TrialError> { Ok(true) };
        let run = BatchRun {
            trial: &trial,
            device: Device::Cpu,
            precision: Precision::Fp32,
            epochs: 1,
            iters_per_epoch: 1,
            outdir: None,
        };
        let err = ConcurrentStrategy::default()
            .execute_batch(2, &run, &mut DeviceConfig::new())
            .unwrap_err();
        assert!(matches!(err, RunnerError::RequiresCuda { .. }));
    }

    #[test]
    fn test_plan_probes_up_to_capacity() {
        // Batches above 12 run out of memory
        let trial = |_: &TrialRequest| -> Result<bool, TrialError> { Ok(true) };
        let capacity = 12u32;
        let probes = Mutex::new(Vec::new());
        let strategy = ConcurrentStrategy::new(small_planner());

        struct Capped<'a> {
            inner: &'a ConcurrentStrategy,
            capacity: u32,
            probes: &'a Mutex<Vec<u32>>,
        }
        impl ExecutionStrategy for Capped<'_> {
            fn kind(&self) -> StrategyKind {
                self.inner.kind()
            }
            fn plan_batch_sizes(
                &self,
                trial: &dyn Trial,
                device: Device,
                precision: Precision,
                env: &mut DeviceConfig,
            ) -> Result<Vec<u32>, RunnerError> {
                search_and_sample(self, self.inner.planner(), trial, device, precision, env)
            }
            fn execute_batch(
                &self,
                batch: u32,
                run: &BatchRun<'_>,
                env: &mut DeviceConfig,
            ) -> Result<bool, RunnerError> {
                self.probes.lock().unwrap().push(batch);
                assert!(run.outdir.is_none());
                assert_eq!(run.iters_per_epoch, 10);
                Ok(batch <= self.capacity && self.inner.execute_batch(batch, run, env)?)
            }
        }

        let capped = Capped {
            inner: &strategy,
            capacity,
            probes: &probes,
        };
        let plan = capped
            .plan_batch_sizes(&trial, Device::Cuda, Precision::Fp32, &mut DeviceConfig::new())
            .unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan.last(), Some(&capacity));
        assert!(plan.windows(2).all(|w| w[0] < w[1]));
        assert!(probes.lock().unwrap().contains(&16));
    }
}
