//! Sweep Controller
//!
//! Runs the two-level sweep: for each precision, plan batch sizes with the
//! strategy, then measure each one. Both levels are fail-fast. The first
//! failed measurement ends its precision, and the first failed precision
//! ends the sweep.
//!
//! Each measurement is driven through the lifecycle. CONFIGURE starts device
//! telemetry (cuda only, when enabled) and installs the numeric override flag
//! for fp32 on listed device models. CLEANUP removes the flag first, then
//! stops telemetry.

use crate::RunnerError;
use crate::lifecycle::drive;
use crate::report::{MeasurementRecord, PrecisionReport, SweepReport, SweepStatus};
use crate::strategy::{BatchRun, ExecutionStrategy};
use crate::telemetry::TelemetryMonitor;
use sharebench_core::{Device, DeviceConfig, MAX_ITERS_PER_EPOCH, Precision, Trial};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

/// Flag disabling reduced-precision tensor math for fp32 runs
pub const NUMERIC_OVERRIDE_FLAG: &str = "NVIDIA_TF32_OVERRIDE";

/// What to sweep and where results go
#[derive(Debug, Clone, PartialEq)]
pub struct SweepOptions {
    /// Precisions, in sweep order
    pub precisions: Vec<Precision>,
    /// Target device
    pub device: Device,
    /// Device model name, used in paths and override decisions
    pub device_model: String,
    /// Epochs per measurement
    pub epochs: u32,
    /// Iteration cap per epoch
    pub iters_per_epoch: u64,
    /// Root of the output tree
    pub outdir_prefix: PathBuf,
    /// Collect device telemetry around each measurement
    pub telemetry: bool,
    /// Device models on which fp32 runs get the numeric override flag
    pub numeric_override_models: Vec<String>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            precisions: vec![Precision::Fp32, Precision::Amp],
            device: Device::Cuda,
            device_model: "v100".to_string(),
            epochs: 10,
            iters_per_epoch: MAX_ITERS_PER_EPOCH,
            outdir_prefix: PathBuf::from("runs"),
            telemetry: true,
            numeric_override_models: vec!["a100".to_string()],
        }
    }
}

impl SweepOptions {
    /// `<prefix>/<device>/<model>/<precision>`
    pub fn precision_prefix(&self, precision: Precision) -> PathBuf {
        self.outdir_prefix
            .join(self.device.as_str())
            .join(&self.device_model)
            .join(precision.as_str())
    }

    /// Whether measurements at `precision` get the numeric override flag
    pub fn needs_numeric_override(&self, precision: Precision) -> bool {
        self.device.is_cuda()
            && precision == Precision::Fp32
            && self
                .numeric_override_models
                .iter()
                .any(|model| model.eq_ignore_ascii_case(&self.device_model))
    }
}

/// Drives a strategy over precisions and batch sizes
pub struct Sweep<'a> {
    strategy: &'a dyn ExecutionStrategy,
    telemetry: Option<&'a dyn TelemetryMonitor>,
}

impl<'a> Sweep<'a> {
    /// Sweep with `strategy` and no telemetry
    pub fn new(strategy: &'a dyn ExecutionStrategy) -> Self {
        Self {
            strategy,
            telemetry: None,
        }
    }

    /// Collect telemetry with `monitor` when the options ask for it
    pub fn with_telemetry(mut self, monitor: &'a dyn TelemetryMonitor) -> Self {
        self.telemetry = Some(monitor);
        self
    }

    /// Reject option sets the strategy cannot run. Nothing is touched when
    /// this fails.
    pub fn check(&self, options: &SweepOptions) -> Result<(), RunnerError> {
        if options.precisions.is_empty() {
            return Err(RunnerError::NoPrecisions);
        }
        let kind = self.strategy.kind();
        if kind.requires_cuda() && !options.device.is_cuda() {
            return Err(RunnerError::RequiresCuda {
                mode: kind,
                device: options.device,
            });
        }
        Ok(())
    }

    /// Plan every precision without measuring
    pub fn plan(
        &self,
        trial: &dyn Trial,
        options: &SweepOptions,
    ) -> Result<Vec<(Precision, Vec<u32>)>, RunnerError> {
        self.check(options)?;
        let mut env = DeviceConfig::new();
        options
            .precisions
            .iter()
            .map(|&precision| -> Result<_, RunnerError> {
                let plan = self.strategy.plan_batch_sizes(
                    trial,
                    options.device,
                    precision,
                    &mut env,
                )?;
                Ok((precision, plan))
            })
            .collect()
    }

    /// Run the sweep with a fresh device configuration
    pub fn run(
        &self,
        trial: &dyn Trial,
        options: &SweepOptions,
    ) -> Result<SweepReport, RunnerError> {
        let mut env = DeviceConfig::new();
        self.run_in(trial, options, &mut env)
    }

    /// Run the sweep against `env`. Every value a measurement installs is
    /// gone again when the measurement ends.
    pub fn run_in(
        &self,
        trial: &dyn Trial,
        options: &SweepOptions,
        env: &mut DeviceConfig,
    ) -> Result<SweepReport, RunnerError> {
        self.check(options)?;
        let mode = self.strategy.mode();
        let mut report = SweepReport::start(
            self.strategy.kind(),
            options.device,
            &options.device_model,
            options.outdir_prefix.clone(),
        );

        if options.telemetry && options.device.is_cuda() && self.telemetry.is_none() {
            warn!(mode, "Telemetry requested but no monitor configured");
        }

        info!(mode, precisions = ?options.precisions, "Sweeping precisions ...");
        for &precision in &options.precisions {
            info!(mode, %precision, "Measuring precision ...");
            let section = self.sweep_precision(trial, options, precision, env);
            let passed = section.status == SweepStatus::Passed;
            report.precisions.push(section);
            if !passed {
                error!(mode, %precision, "Precision failed, stopping sweep");
                return Ok(report.finish(false));
            }
        }

        info!(mode, "Sweep finished");
        Ok(report.finish(true))
    }

    fn sweep_precision(
        &self,
        trial: &dyn Trial,
        options: &SweepOptions,
        precision: Precision,
        env: &mut DeviceConfig,
    ) -> PrecisionReport {
        let mode = self.strategy.mode();
        let mut section = PrecisionReport::new(precision);

        match self
            .strategy
            .plan_batch_sizes(trial, options.device, precision, env)
        {
            Ok(plan) => section.planned = plan,
            Err(e) => {
                error!(mode, %precision, "Planning failed: {}", e);
                section.error = Some(e.to_string());
                section.status = SweepStatus::Failed;
                return section;
            }
        }

        let prefix = options.precision_prefix(precision);
        let planned = section.planned.clone();
        for batch in planned {
            let record = self.measure(trial, options, precision, batch, &prefix, env);
            let succeeded = record.succeeded;
            section.measurements.push(record);
            if !succeeded {
                error!(mode, %precision, batch, "B = {} failed!", batch);
                section.status = SweepStatus::Failed;
                return section;
            }
        }

        section.status = SweepStatus::Passed;
        section
    }

    fn measure(
        &self,
        trial: &dyn Trial,
        options: &SweepOptions,
        precision: Precision,
        batch: u32,
        prefix: &Path,
        env: &mut DeviceConfig,
    ) -> MeasurementRecord {
        let mode = self.strategy.mode();
        let outdir = self.strategy.outdir_mode_batch(prefix, batch);
        let telemetry = self
            .telemetry
            .filter(|_| options.telemetry && options.device.is_cuda());
        let run = BatchRun {
            trial,
            device: options.device,
            precision,
            epochs: options.epochs,
            iters_per_epoch: options.iters_per_epoch,
            outdir: Some(&outdir),
        };

        info!(
            mode,
            %precision,
            batch,
            outdir = %outdir.display(),
            "Running with B = {} ...",
            batch
        );
        let start = Instant::now();
        let result = drive(
            mode,
            env,
            |env, teardown| {
                if let Some(monitor) = telemetry {
                    let session = monitor.start(&options.device_model, &outdir)?;
                    teardown.defer("stop telemetry", move |_| Ok(session.stop()?));
                }
                if options.needs_numeric_override(precision) {
                    env.install(NUMERIC_OVERRIDE_FLAG, "0")?;
                    teardown.defer("remove numeric override", |env| {
                        env.remove(NUMERIC_OVERRIDE_FLAG)?;
                        Ok(())
                    });
                }
                Ok(true)
            },
            |env| self.strategy.execute_batch(batch, &run, env),
        );
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let (succeeded, error) = match result {
            Ok(succeeded) => (succeeded, None),
            Err(e) => {
                error!(mode, batch, "Measurement error: {}", e);
                (false, Some(e.to_string()))
            }
        };
        info!(mode, batch, succeeded, elapsed_ms, "--> {}", if succeeded { "OK" } else { "FAIL" });

        MeasurementRecord {
            batch_size: batch,
            outdir,
            succeeded,
            elapsed_ms,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{PlannerParams, Strategy, StrategyOptions, testing::RecordingRunner};
    use crate::telemetry::{TelemetryError, TelemetrySession};
    use sharebench_core::{StrategyKind, TrialError, TrialRequest};
    use std::sync::{Arc, Mutex};

    fn hfta(max_batch_size: u32) -> Strategy {
        Strategy::build(
            StrategyKind::Hfta,
            StrategyOptions {
                planner: Some(PlannerParams {
                    max_batch_size,
                    ..PlannerParams::hfta()
                }),
                ..StrategyOptions::default()
            },
        )
    }

    fn options(prefix: &Path) -> SweepOptions {
        SweepOptions {
            precisions: vec![Precision::Fp32, Precision::Amp],
            device: Device::Cuda,
            device_model: "m1".to_string(),
            epochs: 1,
            iters_per_epoch: 5,
            outdir_prefix: prefix.to_path_buf(),
            telemetry: false,
            numeric_override_models: vec!["a100".to_string()],
        }
    }

    #[derive(Default)]
    struct CountingMonitor {
        started: Mutex<Vec<PathBuf>>,
        stopped: Arc<Mutex<usize>>,
        fail_start: bool,
    }

    struct CountingSession(Arc<Mutex<usize>>);

    impl TelemetrySession for CountingSession {
        fn stop(self: Box<Self>) -> Result<(), TelemetryError> {
            *self.0.lock().unwrap() += 1;
            Ok(())
        }
    }

    impl TelemetryMonitor for CountingMonitor {
        fn start(
            &self,
            _profile: &str,
            outdir: &Path,
        ) -> Result<Box<dyn TelemetrySession>, TelemetryError> {
            if self.fail_start {
                return Err(TelemetryError::Query("no device".into()));
            }
            self.started.lock().unwrap().push(outdir.to_path_buf());
            Ok(Box::new(CountingSession(Arc::clone(&self.stopped))))
        }
    }

    #[test]
    fn test_default_options() {
        let options = SweepOptions::default();
        assert_eq!(options.device_model, "v100");
        assert_eq!(options.epochs, 10);
        assert_eq!(
            options.precision_prefix(Precision::Amp),
            PathBuf::from("runs/cuda/v100/amp")
        );
    }

    #[test]
    fn test_failed_measurement_stops_the_whole_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let measured = Mutex::new(Vec::new());
        let trial = |req: &TrialRequest| -> Result<bool, TrialError> {
            if req.is_dry_run() {
                return Ok(req.batch <= 4);
            }
            measured.lock().unwrap().push((req.precision, req.batch));
            Ok(!(req.precision == Precision::Fp32 && req.batch == 4))
        };

        let strategy = hfta(64);
        let report = Sweep::new(&strategy).run(&trial, &options(dir.path())).unwrap();

        assert!(!report.succeeded());
        assert_eq!(report.precisions.len(), 1);
        assert_eq!(report.precisions[0].planned, vec![1, 2, 3, 4]);
        let measured = measured.into_inner().unwrap();
        assert_eq!(measured.last(), Some(&(Precision::Fp32, 4)));
        assert!(measured.iter().all(|(p, _)| *p == Precision::Fp32));
    }

    #[test]
    fn test_numeric_override_scoped_to_measurement() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Mutex::new(Vec::new());
        let trial = |req: &TrialRequest| -> Result<bool, TrialError> {
            if req.is_dry_run() {
                assert!(!req.env.contains_key(NUMERIC_OVERRIDE_FLAG));
                return Ok(req.batch <= 2);
            }
            let flag = req.env.get(NUMERIC_OVERRIDE_FLAG).cloned();
            seen.lock().unwrap().push((req.precision, req.batch, flag));
            // Second fp32 measurement fails
            Ok(req.batch < 2)
        };
        let options = SweepOptions {
            device_model: "latest-accelerator".to_string(),
            numeric_override_models: vec!["latest-accelerator".to_string()],
            ..options(dir.path())
        };

        let strategy = hfta(64);
        let mut env = DeviceConfig::new();
        let report = Sweep::new(&strategy).run_in(&trial, &options, &mut env).unwrap();

        assert!(!report.succeeded());
        assert_eq!(
            seen.into_inner().unwrap(),
            vec![
                (Precision::Fp32, 1, Some("0".to_string())),
                (Precision::Fp32, 2, Some("0".to_string())),
            ]
        );
        assert!(env.is_empty());
    }

    #[test]
    fn test_no_override_for_mixed_precision_or_other_models() {
        let options = options(Path::new("/out"));
        assert!(!options.needs_numeric_override(Precision::Fp32));

        let a100 = SweepOptions {
            device_model: "A100".to_string(),
            ..options
        };
        assert!(a100.needs_numeric_override(Precision::Fp32));
        assert!(!a100.needs_numeric_override(Precision::Amp));
        let cpu = SweepOptions {
            device: Device::Cpu,
            ..a100
        };
        assert!(!cpu.needs_numeric_override(Precision::Fp32));
    }

    #[test]
    fn test_output_layout() {
        let dir = tempfile::tempdir().unwrap();
        let trial = |req: &TrialRequest| -> Result<bool, TrialError> { Ok(req.batch <= 8) };
        let options = SweepOptions {
            precisions: vec![Precision::Fp32],
            ..options(dir.path())
        };

        let strategy = hfta(8);
        let report = Sweep::new(&strategy).run(&trial, &options).unwrap();

        assert!(report.succeeded());
        let last = report.precisions[0].measurements.last().unwrap();
        assert_eq!(last.batch_size, 8);
        assert_eq!(last.outdir, dir.path().join("cuda/m1/fp32/hfta/B8"));
        assert!(last.outdir.is_dir());
    }

    #[test]
    fn test_serial_sweep_measures_one_batch_per_precision() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Mutex::new(Vec::new());
        let trial = |req: &TrialRequest| -> Result<bool, TrialError> {
            seen.lock().unwrap().push((req.batch, req.outdir.clone()));
            Ok(true)
        };

        let strategy = Strategy::build(StrategyKind::Serial, StrategyOptions::default());
        let report = Sweep::new(&strategy).run(&trial, &options(dir.path())).unwrap();

        assert!(report.succeeded());
        assert_eq!(
            seen.into_inner().unwrap(),
            vec![
                (0, Some(dir.path().join("cuda/m1/fp32/serial"))),
                (0, Some(dir.path().join("cuda/m1/amp/serial"))),
            ]
        );
    }

    #[test]
    fn test_preconditions_checked_before_any_trial() {
        let calls = Mutex::new(0);
        let trial = |_: &TrialRequest| -> Result<bool, TrialError> {
            *calls.lock().unwrap() += 1;
            Ok(true)
        };
        let cpu = SweepOptions {
            device: Device::Cpu,
            ..options(Path::new("/unused"))
        };

        for kind in [StrategyKind::Concurrent, StrategyKind::Mps] {
            let strategy = Strategy::build(kind, StrategyOptions::default());
            let err = Sweep::new(&strategy).run(&trial, &cpu).unwrap_err();
            assert!(matches!(err, RunnerError::RequiresCuda { .. }));
            assert!(err.is_precondition());
        }

        let empty = SweepOptions {
            precisions: Vec::new(),
            ..options(Path::new("/unused"))
        };
        let strategy = hfta(8);
        assert!(matches!(
            Sweep::new(&strategy).run(&trial, &empty),
            Err(RunnerError::NoPrecisions)
        ));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_telemetry_brackets_every_measurement() {
        let dir = tempfile::tempdir().unwrap();
        let trial = |req: &TrialRequest| -> Result<bool, TrialError> {
            Ok(req.is_dry_run() || req.batch != 2)
        };
        let options = SweepOptions {
            telemetry: true,
            ..options(dir.path())
        };
        let monitor = CountingMonitor::default();

        let strategy = hfta(2);
        let report = Sweep::new(&strategy)
            .with_telemetry(&monitor)
            .run(&trial, &options)
            .unwrap();

        // B = 1 passes, B = 2 fails; both sessions were stopped
        assert!(!report.succeeded());
        assert_eq!(monitor.started.lock().unwrap().len(), 2);
        assert_eq!(*monitor.stopped.lock().unwrap(), 2);
    }

    #[test]
    fn test_telemetry_start_failure_fails_measurement() {
        let dir = tempfile::tempdir().unwrap();
        let measured = Mutex::new(0);
        let trial = |req: &TrialRequest| -> Result<bool, TrialError> {
            if !req.is_dry_run() {
                *measured.lock().unwrap() += 1;
            }
            Ok(true)
        };
        let options = SweepOptions {
            telemetry: true,
            ..options(dir.path())
        };
        let monitor = CountingMonitor {
            fail_start: true,
            ..CountingMonitor::default()
        };

        let strategy = hfta(1);
        let report = Sweep::new(&strategy)
            .with_telemetry(&monitor)
            .run(&trial, &options)
            .unwrap();

        assert!(!report.succeeded());
        let record = &report.precisions[0].measurements[0];
        assert!(record.error.as_deref().is_some_and(|e| e.contains("no device")));
        assert_eq!(*measured.lock().unwrap(), 0);
    }

    #[test]
    fn test_mps_sweep_tears_down_after_failed_device_command() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::failing_on("EXCLUSIVE_PROCESS"));
        let strategy = Strategy::Mps(
            crate::strategy::MpsStrategy::new(
                PlannerParams::concurrent(),
                Default::default(),
                Arc::clone(&runner) as Arc<dyn crate::CommandRunner>,
            )
            .with_privileged(true),
        );
        let trial = |_: &TrialRequest| -> Result<bool, TrialError> { Ok(true) };

        let mut env = DeviceConfig::new();
        let report = Sweep::new(&strategy)
            .run_in(&trial, &options(dir.path()), &mut env)
            .unwrap();

        // Every dry run fails to configure the device, so planning gives up
        assert!(!report.succeeded());
        assert!(report.precisions[0].error.is_some());
        let commands = runner.commands();
        assert!(commands.contains(&"nvidia-cuda-mps-control".to_string()));
        assert_eq!(commands.last().map(String::as_str), Some("nvidia-smi -i 0 -c 0"));
        assert!(env.is_empty());
    }
}
