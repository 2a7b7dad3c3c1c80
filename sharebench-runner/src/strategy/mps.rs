use super::{BatchRun, ConcurrentStrategy, ExecutionStrategy, PlannerParams, search_and_sample};
use crate::RunnerError;
use crate::command::CommandRunner;
use crate::lifecycle::drive;
use sharebench_core::{
    CommandLine, Device, DeviceConfig, Precision, StrategyKind, Trial, is_privileged,
};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{info, warn};

/// Device restriction variable installed while the daemon runs
pub const VISIBLE_DEVICES: &str = "CUDA_VISIBLE_DEVICES";
/// Daemon pipe directory variable
pub const MPS_PIPE_DIRECTORY: &str = "CUDA_MPS_PIPE_DIRECTORY";
/// Daemon log directory variable
pub const MPS_LOG_DIRECTORY: &str = "CUDA_MPS_LOG_DIRECTORY";

/// Device and directories used by the MPS daemon
#[derive(Debug, Clone, PartialEq)]
pub struct MpsSettings {
    /// Device switched into exclusive-process mode
    pub device_index: u32,
    /// Value of `CUDA_MPS_PIPE_DIRECTORY`
    pub pipe_dir: PathBuf,
    /// Value of `CUDA_MPS_LOG_DIRECTORY`
    pub log_dir: PathBuf,
}

impl Default for MpsSettings {
    fn default() -> Self {
        Self {
            device_index: 0,
            pipe_dir: PathBuf::from("/tmp/nvidia-mps"),
            log_dir: PathBuf::from("/tmp/nvidia-log"),
        }
    }
}

/// Concurrent execution under the Multi-Process Service daemon
///
/// Each batch size is bracketed by its own daemon:
///
/// 1. switch the device to exclusive-process mode
/// 2. install the visible-device and MPS directory variables
/// 3. start the daemon
/// 4. run B concurrent workers
/// 5. quit the daemon, reset the compute mode, remove the variables
///
/// Step 5 runs in full whatever happened before it. Privileged commands get
/// a `sudo` prefix unless the process already runs as root.
pub struct MpsStrategy {
    planner: PlannerParams,
    settings: MpsSettings,
    commands: Arc<dyn CommandRunner>,
    privileged: bool,
}

impl MpsStrategy {
    /// Create a strategy issuing device commands through `commands`
    pub fn new(
        planner: PlannerParams,
        settings: MpsSettings,
        commands: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            planner,
            settings,
            commands,
            privileged: is_privileged(),
        }
    }

    /// Override privilege detection
    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    fn compute_mode(&self, mode: &str) -> CommandLine {
        CommandLine::new(
            "nvidia-smi",
            [
                "-i".to_string(),
                self.settings.device_index.to_string(),
                "-c".to_string(),
                mode.to_string(),
            ],
        )
        .elevated(self.privileged)
    }

    fn control(&self) -> CommandLine {
        CommandLine::new("nvidia-cuda-mps-control", Vec::<String>::new())
    }

    fn sharing_env(&self) -> [(&'static str, String); 3] {
        [
            (VISIBLE_DEVICES, self.settings.device_index.to_string()),
            (MPS_PIPE_DIRECTORY, self.settings.pipe_dir.display().to_string()),
            (MPS_LOG_DIRECTORY, self.settings.log_dir.display().to_string()),
        ]
    }

    /// Set up the daemon, registering teardown for every step before any of
    /// them can fail. Returns whether the daemon is ready.
    fn configure<'s>(
        &'s self,
        env: &mut DeviceConfig,
        teardown: &mut crate::Teardown<'s>,
    ) -> Result<bool, RunnerError> {
        let commands = &*self.commands;
        let mode = self.mode();

        // Registered first so they run last. Only keys installed here are removed.
        let installed: Rc<RefCell<Vec<&'static str>>> = Rc::default();
        let owned = Rc::clone(&installed);
        teardown.defer("remove sharing variables", move |env| {
            for key in owned.take() {
                env.remove(key)?;
            }
            Ok(())
        });
        teardown.defer("reset compute mode", move |env| {
            let command = self.compute_mode("0");
            if commands.run(&command, None, env) {
                Ok(())
            } else {
                Err(RunnerError::CommandFailed(command.to_string()))
            }
        });
        teardown.defer("quit daemon", move |env| {
            let command = self.control().elevated(self.privileged);
            if commands.run(&command, Some("quit"), env) {
                Ok(())
            } else {
                Err(RunnerError::CommandFailed(command.to_string()))
            }
        });

        let exclusive = self.compute_mode("EXCLUSIVE_PROCESS");
        if !commands.run(&exclusive, None, env) {
            warn!(mode, command = %exclusive, "Could not switch compute mode");
            return Ok(false);
        }

        for (key, value) in self.sharing_env() {
            env.install(key, value)?;
            installed.borrow_mut().push(key);
        }

        let start = CommandLine::new("nvidia-cuda-mps-control", ["-d"]);
        if !commands.run(&start, None, env) {
            warn!(mode, command = %start, "Could not start daemon");
            return Ok(false);
        }
        info!(mode, "MPS daemon started");
        Ok(true)
    }
}

impl ExecutionStrategy for MpsStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Mps
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
        if !run.device.is_cuda() {
            return Err(RunnerError::RequiresCuda {
                mode: self.kind(),
                device: run.device,
            });
        }

        drive(
            self.mode(),
            env,
            |env, teardown| self.configure(env, teardown),
            |env| ConcurrentStrategy::fan_out(self.kind(), batch, run, env),
        )
    }
}
