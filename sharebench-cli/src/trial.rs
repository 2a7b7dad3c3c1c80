//! Trial backed by an external training command

use crate::config::TrialConfig;
use sharebench_core::{Trial, TrialError, TrialRequest};
use std::collections::BTreeMap;
use std::process::{Command, Stdio};
use tracing::debug;

/// Runs a training program once per trial request
///
/// Argument placeholders are substituted from the request:
/// `{batch}`, `{device}`, `{precision}`, `{epochs}`, `{iters_per_epoch}`.
/// When the request has an output directory, `<outdir_flag> <path>` is appended.
#[derive(Debug, Clone)]
pub struct CommandTrial {
    program: String,
    args: Vec<String>,
    outdir_flag: String,
    env: BTreeMap<String, String>,
}

impl CommandTrial {
    /// Create a trial running `program` with an argument template
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            outdir_flag: "--outdir".to_string(),
            env: BTreeMap::new(),
        }
    }

    /// Build from the `[trial]` config section; `None` when no program is set
    pub fn from_config(config: &TrialConfig) -> Option<Self> {
        let program = config.program.clone()?;
        Some(Self {
            program,
            args: config.args.clone(),
            outdir_flag: config.outdir_flag.clone(),
            env: config.env.clone(),
        })
    }

    /// Replace the program and argument template, keeping flag and env
    pub fn with_command(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.program = program.into();
        self.args = args;
        self
    }

    /// Flag passed before the output directory
    pub fn with_outdir_flag(mut self, flag: impl Into<String>) -> Self {
        self.outdir_flag = flag.into();
        self
    }

    /// Arguments for one request
    pub fn render_args(&self, request: &TrialRequest) -> Vec<String> {
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace("{batch}", &request.batch.to_string())
                    .replace("{device}", request.device.as_str())
                    .replace("{precision}", request.precision.as_str())
                    .replace("{epochs}", &request.epochs.to_string())
                    .replace("{iters_per_epoch}", &request.iters_per_epoch.to_string())
            })
            .collect();

        if let Some(outdir) = &request.outdir {
            args.push(self.outdir_flag.clone());
            args.push(outdir.display().to_string());
        }
        args
    }
}

impl Trial for CommandTrial {
    fn run(&self, request: &TrialRequest) -> Result<bool, TrialError> {
        let args = self.render_args(request);
        debug!(program = %self.program, ?args, "Launching trial");

        let status = Command::new(&self.program)
            .args(&args)
            .envs(&self.env)
            .envs(&request.env)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| TrialError::Launch {
                program: self.program.clone(),
                source,
            })?;

        debug!(program = %self.program, %status, "Trial exited");
        Ok(status.success())
    }
}
