#![warn(missing_docs)]
//! Sharebench CLI Library
//!
//! Command line front end for batch-size sweeps. Use `sharebench_cli::run()`
//! in a main function to get the full CLI:
//!
//! ```text
//! sharebench run --mode hfta --device-model a100 -- python train.py -B {batch}
//! sharebench plan --mode concurrent --precision fp32
//! sharebench init
//! ```
//!
//! Settings come from a discovered `sharebench.toml`; flags override it.

mod config;
mod formatting;
mod trial;

pub use config::*;
pub use formatting::{format_human_output, format_plan};
pub use trial::CommandTrial;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sharebench_core::{Device, Precision, StrategyKind};
use sharebench_runner::{
    ExecutionStrategy, SmiTelemetry, Strategy, StrategyOptions, Sweep, SweepOptions, SweepReport,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Sharebench CLI arguments
#[derive(Parser, Debug)]
#[command(name = "sharebench")]
#[command(
    author,
    version,
    about = "Sharebench - batch-size sweeps for accelerator sharing strategies"
)]
pub struct Cli {
    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (discovered from the current directory if not given)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan and measure every precision
    Run(SweepArgs),
    /// Run only the planning step and print the batch sizes per precision
    Plan(SweepArgs),
    /// Write a default configuration file
    Init {
        /// Where to write it
        #[arg(default_value = CONFIG_FILE)]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Arguments shared by `run` and `plan`
#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    /// Strategy: serial, concurrent, mps or hfta
    #[arg(long)]
    pub mode: StrategyKind,

    /// Device: cuda, cpu or xla
    #[arg(long)]
    pub device: Option<Device>,

    /// Device model name used in output paths
    #[arg(long)]
    pub device_model: Option<String>,

    /// Precision to sweep (repeat for several, in order)
    #[arg(long = "precision")]
    pub precisions: Vec<Precision>,

    /// Epochs per measurement
    #[arg(long)]
    pub epochs: Option<u32>,

    /// Iteration cap per epoch
    #[arg(long)]
    pub iters_per_epoch: Option<u64>,

    /// Root of the output tree
    #[arg(long)]
    pub outdir: Option<PathBuf>,

    /// Disable device telemetry
    #[arg(long)]
    pub no_telemetry: bool,

    /// Write the JSON report to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Trial program and argument template, after `--`
    #[arg(last = true)]
    pub trial: Vec<String>,
}

impl SweepArgs {
    /// Layer CLI flags over the `[sweep]` section
    pub fn sweep_options(&self, config: &SweepConfig) -> SweepOptions {
        SweepOptions {
            precisions: if self.precisions.is_empty() {
                config.precisions.clone()
            } else {
                self.precisions.clone()
            },
            device: self.device.unwrap_or(config.device),
            device_model: self
                .device_model
                .clone()
                .unwrap_or_else(|| config.device_model.clone()),
            epochs: self.epochs.unwrap_or(config.epochs),
            iters_per_epoch: self.iters_per_epoch.unwrap_or(config.iters_per_epoch),
            outdir_prefix: self
                .outdir
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.outdir_prefix)),
            telemetry: config.telemetry && !self.no_telemetry,
            numeric_override_models: config.numeric_override_models.clone(),
        }
    }

    /// The trial command: `-- <program> <args>` if given, else `[trial]`
    pub fn trial(&self, config: &TrialConfig) -> anyhow::Result<CommandTrial> {
        let configured = CommandTrial::from_config(config);
        match (self.trial.split_first(), configured) {
            (Some((program, args)), Some(trial)) => Ok(trial.with_command(program, args.to_vec())),
            (Some((program, args)), None) => {
                Ok(CommandTrial::new(program, args.to_vec()).with_outdir_flag(&config.outdir_flag))
            }
            (None, Some(trial)) => Ok(trial),
            (None, None) => Err(anyhow::anyhow!(
                "No trial command: pass one after `--` or set [trial] program in {}",
                CONFIG_FILE
            )),
        }
    }
}

/// Run the Sharebench CLI with the process arguments.
/// This is the main entry point for the `sharebench` binary.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the Sharebench CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => SharebenchConfig::load(path)?,
        None => SharebenchConfig::discover().unwrap_or_default(),
    };

    match &cli.command {
        Commands::Run(args) => {
            let report = run_sweep(args, &config)?;
            print!("{}", format_human_output(&report));

            if let Some(path) = &args.output {
                write_report(&report, path)?;
                println!("Report written to: {}", path.display());
            }

            if !report.succeeded() {
                if let Some((precision, failed)) = report.first_failure() {
                    eprintln!("\n{} B = {} failed", precision, failed.batch_size);
                } else {
                    eprintln!("\nSweep failed");
                }
                std::process::exit(1);
            }
        }
        Commands::Plan(args) => {
            let plans = plan_sweep(args, &config)?;
            print!("{}", format_plan(args.mode.mode(), &plans));
        }
        Commands::Init { path, force } => {
            init_config(path, *force)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed when embedded
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Build the strategy for `kind` from configuration
pub fn build_strategy(kind: StrategyKind, config: &SharebenchConfig) -> Strategy {
    Strategy::build(
        kind,
        StrategyOptions {
            planner: Some(config.planner.params_for(kind)),
            mps: (&config.mps).into(),
            ..StrategyOptions::default()
        },
    )
}

/// Run a full sweep as described by `args` layered over `config`
pub fn run_sweep(args: &SweepArgs, config: &SharebenchConfig) -> anyhow::Result<SweepReport> {
    let options = args.sweep_options(&config.sweep);
    let trial = args.trial(&config.trial)?;
    let strategy = build_strategy(args.mode, config);
    let monitor = SmiTelemetry::new(config.telemetry.query.clone(), config.telemetry_interval()?);

    println!(
        "Running {} sweep on {} ({}), precisions {:?}...",
        strategy.mode(),
        options.device,
        options.device_model,
        options.precisions
    );

    let report = Sweep::new(&strategy)
        .with_telemetry(&monitor)
        .run(&trial, &options)?;
    Ok(report)
}

/// Plan every precision without measuring
pub fn plan_sweep(
    args: &SweepArgs,
    config: &SharebenchConfig,
) -> anyhow::Result<Vec<(Precision, Vec<u32>)>> {
    let options = args.sweep_options(&config.sweep);
    let trial = args.trial(&config.trial)?;
    let strategy = build_strategy(args.mode, config);
    Ok(Sweep::new(&strategy).plan(&trial, &options)?)
}

/// Write the report as pretty JSON
pub fn write_report(report: &SweepReport, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

/// Write the default configuration to `path`
pub fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        return Err(anyhow::anyhow!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    std::fs::write(path, SharebenchConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_parse_run() {
        let cli = parse(&[
            "sharebench",
            "run",
            "--mode",
            "mps",
            "--device-model",
            "v100",
            "--precision",
            "fp32",
            "--precision",
            "mixed",
            "--no-telemetry",
            "--",
            "python",
            "train.py",
            "-B",
            "{batch}",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.mode, StrategyKind::Mps);
        assert_eq!(args.precisions, vec![Precision::Fp32, Precision::Amp]);
        assert_eq!(args.trial, vec!["python", "train.py", "-B", "{batch}"]);

        let options = args.sweep_options(&SweepConfig::default());
        assert_eq!(options.device, Device::Cuda);
        assert_eq!(options.device_model, "v100");
        assert!(!options.telemetry);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(Cli::try_parse_from(["sharebench", "run", "--mode", "turbo"]).is_err());
    }

    #[test]
    fn test_config_values_used_when_flags_absent() {
        let cli = parse(&["sharebench", "plan", "--mode", "hfta"]);
        let Commands::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        let config = SweepConfig {
            device: Device::Xla,
            epochs: 7,
            outdir_prefix: "results".into(),
            ..SweepConfig::default()
        };
        let options = args.sweep_options(&config);
        assert_eq!(options.device, Device::Xla);
        assert_eq!(options.epochs, 7);
        assert_eq!(options.outdir_prefix, PathBuf::from("results"));
        assert_eq!(options.precisions, vec![Precision::Fp32, Precision::Amp]);
    }

    #[test]
    fn test_trial_required() {
        let cli = parse(&["sharebench", "run", "--mode", "serial"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.trial(&TrialConfig::default()).is_err());

        let config = TrialConfig {
            program: Some("train".into()),
            ..TrialConfig::default()
        };
        assert!(args.trial(&config).is_ok());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        init_config(&path, false).unwrap();
        assert!(SharebenchConfig::load(&path).is_ok());
        assert!(init_config(&path, false).is_err());
        init_config(&path, true).unwrap();
    }
}
