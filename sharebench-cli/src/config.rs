//! Configuration loading from sharebench.toml
//!
//! Sharebench configuration can be specified in a `sharebench.toml` file in the project root.
//! The configuration is automatically discovered by walking up from the current directory.
//! CLI flags override file values.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sharebench_core::{Device, MAX_ITERS_PER_EPOCH, Precision, StrategyKind};
use sharebench_runner::{DEFAULT_QUERY, MpsSettings, PlannerParams};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the discovered configuration file
pub const CONFIG_FILE: &str = "sharebench.toml";

/// Sharebench configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SharebenchConfig {
    /// Sweep configuration
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Per-strategy planner overrides
    #[serde(default)]
    pub planner: PlannerConfig,
    /// MPS daemon configuration
    #[serde(default)]
    pub mps: MpsConfig,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Trial command configuration
    #[serde(default)]
    pub trial: TrialConfig,
}

/// What to sweep and where results go
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Device: "cuda", "cpu" or "xla"
    #[serde(default)]
    pub device: Device,
    /// Device model name (e.g. "a100"), used in output paths
    #[serde(default = "default_device_model")]
    pub device_model: String,
    /// Precisions in sweep order
    #[serde(default = "default_precisions")]
    pub precisions: Vec<Precision>,
    /// Epochs per measurement
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    /// Iteration cap per epoch
    #[serde(default = "default_iters_per_epoch")]
    pub iters_per_epoch: u64,
    /// Root of the output tree
    #[serde(default = "default_outdir_prefix")]
    pub outdir_prefix: String,
    /// Collect device telemetry (cuda only)
    #[serde(default = "default_true")]
    pub telemetry: bool,
    /// Device models whose fp32 runs get the numeric override flag
    #[serde(default = "default_override_models")]
    pub numeric_override_models: Vec<String>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            device: Device::default(),
            device_model: default_device_model(),
            precisions: default_precisions(),
            epochs: default_epochs(),
            iters_per_epoch: default_iters_per_epoch(),
            outdir_prefix: default_outdir_prefix(),
            telemetry: true,
            numeric_override_models: default_override_models(),
        }
    }
}

fn default_device_model() -> String {
    "v100".to_string()
}
fn default_precisions() -> Vec<Precision> {
    vec![Precision::Fp32, Precision::Amp]
}
fn default_epochs() -> u32 {
    10
}
fn default_iters_per_epoch() -> u64 {
    MAX_ITERS_PER_EPOCH
}
fn default_outdir_prefix() -> String {
    "runs".to_string()
}
fn default_true() -> bool {
    true
}
fn default_override_models() -> Vec<String> {
    vec!["a100".to_string()]
}

/// Planner overrides per strategy. Unset fields keep the strategy defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlannerConfig {
    /// Overrides for `concurrent`
    #[serde(default)]
    pub concurrent: PlannerOverrides,
    /// Overrides for `mps`
    #[serde(default)]
    pub mps: PlannerOverrides,
    /// Overrides for `hfta`
    #[serde(default)]
    pub hfta: PlannerOverrides,
}

impl PlannerConfig {
    /// Effective planner parameters for a strategy
    pub fn params_for(&self, kind: StrategyKind) -> PlannerParams {
        let base = PlannerParams::defaults_for(kind);
        match kind {
            StrategyKind::Serial => base,
            StrategyKind::Concurrent => self.concurrent.apply(base),
            StrategyKind::Mps => self.mps.apply(base),
            StrategyKind::Hfta => self.hfta.apply(base),
        }
    }
}

/// Optional planner parameters
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlannerOverrides {
    /// Consecutive dry-run successes required
    #[serde(default)]
    pub dry_run_repeats: Option<u32>,
    /// Maximum number of batch sizes measured
    #[serde(default)]
    pub max_num_batch_sizes: Option<usize>,
    /// Sampling decay rate
    #[serde(default)]
    pub lambda: Option<f64>,
    /// Epochs per dry run
    #[serde(default)]
    pub dry_run_epochs: Option<u32>,
    /// Iteration cap per dry-run epoch
    #[serde(default)]
    pub dry_run_iters_per_epoch: Option<u64>,
    /// Largest batch size probed
    #[serde(default)]
    pub max_batch_size: Option<u32>,
}

impl PlannerOverrides {
    fn apply(&self, base: PlannerParams) -> PlannerParams {
        PlannerParams {
            dry_run_repeats: self.dry_run_repeats.unwrap_or(base.dry_run_repeats),
            max_num_batch_sizes: self.max_num_batch_sizes.unwrap_or(base.max_num_batch_sizes),
            lambda: self.lambda.unwrap_or(base.lambda),
            dry_run_epochs: self.dry_run_epochs.unwrap_or(base.dry_run_epochs),
            dry_run_iters_per_epoch: self
                .dry_run_iters_per_epoch
                .unwrap_or(base.dry_run_iters_per_epoch),
            max_batch_size: self.max_batch_size.unwrap_or(base.max_batch_size),
        }
    }
}

/// MPS daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpsConfig {
    /// Device switched to exclusive-process mode
    #[serde(default)]
    pub device_index: u32,
    /// Daemon pipe directory
    #[serde(default = "default_pipe_dir")]
    pub pipe_dir: String,
    /// Daemon log directory
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for MpsConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            pipe_dir: default_pipe_dir(),
            log_dir: default_log_dir(),
        }
    }
}

fn default_pipe_dir() -> String {
    "/tmp/nvidia-mps".to_string()
}
fn default_log_dir() -> String {
    "/tmp/nvidia-log".to_string()
}

impl From<&MpsConfig> for MpsSettings {
    fn from(config: &MpsConfig) -> Self {
        Self {
            device_index: config.device_index,
            pipe_dir: PathBuf::from(&config.pipe_dir),
            log_dir: PathBuf::from(&config.log_dir),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Sampling interval (e.g., "1s", "500ms")
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Comma-separated `nvidia-smi --query-gpu` fields
    #[serde(default = "default_query")]
    pub query: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            query: default_query(),
        }
    }
}

fn default_interval() -> String {
    "1s".to_string()
}
fn default_query() -> String {
    DEFAULT_QUERY.to_string()
}

/// Trial command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialConfig {
    /// Trial executable (overridden by `-- <program> <args>` on the command line)
    #[serde(default)]
    pub program: Option<String>,
    /// Argument template with `{batch}`, `{device}`, `{precision}`, `{epochs}`
    /// and `{iters_per_epoch}` placeholders
    #[serde(default)]
    pub args: Vec<String>,
    /// Flag passed before the output directory
    #[serde(default = "default_outdir_flag")]
    pub outdir_flag: String,
    /// Extra environment for every trial
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            outdir_flag: default_outdir_flag(),
            env: BTreeMap::new(),
        }
    }
}

fn default_outdir_flag() -> String {
    "--outdir".to_string()
}

impl SharebenchConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("Invalid {}", path.display()))?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path).ok();
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Telemetry sampling interval
    pub fn telemetry_interval(&self) -> anyhow::Result<Duration> {
        Self::parse_duration(&self.telemetry.interval)
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        format!(
            r#"# Sharebench Configuration

[sweep]
# Device: cuda, cpu or xla
device = "cuda"
# Device model, used in output paths
device_model = "v100"
# Precisions in sweep order: fp32, amp
precisions = ["fp32", "amp"]
# Epochs per measurement
epochs = 10
# Iteration cap per epoch
iters_per_epoch = {iters}
# Root of the output tree
outdir_prefix = "runs"
# Collect device telemetry around each measurement (cuda only)
telemetry = true
# Device models whose fp32 runs get NVIDIA_TF32_OVERRIDE=0
numeric_override_models = ["a100"]

# Planner overrides per strategy (uncomment to change the defaults)
[planner.concurrent]
# dry_run_repeats = 10
# max_num_batch_sizes = 5
# lambda = 4.0
# dry_run_epochs = 2
# dry_run_iters_per_epoch = 10
# max_batch_size = 64

[planner.mps]
# dry_run_repeats = 10
# max_batch_size = 64

[planner.hfta]
# dry_run_repeats = 1
# max_num_batch_sizes = 10
# dry_run_iters_per_epoch = 3
# max_batch_size = 4096

[mps]
device_index = 0
pipe_dir = "/tmp/nvidia-mps"
log_dir = "/tmp/nvidia-log"

[telemetry]
# Sampling interval
interval = "1s"
# nvidia-smi --query-gpu fields
query = "{query}"

[trial]
# Trial program and argument template (uncomment to enable)
# program = "python"
# args = ["train.py", "--device", "{{device}}", "--amp-or-fp32", "{{precision}}", "--batch", "{{batch}}", "--epochs", "{{epochs}}", "--iters-per-epoch", "{{iters_per_epoch}}"]
# Flag passed before the output directory
outdir_flag = "--outdir"

[trial.env]
# EXTRA_VAR = "value"
"#,
            iters = MAX_ITERS_PER_EPOCH,
            query = DEFAULT_QUERY,
        )
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m")
    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Invalid duration: {}", s));
        }

        let seconds = match unit_part.to_lowercase().as_str() {
            "ms" => value / 1_000.0,
            "s" | "" => value,
            "m" | "min" => value * 60.0,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok(Duration::from_secs_f64(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SharebenchConfig::default();
        assert_eq!(config.sweep.device, Device::Cuda);
        assert_eq!(config.sweep.device_model, "v100");
        assert_eq!(config.sweep.epochs, 10);
        assert_eq!(config.sweep.precisions, vec![Precision::Fp32, Precision::Amp]);
        assert_eq!(config.sweep.numeric_override_models, vec!["a100"]);
        assert!(config.sweep.telemetry);
        assert_eq!(config.trial.outdir_flag, "--outdir");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(
            SharebenchConfig::parse_duration("3s").unwrap(),
            Duration::from_secs(3)
        );
        assert_eq!(
            SharebenchConfig::parse_duration("500ms").unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(
            SharebenchConfig::parse_duration("2m").unwrap(),
            Duration::from_secs(120)
        );
        assert_eq!(
            SharebenchConfig::parse_duration("1.5").unwrap(),
            Duration::from_millis(1500)
        );
        assert!(SharebenchConfig::parse_duration("").is_err());
        assert!(SharebenchConfig::parse_duration("5h").is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [sweep]
            device_model = "v100"
            precisions = ["mixed"]

            [planner.hfta]
            max_batch_size = 128
            dry_run_repeats = 3
        "#;

        let config: SharebenchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sweep.device_model, "v100");
        assert_eq!(config.sweep.precisions, vec![Precision::Amp]);

        let hfta = config.planner.params_for(StrategyKind::Hfta);
        assert_eq!(hfta.max_batch_size, 128);
        assert_eq!(hfta.dry_run_repeats, 3);
        // Defaults should still apply
        assert_eq!(hfta.max_num_batch_sizes, 10);
        assert_eq!(config.planner.params_for(StrategyKind::Mps), PlannerParams::concurrent());
        assert_eq!(config.mps.pipe_dir, "/tmp/nvidia-mps");
    }

    #[test]
    fn test_default_toml_parses() {
        let config: SharebenchConfig = toml::from_str(&SharebenchConfig::default_toml()).unwrap();
        assert_eq!(config.sweep.iters_per_epoch, MAX_ITERS_PER_EPOCH);
        assert_eq!(config.telemetry.query, DEFAULT_QUERY);
        assert_eq!(config.telemetry_interval().unwrap(), Duration::from_secs(1));
        assert!(config.trial.program.is_none());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[sweep]\nepochs = \"many\"\n").unwrap();
        let err = SharebenchConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains(CONFIG_FILE));
    }
}
