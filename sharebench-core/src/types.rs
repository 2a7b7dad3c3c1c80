//! Device, precision and strategy tags
//!
//! Each tag renders to the lowercase string used in log lines and in the
//! on-disk layout `<prefix>/<device>/<model>/<precision>/<mode>/...`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a tag string is not recognised
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown {kind}: '{value}' (expected one of: {expected})")]
pub struct ParseTagError {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

impl ParseTagError {
    fn new(kind: &'static str, value: &str, expected: &'static str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            expected,
        }
    }
}

/// Device a trial runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// NVIDIA accelerator (the only device with sharing modes and telemetry)
    #[default]
    Cuda,
    /// Host CPU
    Cpu,
    /// XLA-backed accelerator
    Xla,
}

impl Device {
    /// Tag used in paths and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
            Device::Xla => "xla",
        }
    }

    /// Whether this is the CUDA accelerator
    pub fn is_cuda(self) -> bool {
        matches!(self, Device::Cuda)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cuda" | "gpu" => Ok(Device::Cuda),
            "cpu" => Ok(Device::Cpu),
            "xla" | "tpu" => Ok(Device::Xla),
            _ => Err(ParseTagError::new("device", s, "cuda, cpu, xla")),
        }
    }
}

/// Numeric precision of a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// Full single precision
    Fp32,
    /// Automatic mixed precision
    #[serde(alias = "mixed")]
    Amp,
}

impl Precision {
    /// Tag used in paths and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Precision::Fp32 => "fp32",
            Precision::Amp => "amp",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fp32" => Ok(Precision::Fp32),
            "amp" | "mixed" => Ok(Precision::Amp),
            _ => Err(ParseTagError::new("precision", s, "fp32, amp")),
        }
    }
}

/// Execution strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// One trial at a time
    Serial,
    /// B trials as threads of this process
    Concurrent,
    /// B trials under the CUDA Multi-Process Service
    Mps,
    /// One trial fusing B models horizontally
    Hfta,
}

impl StrategyKind {
    /// All strategies, in the order they are usually swept
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Serial,
        StrategyKind::Concurrent,
        StrategyKind::Mps,
        StrategyKind::Hfta,
    ];

    /// Mode name used in output paths and log fields
    pub fn mode(self) -> &'static str {
        match self {
            StrategyKind::Serial => "serial",
            StrategyKind::Concurrent => "concurrent",
            StrategyKind::Mps => "mps",
            StrategyKind::Hfta => "hfta",
        }
    }

    /// Whether the strategy only runs on the CUDA device
    pub fn requires_cuda(self) -> bool {
        matches!(self, StrategyKind::Concurrent | StrategyKind::Mps)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mode())
    }
}

impl FromStr for StrategyKind {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "serial" | "sequential" => Ok(StrategyKind::Serial),
            "concurrent" => Ok(StrategyKind::Concurrent),
            "mps" => Ok(StrategyKind::Mps),
            "hfta" | "fused" => Ok(StrategyKind::Hfta),
            _ => Err(ParseTagError::new(
                "strategy",
                s,
                "serial, concurrent, mps, hfta",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_roundtrip_through_display() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.to_string().parse::<StrategyKind>().unwrap(), kind);
        }
        assert_eq!("cuda".parse::<Device>().unwrap(), Device::Cuda);
        assert_eq!(Device::Cpu.to_string(), "cpu");
    }

    #[test]
    fn test_mixed_is_an_alias_for_amp() {
        assert_eq!("mixed".parse::<Precision>().unwrap(), Precision::Amp);
        assert_eq!("AMP".parse::<Precision>().unwrap(), Precision::Amp);
        assert_eq!(Precision::Amp.as_str(), "amp");
    }

    #[test]
    fn test_unknown_tag_lists_choices() {
        let err = "bf16".parse::<Precision>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown precision: 'bf16' (expected one of: fp32, amp)"
        );
    }

    #[test]
    fn test_only_thread_strategies_require_cuda() {
        assert!(StrategyKind::Concurrent.requires_cuda());
        assert!(StrategyKind::Mps.requires_cuda());
        assert!(!StrategyKind::Serial.requires_cuda());
        assert!(!StrategyKind::Hfta.requires_cuda());
    }
}
