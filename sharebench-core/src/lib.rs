#![warn(missing_docs)]
//! Sharebench Core - Shared Vocabulary
//!
//! Types every other sharebench crate speaks:
//! - `Device`, `Precision` and `StrategyKind` tags used in logs and output paths
//! - `TrialRequest` and the `Trial` trait, the contract for the training workload
//! - `DeviceConfig`, the explicit per-measurement environment
//! - `CommandLine`, a parsed external command

mod command;
mod env;
mod trial;
mod types;

pub use command::{CommandLine, is_privileged};
pub use env::{DeviceConfig, DeviceConfigError};
pub use trial::{MAX_ITERS_PER_EPOCH, Trial, TrialError, TrialRequest};
pub use types::{Device, ParseTagError, Precision, StrategyKind};
