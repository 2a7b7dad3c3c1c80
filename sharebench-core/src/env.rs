//! Per-measurement device configuration
//!
//! Flags such as `NVIDIA_TF32_OVERRIDE` or `CUDA_MPS_PIPE_DIRECTORY` only exist
//! for the duration of one measurement. Instead of mutating the process
//! environment they live in a `DeviceConfig` owned by the measuring frame and
//! handed to trials and external commands explicitly.

use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from installing or removing configuration values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceConfigError {
    /// Another holder already installed this key
    #[error("Device config '{key}' is already installed (value '{existing}')")]
    AlreadyInstalled {
        /// Conflicting key
        key: String,
        /// Value held by the current owner
        existing: String,
    },

    /// Removal of a key that was never installed
    #[error("Device config '{0}' is not installed")]
    NotInstalled(String),
}

/// Environment-like variables scoped to one measurement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    vars: BTreeMap<String, String>,
}

impl DeviceConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a value. Fails if the key is already held, so two owners can
    /// never silently overwrite each other.
    pub fn install(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), DeviceConfigError> {
        let key = key.into();
        if let Some(existing) = self.vars.get(&key) {
            return Err(DeviceConfigError::AlreadyInstalled {
                key,
                existing: existing.clone(),
            });
        }
        self.vars.insert(key, value.into());
        Ok(())
    }

    /// Remove a previously installed value
    pub fn remove(&mut self, key: &str) -> Result<String, DeviceConfigError> {
        self.vars
            .remove(key)
            .ok_or_else(|| DeviceConfigError::NotInstalled(key.to_string()))
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Whether a key is installed
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Whether nothing is installed
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate installed values in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Owned copy of the values, as handed to worker threads
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.vars.clone()
    }
}
