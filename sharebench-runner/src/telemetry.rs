//! Device Telemetry
//!
//! A telemetry session is a background collector bound to one measurement's
//! output directory. It is started before the measurement and stopped after
//! it, whatever the outcome.
//!
//! `SmiTelemetry` polls `nvidia-smi --query-gpu=...` and appends the raw CSV
//! rows to `<outdir>/telemetry.csv`. Rows are stored as reported; turning them
//! into metrics is left to downstream tooling. A failed query is logged and
//! sampling continues; `stop` reports the failure only if no sample was ever
//! collected.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// File written into each measurement directory
pub const TELEMETRY_FILE: &str = "telemetry.csv";

/// Default fields queried from `nvidia-smi`
pub const DEFAULT_QUERY: &str =
    "timestamp,index,utilization.gpu,utilization.memory,memory.used,power.draw,sm_clock";

/// Granularity at which the collector notices a stop request
const STOP_POLL: Duration = Duration::from_millis(50);

/// Telemetry collection errors
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Telemetry I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Telemetry query failed: {0}")]
    Query(String),

    #[error("Telemetry collector panicked")]
    CollectorPanicked,
}

/// Starts telemetry sessions
pub trait TelemetryMonitor: Send + Sync {
    /// Begin collecting into `outdir`. `profile` names the device model.
    fn start(
        &self,
        profile: &str,
        outdir: &Path,
    ) -> Result<Box<dyn TelemetrySession>, TelemetryError>;
}

/// A running collector
pub trait TelemetrySession: Send {
    /// Stop collecting and release the collector. Must work even if nothing
    /// was collected.
    fn stop(self: Box<Self>) -> Result<(), TelemetryError>;
}

/// `nvidia-smi` polling collector
#[derive(Debug, Clone)]
pub struct SmiTelemetry {
    program: String,
    query: String,
    interval: Duration,
}

impl SmiTelemetry {
    /// Create a collector sampling `query` every `interval`
    pub fn new(query: impl Into<String>, interval: Duration) -> Self {
        Self {
            program: "nvidia-smi".to_string(),
            query: query.into(),
            interval: interval.max(STOP_POLL),
        }
    }

    /// Use a different query executable (mainly for tests)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl Default for SmiTelemetry {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY, Duration::from_secs(1))
    }
}

impl TelemetryMonitor for SmiTelemetry {
    fn start(
        &self,
        profile: &str,
        outdir: &Path,
    ) -> Result<Box<dyn TelemetrySession>, TelemetryError> {
        std::fs::create_dir_all(outdir).map_err(|source| TelemetryError::Io {
            path: outdir.to_path_buf(),
            source,
        })?;

        let path = outdir.join(TELEMETRY_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| TelemetryError::Io {
                path: path.clone(),
                source,
            })?;
        writeln!(file, "# profile={}", profile)
            .and_then(|_| writeln!(file, "{}", self.query))
            .map_err(|source| TelemetryError::Io {
                path: path.clone(),
                source,
            })?;

        let stop = Arc::new(AtomicBool::new(false));
        let collector = Collector {
            program: self.program.clone(),
            query: self.query.clone(),
            interval: self.interval,
            path,
            stop: Arc::clone(&stop),
        };
        let handle = std::thread::Builder::new()
            .name("sharebench-telemetry".to_string())
            .spawn(move || collector.run(file))
            .map_err(|source| TelemetryError::Io {
                path: outdir.to_path_buf(),
                source,
            })?;

        debug!(outdir = %outdir.display(), "Telemetry started");
        Ok(Box::new(SmiSession { stop, handle }))
    }
}

struct Collector {
    program: String,
    query: String,
    interval: Duration,
    path: PathBuf,
    stop: Arc<AtomicBool>,
}

impl Collector {
    fn run(self, mut file: File) -> Result<(), TelemetryError> {
        let mut collected = 0usize;
        let mut last_failure = None;
        loop {
            match self.sample(&mut file) {
                Ok(()) => collected += 1,
                Err(e @ TelemetryError::Query(_)) => {
                    warn!(path = %self.path.display(), "Telemetry sample failed: {}", e);
                    last_failure = Some(e);
                }
                Err(e) => return Err(e),
            }

            let deadline = Instant::now() + self.interval;
            while Instant::now() < deadline && !self.stop.load(Ordering::Relaxed) {
                std::thread::sleep(STOP_POLL);
            }
            if self.stop.load(Ordering::Relaxed) {
                return match last_failure {
                    Some(e) if collected == 0 => Err(e),
                    _ => Ok(()),
                };
            }
        }
    }

    fn sample(&self, file: &mut File) -> Result<(), TelemetryError> {
        let output = Command::new(&self.program)
            .arg(format!("--query-gpu={}", self.query))
            .arg("--format=csv,noheader")
            .output()
            .map_err(|e| TelemetryError::Query(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(TelemetryError::Query(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        file.write_all(&output.stdout)
            .map_err(|source| TelemetryError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

struct SmiSession {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<(), TelemetryError>>,
}

impl TelemetrySession for SmiSession {
    fn stop(self: Box<Self>) -> Result<(), TelemetryError> {
        self.stop.store(true, Ordering::Relaxed);
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(TelemetryError::CollectorPanicked),
        }
    }
}
