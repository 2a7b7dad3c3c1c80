//! Measurement Lifecycle
//!
//! Every measurement goes through the same states:
//!
//! ```text
//! CONFIGURE ──► EXECUTE ──► CLEANUP ──► DONE
//!     │                        ▲
//!     └── aborted / error ─────┘
//! ```
//!
//! CONFIGURE installs device configuration and starts collectors, registering
//! an undo step for each effect on a [`Teardown`]. EXECUTE runs the batch.
//! CLEANUP always runs, exactly once, even if EXECUTE failed, returned an
//! error or panicked. Undo steps run last-in first-out and are best-effort: a
//! failing step is logged and the remaining steps still run. The EXECUTE
//! outcome is what [`drive`] returns.

use crate::RunnerError;
use sharebench_core::DeviceConfig;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, warn};

type UndoFn<'a> = Box<dyn FnOnce(&mut DeviceConfig) -> Result<(), RunnerError> + 'a>;

/// Ordered undo steps for one measurement
pub struct Teardown<'a> {
    steps: Vec<(&'static str, UndoFn<'a>)>,
}

impl<'a> Teardown<'a> {
    /// Empty teardown
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Register an undo step. Steps run in reverse registration order.
    pub fn defer<F>(&mut self, label: &'static str, undo: F)
    where
        F: FnOnce(&mut DeviceConfig) -> Result<(), RunnerError> + 'a,
    {
        self.steps.push((label, Box::new(undo)));
    }

    /// Number of registered steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no steps are registered
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step, newest first. Returns the number of failed steps.
    pub fn run(self, mode: &str, env: &mut DeviceConfig) -> usize {
        let mut failures = 0;
        for (label, undo) in self.steps.into_iter().rev() {
            let outcome = catch_unwind(AssertUnwindSafe(|| undo(env)));
            match outcome {
                Ok(Ok(())) => debug!(mode, step = label, "Cleanup step done"),
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(mode, step = label, "Cleanup step failed: {}", e);
                }
                Err(panic) => {
                    failures += 1;
                    warn!(
                        mode,
                        step = label,
                        "Cleanup step panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
        failures
    }
}

impl Default for Teardown<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one measurement through CONFIGURE, EXECUTE and CLEANUP.
///
/// `configure` returns `Ok(false)` to abort without executing (the measurement
/// then fails) and `Err` for hard errors; either way the steps it registered
/// are undone. A panic in `execute` becomes [`RunnerError::Faulted`].
pub fn drive<'a, C, X>(
    mode: &str,
    env: &mut DeviceConfig,
    configure: C,
    execute: X,
) -> Result<bool, RunnerError>
where
    C: FnOnce(&mut DeviceConfig, &mut Teardown<'a>) -> Result<bool, RunnerError>,
    X: FnOnce(&mut DeviceConfig) -> Result<bool, RunnerError>,
{
    let mut teardown = Teardown::new();

    let outcome = match configure(env, &mut teardown) {
        Ok(true) => match catch_unwind(AssertUnwindSafe(|| execute(env))) {
            Ok(result) => result,
            Err(panic) => Err(RunnerError::Faulted(panic_message(panic.as_ref()))),
        },
        Ok(false) => {
            warn!(mode, "Configuration incomplete, skipping execution");
            Ok(false)
        }
        Err(e) => Err(e),
    };

    let failures = teardown.run(mode, env);
    if failures > 0 {
        warn!(mode, failures, "Cleanup finished with failures");
    }

    outcome
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
