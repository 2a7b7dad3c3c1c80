//! Worker fan-out
//!
//! A measurement runs its trials on a dedicated pool sized to the number of
//! workers, so every worker gets its own thread. The caller blocks until all
//! workers return; a failing worker never cancels its siblings, which keeps
//! the per-worker output directories consistent.

use crate::RunnerError;
use crate::lifecycle::panic_message;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use sharebench_core::{Trial, TrialRequest};
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::error;

/// Run `count` workers in parallel and collect their results in index order.
/// A panicking worker counts as a failure.
pub(crate) fn run_workers<F>(count: usize, worker: F) -> Result<Vec<bool>, RunnerError>
where
    F: Fn(usize) -> bool + Send + Sync,
{
    if count == 0 {
        return Ok(Vec::new());
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(count)
        .thread_name(|i| format!("sharebench-worker-{}", i))
        .build()
        .map_err(|e| RunnerError::WorkerPool(e.to_string()))?;

    Ok(pool.install(|| {
        (0..count)
            .into_par_iter()
            .with_max_len(1)
            .map(|index| match catch_unwind(AssertUnwindSafe(|| worker(index))) {
                Ok(succeeded) => succeeded,
                Err(panic) => {
                    error!(worker = index, "Worker panicked: {}", panic_message(panic.as_ref()));
                    false
                }
            })
            .collect()
    }))
}

/// Create the request's output directory (if any), then run the trial
pub(crate) fn mk_outdir_and_run_trial(trial: &dyn Trial, request: &TrialRequest) -> bool {
    if let Some(outdir) = &request.outdir {
        if let Err(e) = std::fs::create_dir_all(outdir) {
            error!(outdir = %outdir.display(), "Failed to create output directory: {}", e);
            return false;
        }
    }

    match trial.run(request) {
        Ok(succeeded) => succeeded,
        Err(e) => {
            error!(batch = request.batch, "Trial error: {}", e);
            false
        }
    }
}
