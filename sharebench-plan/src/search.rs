//! Maximum batch size search
//!
//! Doubling phase followed by a binary search. A batch size counts as stable
//! only if the probe passes `repeats` times in a row; the first failing repeat
//! ends that batch size's check early.

use crate::PlanError;

/// Find the largest stable batch size in `[1, cap]`.
///
/// `probe(B)` runs a dry run at batch size B and reports whether it succeeded.
/// `repeats` of 0 is treated as 1.
pub fn find_max_batch_size<F>(mut probe: F, repeats: u32, cap: u32) -> Result<u32, PlanError>
where
    F: FnMut(u32) -> bool,
{
    let repeats = repeats.max(1);
    let cap = cap.max(1);

    if !is_stable(&mut probe, 1, repeats) {
        return Err(PlanError::NoFeasibleBatchSize);
    }

    // Invariant: `lo` is stable, `hi` (once known) is not.
    let mut lo = 1u32;
    let mut hi = None;
    while lo < cap {
        let next = lo.saturating_mul(2).min(cap);
        if is_stable(&mut probe, next, repeats) {
            lo = next;
        } else {
            hi = Some(next);
            break;
        }
    }

    let Some(mut hi) = hi else {
        return Ok(lo);
    };

    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if is_stable(&mut probe, mid, repeats) {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    Ok(lo)
}

fn is_stable<F>(probe: &mut F, batch: u32, repeats: u32) -> bool
where
    F: FnMut(u32) -> bool,
{
    (0..repeats).all(|_| probe(batch))
}
