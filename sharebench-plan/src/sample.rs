//! Exponentially weighted batch-size sampling
//!
//! Small batch sizes are where throughput changes fastest, so they get more
//! samples. Fractions drawn from `Exp(lambda)` are scaled onto `[1, max_b]`;
//! draws at or beyond 1.0 are discarded. The generator is seeded from the
//! arguments, so the same inputs always give the same plan.

use crate::PlanError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp};
use std::collections::BTreeSet;

/// Draws allowed per requested sample before falling back to a dense fill
const DRAWS_PER_SAMPLE: usize = 1_000;

/// Pick at most `max_count` distinct batch sizes in `[1, max_b]`, ascending,
/// always including `max_b`.
pub fn expovariate_plan(max_b: u32, max_count: usize, lambda: f64) -> Result<Vec<u32>, PlanError> {
    if max_b == 0 {
        return Err(PlanError::InvalidArgument("max_b must be at least 1".into()));
    }
    if max_count == 0 {
        return Err(PlanError::InvalidArgument(
            "max_count must be at least 1".into(),
        ));
    }
    if !lambda.is_finite() || lambda <= 0.0 {
        return Err(PlanError::InvalidArgument(format!(
            "lambda must be positive and finite, got {}",
            lambda
        )));
    }

    if max_b as usize <= max_count {
        return Ok((1..=max_b).collect());
    }

    let exp = Exp::new(lambda).map_err(|e| PlanError::InvalidArgument(e.to_string()))?;
    let mut rng = StdRng::seed_from_u64(plan_seed(max_b, max_count, lambda));

    let mut chosen = BTreeSet::from([max_b]);
    let mut draws = 0;
    while chosen.len() < max_count && draws < max_count * DRAWS_PER_SAMPLE {
        draws += 1;
        let x: f64 = exp.sample(&mut rng);
        if x >= 1.0 {
            continue;
        }
        let b = 1 + (x * f64::from(max_b - 1)).floor() as u32;
        chosen.insert(b.min(max_b));
    }

    // Very large lambda concentrates every draw on B = 1
    let mut fill = 1;
    while chosen.len() < max_count {
        chosen.insert(fill);
        fill += 1;
    }

    Ok(chosen.into_iter().collect())
}

fn plan_seed(max_b: u32, max_count: usize, lambda: f64) -> u64 {
    let mut seed = 0x9e37_79b9_7f4a_7c15u64;
    for part in [u64::from(max_b), max_count as u64, lambda.to_bits()] {
        seed = (seed ^ part).wrapping_mul(0x0100_0000_01b3).rotate_left(23);
    }
    seed
}
