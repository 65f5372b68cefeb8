//! Online Gaussian update for a single comparison
//!
//! A Laplace-style step on the Bradley–Terry likelihood: each side's variance
//! shrinks by the Fisher information the comparison carries, and both means
//! move by the same amount in opposite directions, the pair's average new
//! variance times the surprise `(observed - expected)`.
//!
//! The shared step keeps the sum of all means at zero, which is also where
//! the batch MAP optimum puts it (its prior gradient is the only term that
//! does not cancel pairwise). Step sizes decay as evidence accumulates, so
//! the online estimate settles on the batch optimum itself rather than on a
//! shifted copy of it.

use super::estimate::StrengthEstimate;
use super::model::RankingConfig;
use super::sigmoid;

/// Apply one comparison to a pair of estimates
///
/// `score_a` is the first candidate's score (1 win, 0.5 tie, 0 loss).
/// Returns the updated `(a, b)` estimates with their comparison counts
/// incremented.
pub fn update_pair(
    a: &StrengthEstimate,
    b: &StrengthEstimate,
    score_a: f64,
    config: &RankingConfig,
) -> (StrengthEstimate, StrengthEstimate) {
    let scale = config.scale;
    let expected = sigmoid((a.mean - b.mean) / scale);
    let surprise = (score_a - expected) / scale;
    let information = expected * (1.0 - expected) / (scale * scale);

    let shrink = |variance: f64| (1.0 / (1.0 / variance + information)).max(config.min_variance);
    let var_a = shrink(a.variance);
    let var_b = shrink(b.variance);

    let gain = 0.5 * (var_a + var_b);
    let step = (gain * surprise).clamp(-config.max_step, config.max_step);

    (
        StrengthEstimate::new(a.mean + step, var_a, a.comparisons + 1),
        StrengthEstimate::new(b.mean - step, var_b, b.comparisons + 1),
    )
}
