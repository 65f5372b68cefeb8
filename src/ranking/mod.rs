//! Strength estimation under a Bradley–Terry model
//!
//! Every candidate carries a latent strength. The probability that `a` is
//! preferred over `b` is
//!
//! ```text
//! P(a beats b) = σ((mean_a - mean_b) / scale)
//! ```
//!
//! Two fitting modes share that model:
//!
//! - **Batch**: MAP estimate over the full ledger by damped Newton–Raphson,
//!   deterministic for a given ledger regardless of entry order. Used for
//!   reproducible offline evaluation and for re-anchoring.
//! - **Incremental**: a bounded Gaussian step per comparison. Cheap and
//!   order-dependent; converges toward the batch estimate as evidence
//!   accumulates.
//!
//! Both place a `N(0, prior_variance)` prior on each strength, so a candidate
//! with no comparisons sits exactly at the prior.

pub mod bradley_terry;
pub mod estimate;
pub mod incremental;
pub mod model;

pub use bradley_terry::{BatchFit, BradleyTerry, FitInput};
pub use estimate::StrengthEstimate;
pub use model::{FitReport, RankingConfig, RankingModel, StrengthSnapshot};

/// Prior variance of every latent strength
pub const PRIOR_VARIANCE: f64 = 4.0;

/// Sigmoid function: σ(x) = 1 / (1 + exp(-x))
pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let ex = x.exp();
        ex / (1.0 + ex)
    }
}

/// Log sigmoid: log(σ(x)) = -log(1 + exp(-x))
pub(crate) fn log_sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}
