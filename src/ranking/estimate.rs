//! Strength estimates with uncertainty
//!
//! A strength estimate is a Gaussian belief `(mean, variance)` about a
//! candidate's latent quality, together with its 95% interval and the number
//! of informative comparisons behind it.

use serde::{Deserialize, Serialize};

/// Gaussian belief about one candidate's latent strength
///
/// # Example
///
/// ```rust
/// use alife_rlhf::ranking::StrengthEstimate;
///
/// let estimate = StrengthEstimate::new(0.8, 0.25, 12);
/// println!("Strength: {:.2} ± {:.2}", estimate.mean, estimate.std_error());
/// println!("95% CI: [{:.2}, {:.2}]", estimate.ci_lower, estimate.ci_upper);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrengthEstimate {
    /// Point estimate of the strength
    pub mean: f64,
    /// Variance of the estimate
    pub variance: f64,
    /// Lower bound of the 95% interval
    pub ci_lower: f64,
    /// Upper bound of the 95% interval
    pub ci_upper: f64,
    /// Informative comparisons (wins, losses, ties) behind this estimate
    pub comparisons: usize,
}

impl StrengthEstimate {
    /// Z-score for 95% confidence interval
    const Z_95: f64 = 1.96;

    /// Create an estimate from mean and variance
    pub fn new(mean: f64, variance: f64, comparisons: usize) -> Self {
        let std_err = variance.max(0.0).sqrt();
        Self {
            mean,
            variance,
            ci_lower: mean - Self::Z_95 * std_err,
            ci_upper: mean + Self::Z_95 * std_err,
            comparisons,
        }
    }

    /// The prior belief for a candidate with no comparisons
    pub fn prior(prior_variance: f64) -> Self {
        Self::new(0.0, prior_variance, 0)
    }

    /// Standard error (sqrt of variance)
    pub fn std_error(&self) -> f64 {
        self.variance.sqrt()
    }

    /// Width of the confidence interval
    pub fn ci_width(&self) -> f64 {
        self.ci_upper - self.ci_lower
    }

    /// Check if this estimate overlaps with another's confidence interval
    pub fn ci_overlaps(&self, other: &StrengthEstimate) -> bool {
        self.ci_lower <= other.ci_upper && self.ci_upper >= other.ci_lower
    }

    /// Check if this estimate is significantly stronger than another
    ///
    /// Returns true if the lower bound of this estimate's CI is above
    /// the upper bound of the other's CI.
    pub fn significantly_better_than(&self, other: &StrengthEstimate) -> bool {
        self.ci_lower > other.ci_upper
    }

    /// Fraction of the prior variance that evidence has removed, in `[0, 1]`
    pub fn confidence(&self, prior_variance: f64) -> f64 {
        if prior_variance <= 0.0 || !self.variance.is_finite() {
            return 0.0;
        }
        (1.0 - self.variance / prior_variance).clamp(0.0, 1.0)
    }

    /// Whether the estimate has never been informed by a comparison
    pub fn is_prior(&self) -> bool {
        self.comparisons == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::PRIOR_VARIANCE;

    #[test]
    fn test_estimate_creation() {
        let est = StrengthEstimate::new(1.5, 0.25, 10);
        assert_eq!(est.mean, 1.5);
        assert_eq!(est.variance, 0.25);
        assert_eq!(est.comparisons, 10);
        assert!((est.std_error() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_interval() {
        let est = StrengthEstimate::new(10.0, 1.0, 100);
        assert!((est.ci_lower - 8.04).abs() < 0.01);
        assert!((est.ci_upper - 11.96).abs() < 0.01);
        assert!((est.ci_width() - 3.92).abs() < 0.01);
    }

    #[test]
    fn test_prior() {
        let est = StrengthEstimate::prior(PRIOR_VARIANCE);
        assert_eq!(est.mean, 0.0);
        assert_eq!(est.variance, PRIOR_VARIANCE);
        assert!(est.is_prior());
        assert_eq!(est.confidence(PRIOR_VARIANCE), 0.0);
    }

    #[test]
    fn test_ci_overlaps_and_significance() {
        let strong = StrengthEstimate::new(3.0, 0.01, 100);
        let weak = StrengthEstimate::new(-3.0, 0.01, 100);
        let vague = StrengthEstimate::new(0.0, 9.0, 2);

        assert!(strong.significantly_better_than(&weak));
        assert!(!weak.significantly_better_than(&strong));
        assert!(!strong.ci_overlaps(&weak));
        assert!(strong.ci_overlaps(&vague));
    }

    #[test]
    fn test_confidence_bounds() {
        let est = StrengthEstimate::new(0.0, 1.0, 5);
        assert!((est.confidence(4.0) - 0.75).abs() < 1e-12);
        assert_eq!(est.confidence(0.5), 0.0);
        assert_eq!(StrengthEstimate::new(0.0, f64::INFINITY, 0).confidence(4.0), 0.0);
    }
}
