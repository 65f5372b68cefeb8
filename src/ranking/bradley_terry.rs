//! Batch Bradley–Terry fitting
//!
//! Computes the MAP strengths over a full ledger with damped Newton–Raphson.
//! The log-posterior is
//!
//! ```text
//! Σ_pairs [ s_ij · log σ(d_ij) + (n_ij - s_ij) · log σ(-d_ij) ] - Σ_i m_i² / (2·prior_variance)
//! d_ij = (m_i - m_j) / scale
//! ```
//!
//! where `n_ij` counts informative comparisons of the pair and `s_ij` is the
//! score of `i` (1 per win, 0.5 per tie). The prior term makes the objective
//! strictly concave, so the optimum is unique and candidates with no
//! comparisons stay at the prior.
//!
//! Before fitting, the ledger is reduced to per-pair tallies keyed by
//! canonical pair in a `BTreeMap`, and candidates are indexed in id order.
//! Tallies are sums of halves, which floating point adds exactly, so the
//! fit is bit-identical under any permutation of the ledger.
//!
//! Only candidates with at least one informative comparison enter the Newton
//! system. Up to `dense_limit` of them the system is factorized and the
//! variances are the exact diagonal of the inverse curvature. Larger systems
//! are solved matrix-free by preconditioned conjugate gradients, and their
//! variances use the diagonal of the curvature alone.
//!
//! # Example
//!
//! ```rust
//! use alife_rlhf::ledger::{Candidate, ComparisonStore, Outcome};
//! use alife_rlhf::ranking::{BradleyTerry, FitInput, RankingConfig};
//!
//! let mut store = ComparisonStore::new();
//! for id in ["a", "b"] {
//!     store.register(Candidate::new(id)).unwrap();
//! }
//! store.record(&"a".into(), &"b".into(), Outcome::AWins, "r").unwrap();
//!
//! let fit = BradleyTerry::new(RankingConfig::default()).fit(&FitInput::from_store(&store), None);
//! assert!(fit.estimates[&"a".into()].mean > fit.estimates[&"b".into()].mean);
//! ```

use nalgebra::{DMatrix, DVector};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use super::estimate::StrengthEstimate;
use super::model::{FitReport, RankingConfig};
use super::{log_sigmoid, sigmoid};
use crate::ledger::{CandidateId, Comparison, ComparisonStore};

/// Relative residual at which conjugate gradients stop
const CG_TOLERANCE: f64 = 1e-10;

/// Sufficient statistics for one unordered pair
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct PairTally {
    /// Informative comparisons of the pair
    n: f64,
    /// Score of the lower-indexed candidate
    score: f64,
}

/// Ledger reduced to what the batch fit needs
///
/// Cheap to move to a worker thread: its size is bounded by the number of
/// distinct compared pairs, not by the ledger length.
#[derive(Clone, Debug)]
pub struct FitInput {
    ids: Vec<CandidateId>,
    counts: Vec<usize>,
    /// Row of each candidate in the Newton system, `None` when uncompared
    slots: Vec<Option<usize>>,
    /// Number of rows in the Newton system
    size: usize,
    /// Tallies keyed by system row, in ascending pair order
    tallies: Vec<((usize, usize), PairTally)>,
    ledger_version: u64,
}

impl FitInput {
    /// Reduce every registered candidate and every ledger entry of a store
    pub fn from_store(store: &ComparisonStore) -> Self {
        Self::from_comparisons(
            store.all_candidates(),
            store.comparisons(),
            store.version(),
        )
    }

    /// Reduce an arbitrary candidate set and comparison slice
    ///
    /// Comparisons touching a candidate outside `ids`, and `Unknown`
    /// outcomes, are ignored.
    pub fn from_comparisons(
        ids: impl IntoIterator<Item = CandidateId>,
        comparisons: &[Comparison],
        ledger_version: u64,
    ) -> Self {
        let ids: Vec<CandidateId> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let index: HashMap<&CandidateId, usize> =
            ids.iter().enumerate().map(|(i, id)| (id, i)).collect();

        let mut tallies: BTreeMap<(usize, usize), PairTally> = BTreeMap::new();
        let mut counts = vec![0usize; ids.len()];

        for comparison in comparisons {
            let Some(score_a) = comparison.outcome.score_a() else {
                continue;
            };
            let (Some(&i), Some(&j)) = (
                index.get(&comparison.candidate_a),
                index.get(&comparison.candidate_b),
            ) else {
                continue;
            };
            if i == j {
                continue;
            }

            let (lo, hi, score_lo) = if i < j {
                (i, j, score_a)
            } else {
                (j, i, 1.0 - score_a)
            };
            let tally = tallies.entry((lo, hi)).or_default();
            tally.n += 1.0;
            tally.score += score_lo;
            counts[i] += 1;
            counts[j] += 1;
        }

        let mut size = 0;
        let slots: Vec<Option<usize>> = counts
            .iter()
            .map(|&count| {
                (count > 0).then(|| {
                    size += 1;
                    size - 1
                })
            })
            .collect();

        // Slots are assigned in index order, so the remapped keys stay sorted
        let tallies = tallies
            .into_iter()
            .filter_map(|((i, j), tally)| Some(((slots[i]?, slots[j]?), tally)))
            .collect();

        Self {
            ids,
            counts,
            slots,
            size,
            tallies,
            ledger_version,
        }
    }

    /// Candidates in index order
    pub fn ids(&self) -> &[CandidateId] {
        &self.ids
    }

    /// Number of distinct compared pairs
    pub fn pair_count(&self) -> usize {
        self.tallies.len()
    }

    /// Number of candidates with at least one informative comparison
    pub fn compared_count(&self) -> usize {
        self.size
    }

    /// Ledger version the input was taken at
    pub fn ledger_version(&self) -> u64 {
        self.ledger_version
    }
}

/// Result of a batch fit
#[derive(Clone, Debug)]
pub struct BatchFit {
    /// Estimates for every candidate of the input
    pub estimates: BTreeMap<CandidateId, StrengthEstimate>,
    /// Convergence report
    pub report: FitReport,
}

/// Negated Hessian of the log-posterior in its pairwise form
struct Curvature {
    diagonal: DVector<f64>,
    couplings: Vec<(usize, usize, f64)>,
}

impl Curvature {
    /// `H · x` without materializing `H`
    fn apply(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut y = self.diagonal.component_mul(x);
        for &(i, j, h) in &self.couplings {
            y[i] -= h * x[j];
            y[j] -= h * x[i];
        }
        y
    }

    fn dense(&self) -> DMatrix<f64> {
        let mut matrix = DMatrix::from_diagonal(&self.diagonal);
        for &(i, j, h) in &self.couplings {
            matrix[(i, j)] -= h;
            matrix[(j, i)] -= h;
        }
        matrix
    }

    /// `1 / H_ii`, the variance each strength would have with the others fixed
    fn diagonal_variances(&self) -> DVector<f64> {
        self.diagonal.map(|h| 1.0 / h)
    }
}

/// Batch MAP fitter for the Bradley–Terry model
#[derive(Clone, Debug)]
pub struct BradleyTerry {
    config: RankingConfig,
}

impl BradleyTerry {
    /// Create a fitter with the given configuration
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    /// Fit strengths to the reduced ledger
    ///
    /// Iterates until `max |Δmean| < epsilon` or `max_iterations`. The cancel
    /// flag is checked before every Newton iteration, at every line-search
    /// step and inside the iterative solver. Once it is set the last iterate
    /// is returned with `cancelled = true` and diagonal variances, skipping
    /// the inverse.
    pub fn fit(&self, input: &FitInput, cancel: Option<&AtomicBool>) -> BatchFit {
        let prior_variance = self.config.prior_variance;

        if input.size == 0 {
            return BatchFit {
                estimates: input
                    .ids
                    .iter()
                    .map(|id| (id.clone(), StrengthEstimate::prior(prior_variance)))
                    .collect(),
                report: FitReport {
                    converged: true,
                    cancelled: false,
                    iterations: 0,
                    max_delta: 0.0,
                    log_posterior: 0.0,
                    ledger_version: input.ledger_version,
                },
            };
        }

        let mut means = DVector::zeros(input.size);
        let mut converged = false;
        let mut cancelled = false;
        let mut iterations = 0;
        let mut max_delta = 0.0;

        'newton: for iter in 0..self.config.max_iterations {
            if is_set(cancel) {
                cancelled = true;
                break;
            }
            iterations = iter + 1;

            let (gradient, curvature) = self.derivatives(input, &means);
            let Some(direction) = self.newton_direction(&curvature, &gradient, cancel) else {
                cancelled = is_set(cancel);
                break;
            };

            // Backtracking line search (Armijo condition on the log-posterior)
            let current = self.log_posterior(input, &means);
            let slope = gradient.dot(&direction);
            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..20 {
                if is_set(cancel) {
                    cancelled = true;
                    break 'newton;
                }
                let candidate = &means + step * &direction;
                if self.log_posterior(input, &candidate) >= current + 1e-4 * step * slope {
                    accepted = Some(candidate);
                    break;
                }
                step *= 0.5;
            }
            let Some(next) = accepted else {
                // No ascent possible along the Newton direction: already at the optimum
                max_delta = 0.0;
                converged = true;
                break;
            };

            max_delta = (&next - &means).amax();
            means = next;

            if max_delta < self.config.epsilon {
                converged = true;
                break;
            }
        }

        let (_, curvature) = self.derivatives(input, &means);
        let variances = if cancelled || input.size > self.config.dense_limit {
            curvature.diagonal_variances()
        } else {
            inverse_diagonal(&curvature.dense()).unwrap_or_else(|| curvature.diagonal_variances())
        };

        let estimates = input
            .ids
            .iter()
            .zip(&input.slots)
            .zip(&input.counts)
            .map(|((id, slot), &count)| {
                let estimate = match slot {
                    Some(row) => StrengthEstimate::new(
                        means[*row],
                        variances[*row].clamp(self.config.min_variance, prior_variance),
                        count,
                    ),
                    None => StrengthEstimate::prior(prior_variance),
                };
                (id.clone(), estimate)
            })
            .collect();

        BatchFit {
            estimates,
            report: FitReport {
                converged,
                cancelled,
                iterations,
                max_delta,
                log_posterior: self.log_posterior(input, &means),
                ledger_version: input.ledger_version,
            },
        }
    }

    /// Gradient and curvature of the log-posterior
    fn derivatives(&self, input: &FitInput, means: &DVector<f64>) -> (DVector<f64>, Curvature) {
        let scale = self.config.scale;
        let precision = 1.0 / self.config.prior_variance;
        let mut gradient = means * (-precision);
        let mut diagonal = DVector::from_element(means.len(), precision);
        let mut couplings = Vec::with_capacity(input.tallies.len());

        for &((i, j), tally) in &input.tallies {
            let p = sigmoid((means[i] - means[j]) / scale);
            let residual = (tally.score - tally.n * p) / scale;
            gradient[i] += residual;
            gradient[j] -= residual;

            let h = tally.n * p * (1.0 - p) / (scale * scale);
            diagonal[i] += h;
            diagonal[j] += h;
            couplings.push((i, j, h));
        }

        (gradient, Curvature { diagonal, couplings })
    }

    /// Solve `H · direction = gradient`; `None` when cancelled or singular
    fn newton_direction(
        &self,
        curvature: &Curvature,
        gradient: &DVector<f64>,
        cancel: Option<&AtomicBool>,
    ) -> Option<DVector<f64>> {
        if gradient.len() <= self.config.dense_limit {
            solve_spd(&curvature.dense(), gradient)
        } else {
            conjugate_gradient(curvature, gradient, cancel)
        }
    }

    fn log_posterior(&self, input: &FitInput, means: &DVector<f64>) -> f64 {
        let scale = self.config.scale;
        let likelihood: f64 = input
            .tallies
            .iter()
            .map(|&((i, j), tally)| {
                let d = (means[i] - means[j]) / scale;
                tally.score * log_sigmoid(d) + (tally.n - tally.score) * log_sigmoid(-d)
            })
            .sum();
        let prior = means.norm_squared() / (2.0 * self.config.prior_variance);
        likelihood - prior
    }
}

fn is_set(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

/// Solve `A x = b` for symmetric positive definite `A`, falling back to LU
fn solve_spd(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    match a.clone().cholesky() {
        Some(chol) => Some(chol.solve(b)),
        None => a.clone().lu().solve(b),
    }
}

/// Solve `H x = b` by Jacobi-preconditioned conjugate gradients
///
/// Returns `None` if `cancel` is set before the residual is small enough.
fn conjugate_gradient(
    curvature: &Curvature,
    b: &DVector<f64>,
    cancel: Option<&AtomicBool>,
) -> Option<DVector<f64>> {
    let n = b.len();
    let preconditioner = curvature.diagonal_variances();
    let tolerance = CG_TOLERANCE * b.norm();

    let mut x = DVector::zeros(n);
    let mut r = b.clone();
    let mut z = r.component_mul(&preconditioner);
    let mut p = z.clone();
    let mut rz = r.dot(&z);

    for _ in 0..2 * n {
        if r.norm() <= tolerance {
            break;
        }
        if is_set(cancel) {
            return None;
        }
        let hp = curvature.apply(&p);
        let alpha = rz / p.dot(&hp);
        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &hp, 1.0);
        z = r.component_mul(&preconditioner);
        let rz_next = r.dot(&z);
        p = &z + (rz_next / rz) * &p;
        rz = rz_next;
    }
    Some(x)
}

/// Diagonal of `A⁻¹` for symmetric positive definite `A`
fn inverse_diagonal(a: &DMatrix<f64>) -> Option<DVector<f64>> {
    let inverse = match a.clone().cholesky() {
        Some(chol) => chol.inverse(),
        None => a.clone().try_inverse()?,
    };
    Some(inverse.diagonal())
}
