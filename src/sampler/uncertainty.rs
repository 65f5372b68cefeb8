//! Uncertainty-driven pair selection
//!
//! Each unordered pair is scored by
//!
//! ```text
//! w · (var_a + var_b) / (2 · prior_variance) + (1 - w) · 1 / (1 + |mean_a - mean_b| / scale)
//! ```
//!
//! The first term (joint uncertainty) favours exploration, the second
//! (closeness) favours pairs whose outcome the model cannot yet predict. Both
//! lie in `[0, 1]`, so `w` reads directly as the exploration share.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::snapshot::{PoolSnapshot, SnapshotEntry};
use crate::error::{PipelineError, PipelineResult};
use crate::ledger::CandidateId;

/// Configuration for pair selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Weight of joint uncertainty versus closeness, in `[0, 1]`
    pub exploration_weight: f64,
    /// Pairs compared this many times sort after every other pair
    pub repeat_limit: u32,
    /// Enumerate every pair up to this pool size
    pub full_scan_limit: usize,
    /// Above the scan limit: neighbours in rank order scored per candidate
    pub rank_band: usize,
    /// Above the scan limit: random pairs scored in addition to the band
    pub sampled_pairs: usize,
    /// Seed for the random part of the bounded scan
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            exploration_weight: 0.5,
            repeat_limit: 3,
            full_scan_limit: 200,
            rank_band: 4,
            sampled_pairs: 2_000,
            seed: 0,
        }
    }
}

impl SamplerConfig {
    /// Check that every parameter is in range
    pub fn validate(&self) -> PipelineResult<()> {
        if !(0.0..=1.0).contains(&self.exploration_weight) {
            return Err(PipelineError::Configuration(format!(
                "sampler.exploration_weight must be in [0, 1], got {}",
                self.exploration_weight
            )));
        }
        if self.repeat_limit == 0 {
            return Err(PipelineError::Configuration(
                "sampler.repeat_limit must be at least 1".into(),
            ));
        }
        if self.full_scan_limit < 2 {
            return Err(PipelineError::Configuration(
                "sampler.full_scan_limit must be at least 2".into(),
            ));
        }
        if self.rank_band == 0 && self.sampled_pairs == 0 {
            return Err(PipelineError::Configuration(
                "sampler.rank_band and sampler.sampled_pairs cannot both be zero".into(),
            ));
        }
        Ok(())
    }
}

/// A pair with its acquisition score
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredPair {
    /// Lexicographically smaller candidate
    pub a: CandidateId,
    /// Lexicographically larger candidate
    pub b: CandidateId,
    /// Acquisition score (higher is more useful)
    pub score: f64,
    /// Whether the pair reached the repeat limit
    pub saturated: bool,
}

/// Acquisition score of a pair
pub fn pair_score(
    a: &SnapshotEntry,
    b: &SnapshotEntry,
    exploration_weight: f64,
    scale: f64,
    prior_variance: f64,
) -> f64 {
    let uncertainty = (a.variance + b.variance) / (2.0 * prior_variance);
    let closeness = 1.0 / (1.0 + (a.mean - b.mean).abs() / scale);
    exploration_weight * uncertainty + (1.0 - exploration_weight) * closeness
}

#[derive(Clone, Copy, Debug)]
struct Scored {
    i: usize,
    j: usize,
    score: f64,
    saturated: bool,
}

fn selection_order(x: &Scored, y: &Scored) -> Ordering {
    x.saturated
        .cmp(&y.saturated)
        .then_with(|| y.score.total_cmp(&x.score))
        .then_with(|| (x.i, x.j).cmp(&(y.i, y.j)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CacheKey {
    ledger_version: u64,
    pool_version: u64,
    model_revision: u64,
    k: usize,
}

/// Chooses the next pairs to send for labeling
///
/// [`next_pairs`](Self::next_pairs) is a pure function of the snapshot.
/// [`select`](Self::select) adds a one-entry cache keyed on the snapshot's
/// versions, the only state the sampler keeps.
#[derive(Clone, Debug, Default)]
pub struct UncertaintySampler {
    config: SamplerConfig,
    cache: Option<(CacheKey, Vec<(CandidateId, CandidateId)>)>,
}

impl UncertaintySampler {
    /// Create a sampler
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            cache: None,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Top-`k` pairs, each ordered `(a, b)` with `a < b`
    pub fn next_pairs(&self, snapshot: &PoolSnapshot, k: usize) -> Vec<(CandidateId, CandidateId)> {
        self.rank_pairs(snapshot, k)
            .into_iter()
            .map(|pair| (pair.a, pair.b))
            .collect()
    }

    /// Cached variant of [`next_pairs`](Self::next_pairs)
    pub fn select(&mut self, snapshot: &PoolSnapshot, k: usize) -> Vec<(CandidateId, CandidateId)> {
        let key = CacheKey {
            ledger_version: snapshot.ledger_version,
            pool_version: snapshot.pool_version,
            model_revision: snapshot.model_revision,
            k,
        };
        if let Some((cached_key, pairs)) = &self.cache {
            if *cached_key == key {
                return pairs.clone();
            }
        }
        let pairs = self.next_pairs(snapshot, k);
        self.cache = Some((key, pairs.clone()));
        pairs
    }

    /// Drop the cached selection
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Top-`k` pairs with their scores, in selection order
    pub fn rank_pairs(&self, snapshot: &PoolSnapshot, k: usize) -> Vec<ScoredPair> {
        let entries = snapshot.entries();
        if entries.len() < 2 || k == 0 {
            return Vec::new();
        }

        let candidates = self.candidate_pairs(snapshot);

        #[cfg(feature = "parallel")]
        let mut scored: Vec<Scored> = candidates
            .par_iter()
            .map(|&(i, j)| self.score(snapshot, i, j))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let mut scored: Vec<Scored> = candidates
            .iter()
            .map(|&(i, j)| self.score(snapshot, i, j))
            .collect();

        scored.sort_by(selection_order);
        scored.truncate(k);

        scored
            .into_iter()
            .map(|s| ScoredPair {
                a: entries[s.i].id.clone(),
                b: entries[s.j].id.clone(),
                score: s.score,
                saturated: s.saturated,
            })
            .collect()
    }

    fn score(&self, snapshot: &PoolSnapshot, i: usize, j: usize) -> Scored {
        let entries = snapshot.entries();
        let (a, b) = (&entries[i], &entries[j]);
        Scored {
            i,
            j,
            score: pair_score(
                a,
                b,
                self.config.exploration_weight,
                snapshot.scale,
                snapshot.prior_variance,
            ),
            saturated: snapshot.pair_count(&a.id, &b.id) >= self.config.repeat_limit,
        }
    }

    /// Index pairs `(i, j)` with `i < j` eligible for scoring
    fn candidate_pairs(&self, snapshot: &PoolSnapshot) -> Vec<(usize, usize)> {
        let n = snapshot.len();
        if n <= self.config.full_scan_limit {
            return (0..n)
                .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
                .collect();
        }

        let entries = snapshot.entries();
        let mut by_rank: Vec<usize> = (0..n).collect();
        by_rank.sort_by(|&x, &y| entries[y].mean.total_cmp(&entries[x].mean).then(x.cmp(&y)));

        let mut pairs = BTreeSet::new();
        for p in 0..n {
            for q in (p + 1)..n.min(p + 1 + self.config.rank_band) {
                let (x, y) = (by_rank[p], by_rank[q]);
                pairs.insert((x.min(y), x.max(y)));
            }
        }

        let mut rng = StdRng::seed_from_u64(mix_seed(
            self.config.seed,
            snapshot.ledger_version,
            snapshot.pool_version,
        ));
        for _ in 0..self.config.sampled_pairs {
            let i = rng.gen_range(0..n);
            let mut j = rng.gen_range(0..n - 1);
            if j >= i {
                j += 1;
            }
            pairs.insert((i.min(j), i.max(j)));
        }

        tracing::debug!(pool = n, scored = pairs.len(), "bounded pair scan");
        pairs.into_iter().collect()
    }
}

fn mix_seed(seed: u64, ledger_version: u64, pool_version: u64) -> u64 {
    seed ^ ledger_version.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ pool_version.rotate_left(32).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn entry(id: &str, mean: f64, variance: f64) -> SnapshotEntry {
        SnapshotEntry {
            id: id.into(),
            mean,
            variance,
        }
    }

    fn snapshot(entries: Vec<SnapshotEntry>, counts: Vec<((&str, &str), u32)>) -> PoolSnapshot {
        PoolSnapshot::from_entries(
            entries,
            counts
                .into_iter()
                .map(|((a, b), n)| ((a.into(), b.into()), n)),
            1.0,
            4.0,
        )
    }

    #[test]
    fn test_pair_score_bounds() {
        let a = entry("a", 0.0, 4.0);
        let b = entry("b", 0.0, 4.0);
        assert_relative_eq!(pair_score(&a, &b, 0.5, 1.0, 4.0), 1.0);

        let far = entry("c", 10.0, 0.0);
        let tight = entry("d", 0.0, 0.0);
        assert_relative_eq!(pair_score(&far, &tight, 1.0, 1.0, 4.0), 0.0);
        assert_relative_eq!(pair_score(&far, &tight, 0.0, 1.0, 4.0), 1.0 / 11.0);
    }

    #[test]
    fn test_prefers_uncertain_pairs() {
        let sampler = UncertaintySampler::new(SamplerConfig {
            exploration_weight: 1.0,
            ..Default::default()
        });
        let snap = snapshot(
            vec![entry("a", 0.0, 0.1), entry("b", 0.0, 3.0), entry("c", 0.0, 3.5)],
            vec![],
        );

        assert_eq!(sampler.next_pairs(&snap, 1), vec![("b".into(), "c".into())]);
    }

    #[test]
    fn test_prefers_close_pairs() {
        let sampler = UncertaintySampler::new(SamplerConfig {
            exploration_weight: 0.0,
            ..Default::default()
        });
        let snap = snapshot(
            vec![entry("a", 3.0, 1.0), entry("b", 0.1, 1.0), entry("c", 0.0, 1.0)],
            vec![],
        );

        assert_eq!(sampler.next_pairs(&snap, 1), vec![("b".into(), "c".into())]);
    }

    #[test]
    fn test_repeat_limit_deprioritizes() {
        let sampler = UncertaintySampler::new(SamplerConfig {
            repeat_limit: 2,
            ..Default::default()
        });
        let snap = snapshot(
            vec![entry("a", 0.0, 4.0), entry("b", 0.0, 4.0), entry("c", 5.0, 0.1)],
            vec![(("b", "a"), 2)],
        );

        let ranked = sampler.rank_pairs(&snap, 3);
        assert_eq!(ranked.len(), 3);
        let last = &ranked[2];
        assert_eq!((last.a.as_str(), last.b.as_str()), ("a", "b"));
        assert!(last.saturated);
        // Still higher scoring than the others: saturation outranks score
        assert!(last.score > ranked[0].score);
    }

    #[test]
    fn test_ties_break_lexicographically() {
        let sampler = UncertaintySampler::default();
        let snap = snapshot(
            vec![entry("c", 0.0, 4.0), entry("a", 0.0, 4.0), entry("b", 0.0, 4.0)],
            vec![],
        );

        let pairs = sampler.next_pairs(&snap, 3);
        assert_eq!(
            pairs,
            vec![
                ("a".into(), "b".into()),
                ("a".into(), "c".into()),
                ("b".into(), "c".into()),
            ]
        );
    }

    #[test]
    fn test_small_pools() {
        let sampler = UncertaintySampler::default();
        assert!(sampler.next_pairs(&snapshot(vec![], vec![]), 5).is_empty());
        assert!(sampler
            .next_pairs(&snapshot(vec![entry("a", 0.0, 1.0)], vec![]), 5)
            .is_empty());

        let two = snapshot(vec![entry("a", 0.0, 1.0), entry("b", 0.0, 1.0)], vec![]);
        assert_eq!(sampler.next_pairs(&two, 10).len(), 1);
        assert!(sampler.next_pairs(&two, 0).is_empty());
    }

    #[test]
    fn test_bounded_scan_is_deterministic_and_valid() {
        let sampler = UncertaintySampler::new(SamplerConfig {
            full_scan_limit: 10,
            rank_band: 2,
            sampled_pairs: 30,
            ..Default::default()
        });
        let entries: Vec<SnapshotEntry> = (0..50)
            .map(|i| entry(&format!("c{i:02}"), (i % 7) as f64 * 0.3, 1.0 + (i % 3) as f64))
            .collect();
        let snap = snapshot(entries, vec![]);

        let first = sampler.next_pairs(&snap, 20);
        let second = sampler.next_pairs(&snap, 20);
        assert_eq!(first, second);
        assert_eq!(first.len(), 20);
        for (a, b) in &first {
            assert!(a < b);
            assert!(snap.contains(a) && snap.contains(b));
        }
    }

    #[test]
    fn test_select_uses_cache_until_versions_change() {
        let mut sampler = UncertaintySampler::default();
        let snap = snapshot(
            vec![entry("a", 0.0, 4.0), entry("b", 0.0, 4.0), entry("c", 0.0, 4.0)],
            vec![],
        );
        let first = sampler.select(&snap, 1);
        assert_eq!(first, vec![("a".into(), "b".into())]);

        // Same versions: the cached answer is served even though estimates differ
        let mut changed = snapshot(
            vec![entry("a", 0.0, 0.1), entry("b", 0.0, 4.0), entry("c", 0.0, 4.0)],
            vec![],
        );
        assert_eq!(sampler.select(&changed, 1), first);

        changed.model_revision = 1;
        assert_eq!(sampler.select(&changed, 1), vec![("b".into(), "c".into())]);

        sampler.invalidate();
        assert_eq!(sampler.select(&snap, 1), first);
    }

    #[test]
    fn test_config_validation() {
        assert!(SamplerConfig::default().validate().is_ok());
        let bad = SamplerConfig {
            exploration_weight: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
