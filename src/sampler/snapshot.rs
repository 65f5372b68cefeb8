//! Immutable view of the pool the sampler scores

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ledger::{pair_key, CandidateId, ComparisonStore};
use crate::pipeline::pool::CandidatePool;
use crate::ranking::RankingModel;

/// One active candidate as the sampler sees it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Candidate identifier
    pub id: CandidateId,
    /// Strength mean
    pub mean: f64,
    /// Strength variance
    pub variance: f64,
}

/// Everything [`next_pairs`](super::UncertaintySampler::next_pairs) depends on
///
/// Entries are kept sorted by id, so index order and identifier order agree.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolSnapshot {
    entries: Vec<SnapshotEntry>,
    pair_counts: HashMap<(CandidateId, CandidateId), u32>,
    /// Logistic scale of the model the estimates come from
    pub scale: f64,
    /// Prior variance of that model
    pub prior_variance: f64,
    /// Store version at capture time
    pub ledger_version: u64,
    /// Pool version at capture time
    pub pool_version: u64,
    /// Model revision at capture time
    pub model_revision: u64,
}

impl PoolSnapshot {
    /// Capture the active pool with its current estimates and repeat counts
    pub fn capture(pool: &CandidatePool, store: &ComparisonStore, model: &RankingModel) -> Self {
        let entries = pool
            .ids()
            .map(|id| {
                let estimate = model.estimate(id);
                SnapshotEntry {
                    id: id.clone(),
                    mean: estimate.mean,
                    variance: estimate.variance,
                }
            })
            .collect();

        let pair_counts = store
            .pair_counts()
            .iter()
            .filter(|((a, b), _)| pool.contains(a) && pool.contains(b))
            .map(|(pair, &count)| (pair.clone(), count))
            .collect();

        Self {
            entries,
            pair_counts,
            scale: model.config().scale,
            prior_variance: model.config().prior_variance,
            ledger_version: store.version(),
            pool_version: pool.version(),
            model_revision: model.revision(),
        }
    }

    /// Build a snapshot from explicit entries (fixtures, offline replays)
    pub fn from_entries(
        entries: impl IntoIterator<Item = SnapshotEntry>,
        pair_counts: impl IntoIterator<Item = ((CandidateId, CandidateId), u32)>,
        scale: f64,
        prior_variance: f64,
    ) -> Self {
        let mut entries: Vec<SnapshotEntry> = entries.into_iter().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries.dedup_by(|a, b| a.id == b.id);

        let pair_counts = pair_counts
            .into_iter()
            .map(|((a, b), count)| (pair_key(&a, &b), count))
            .collect();

        Self {
            entries,
            pair_counts,
            scale,
            prior_variance,
            ledger_version: 0,
            pool_version: 0,
            model_revision: 0,
        }
    }

    /// Active candidates in id order
    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    /// Number of active candidates
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no candidate is active
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the candidate is part of the snapshot
    pub fn contains(&self, id: &CandidateId) -> bool {
        self.entries.binary_search_by(|e| e.id.cmp(id)).is_ok()
    }

    /// Recorded comparisons of the unordered pair
    pub fn pair_count(&self, a: &CandidateId, b: &CandidateId) -> u32 {
        self.pair_counts.get(&pair_key(a, b)).copied().unwrap_or(0)
    }
}
