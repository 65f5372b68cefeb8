//! The active candidate pool
//!
//! A subset of the registered candidates that the sampler may draw from.
//! Registration in the store is permanent; membership here is not.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ledger::CandidateId;

/// Bookkeeping for one active candidate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    /// Round in which the candidate joined the pool
    pub joined_round: u64,
    /// Last round in which the candidate was sent for labeling
    pub last_sampled_round: Option<u64>,
}

impl PoolEntry {
    /// Last round the candidate was touched (joined or sampled)
    pub fn last_used(&self) -> u64 {
        self.last_sampled_round.unwrap_or(self.joined_round)
    }
}

/// Limits applied when the pool is pruned
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PruneConfig {
    /// Retire candidates that joined this many rounds ago or earlier
    pub max_age_rounds: Option<u64>,
    /// Keep at most this many candidates, evicting the least recently used
    pub max_active: Option<usize>,
}

/// Active set with its own version counter
///
/// The version bumps on every membership or sampling change, so a sampler
/// cache keyed on it is never served stale.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidatePool {
    entries: BTreeMap<CandidateId, PoolEntry>,
    version: u64,
}

impl CandidatePool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate; returns `false` if it was already active
    pub fn insert(&mut self, id: CandidateId, round: u64) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(
            id,
            PoolEntry {
                joined_round: round,
                last_sampled_round: None,
            },
        );
        self.version += 1;
        true
    }

    /// Remove a candidate from the active set
    pub fn retire(&mut self, id: &CandidateId) -> bool {
        let removed = self.entries.remove(id).is_some();
        if removed {
            self.version += 1;
        }
        removed
    }

    /// Record that a candidate was sent for labeling in `round`
    pub fn mark_sampled(&mut self, id: &CandidateId, round: u64) {
        if let Some(entry) = self.entries.get_mut(id) {
            if entry.last_sampled_round != Some(round) {
                entry.last_sampled_round = Some(round);
                self.version += 1;
            }
        }
    }

    /// Retire aged-out and least recently used candidates
    ///
    /// Returns the retired ids in the order they were removed.
    pub fn prune(&mut self, round: u64, config: &PruneConfig) -> Vec<CandidateId> {
        let mut retired = Vec::new();

        if let Some(max_age) = config.max_age_rounds {
            let expired: Vec<CandidateId> = self
                .entries
                .iter()
                .filter(|(_, entry)| round.saturating_sub(entry.joined_round) >= max_age)
                .map(|(id, _)| id.clone())
                .collect();
            for id in expired {
                self.retire(&id);
                retired.push(id);
            }
        }

        if let Some(max_active) = config.max_active {
            if self.entries.len() > max_active {
                let mut by_use: Vec<(u64, CandidateId)> = self
                    .entries
                    .iter()
                    .map(|(id, entry)| (entry.last_used(), id.clone()))
                    .collect();
                by_use.sort();
                let excess = self.entries.len() - max_active;
                for (_, id) in by_use.into_iter().take(excess) {
                    self.retire(&id);
                    retired.push(id);
                }
            }
        }

        retired
    }

    /// Whether the candidate is active
    pub fn contains(&self, id: &CandidateId) -> bool {
        self.entries.contains_key(id)
    }

    /// Bookkeeping for an active candidate
    pub fn entry(&self, id: &CandidateId) -> Option<&PoolEntry> {
        self.entries.get(id)
    }

    /// Active ids in id order
    pub fn ids(&self) -> impl Iterator<Item = &CandidateId> {
        self.entries.keys()
    }

    /// Number of active candidates
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current pool version
    pub fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(ids: &[(&str, u64)]) -> CandidatePool {
        let mut pool = CandidatePool::new();
        for (id, round) in ids {
            pool.insert((*id).into(), *round);
        }
        pool
    }

    #[test]
    fn test_insert_and_version() {
        let mut pool = CandidatePool::new();
        assert!(pool.insert("a".into(), 0));
        assert!(!pool.insert("a".into(), 1));
        assert_eq!(pool.version(), 1);
        assert_eq!(pool.len(), 1);

        pool.mark_sampled(&"a".into(), 1);
        assert_eq!(pool.version(), 2);
        pool.mark_sampled(&"a".into(), 1);
        assert_eq!(pool.version(), 2);
    }

    #[test]
    fn test_prune_by_age() {
        let mut pool = pool(&[("old", 0), ("mid", 2), ("new", 4)]);
        let config = PruneConfig {
            max_age_rounds: Some(3),
            max_active: None,
        };

        let retired = pool.prune(4, &config);
        assert_eq!(retired, vec![CandidateId::from("old")]);
        assert!(pool.contains(&"mid".into()));
    }

    #[test]
    fn test_prune_lru() {
        let mut pool = pool(&[("a", 0), ("b", 0), ("c", 1)]);
        pool.mark_sampled(&"a".into(), 2);
        let config = PruneConfig {
            max_age_rounds: None,
            max_active: Some(2),
        };

        let retired = pool.prune(2, &config);
        assert_eq!(retired, vec![CandidateId::from("b")]);
        let ids: Vec<&str> = pool.ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_prune_without_limits_is_noop() {
        let mut pool = pool(&[("a", 0)]);
        let version = pool.version();
        assert!(pool.prune(100, &PruneConfig::default()).is_empty());
        assert_eq!(pool.version(), version);
    }
}
