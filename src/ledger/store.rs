//! The comparison store: candidate registry plus append-only ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::candidate::{Candidate, CandidateId};
use super::comparison::{Comparison, Outcome};
use crate::error::LedgerError;

/// Summary counts over the ledger
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Registered candidates
    pub candidates: usize,
    /// Ledger entries of any outcome
    pub comparisons: usize,
    /// Entries with a winner
    pub decided: usize,
    /// Entries recorded as ties
    pub ties: usize,
    /// Entries recorded as `Unknown`
    pub skipped: usize,
}

/// Append-only record of pairwise outcomes and the registry of known candidates
///
/// Every successful [`record`](Self::record) bumps a monotonically increasing
/// version used by downstream caches and by incremental refits to know which
/// entries they have already seen. Failed calls leave both the ledger and the
/// version untouched.
#[derive(Clone, Debug, Default)]
pub struct ComparisonStore {
    candidates: BTreeMap<CandidateId, Candidate>,
    ledger: Vec<Comparison>,
    by_candidate: HashMap<CandidateId, Vec<usize>>,
    pair_counts: HashMap<(CandidateId, CandidateId), u32>,
    version: u64,
}

impl ComparisonStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from durable state, validating every entry
    ///
    /// Sequences are renumbered densely; timestamps and raters are preserved.
    /// On failure returns the position of the offending record, counting
    /// candidates first and comparisons after them (the order a ledger log
    /// writes them in).
    pub fn replay(
        candidates: impl IntoIterator<Item = Candidate>,
        comparisons: impl IntoIterator<Item = Comparison>,
    ) -> Result<Self, (usize, LedgerError)> {
        let mut store = Self::new();
        let mut position = 0;
        for candidate in candidates {
            store.register(candidate).map_err(|e| (position, e))?;
            position += 1;
        }
        for comparison in comparisons {
            store.restore(comparison).map_err(|e| (position, e))?;
            position += 1;
        }
        Ok(store)
    }

    /// Append a comparison read back from durable storage
    ///
    /// Keeps the original timestamp and rater; the sequence number is
    /// reassigned.
    pub fn restore(&mut self, comparison: Comparison) -> Result<&Comparison, LedgerError> {
        self.append(
            &comparison.candidate_a,
            &comparison.candidate_b,
            comparison.outcome,
            comparison.rater_id,
            comparison.timestamp,
        )
    }

    /// Register a new candidate with zero comparisons
    pub fn register(&mut self, candidate: Candidate) -> Result<(), LedgerError> {
        if self.candidates.contains_key(&candidate.id) {
            return Err(LedgerError::DuplicateCandidate(candidate.id));
        }
        self.candidates.insert(candidate.id.clone(), candidate);
        Ok(())
    }

    /// Append a comparison between two registered candidates
    pub fn record(
        &mut self,
        a: &CandidateId,
        b: &CandidateId,
        outcome: Outcome,
        rater_id: impl Into<String>,
    ) -> Result<&Comparison, LedgerError> {
        self.append(a, b, outcome, rater_id.into(), Utc::now())
    }

    fn append(
        &mut self,
        a: &CandidateId,
        b: &CandidateId,
        outcome: Outcome,
        rater_id: String,
        timestamp: DateTime<Utc>,
    ) -> Result<&Comparison, LedgerError> {
        for id in [a, b] {
            if !self.candidates.contains_key(id) {
                return Err(LedgerError::UnknownCandidate(id.clone()));
            }
        }
        if a == b {
            return Err(LedgerError::SelfComparison(a.clone()));
        }

        let index = self.ledger.len();
        self.ledger.push(Comparison {
            sequence: index as u64,
            candidate_a: a.clone(),
            candidate_b: b.clone(),
            outcome,
            timestamp,
            rater_id,
        });
        self.by_candidate.entry(a.clone()).or_default().push(index);
        self.by_candidate.entry(b.clone()).or_default().push(index);
        *self.pair_counts.entry(pair_key(a, b)).or_insert(0) += 1;
        self.version += 1;

        Ok(&self.ledger[index])
    }

    /// All ledger entries touching the candidate, in insertion order
    pub fn comparisons_for(&self, id: &CandidateId) -> Vec<&Comparison> {
        self.by_candidate
            .get(id)
            .map(|indices| indices.iter().map(|&i| &self.ledger[i]).collect())
            .unwrap_or_default()
    }

    /// Identifiers of every registered candidate
    pub fn all_candidates(&self) -> BTreeSet<CandidateId> {
        self.candidates.keys().cloned().collect()
    }

    /// Registered candidate by id
    pub fn candidate(&self, id: &CandidateId) -> Option<&Candidate> {
        self.candidates.get(id)
    }

    /// Iterate registered candidates in id order
    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.values()
    }

    /// Whether the candidate is registered
    pub fn contains(&self, id: &CandidateId) -> bool {
        self.candidates.contains_key(id)
    }

    /// The full ledger in insertion order
    pub fn comparisons(&self) -> &[Comparison] {
        &self.ledger
    }

    /// Entries appended after the store was at `version`
    pub fn since(&self, version: u64) -> &[Comparison] {
        let start = (version as usize).min(self.ledger.len());
        &self.ledger[start..]
    }

    /// Current ledger version (number of successful appends)
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of ledger entries
    pub fn len(&self) -> usize {
        self.ledger.len()
    }

    /// Whether the ledger is empty
    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty()
    }

    /// Number of registered candidates
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// How many times the unordered pair has been recorded, any outcome
    pub fn pair_count(&self, a: &CandidateId, b: &CandidateId) -> u32 {
        self.pair_counts.get(&pair_key(a, b)).copied().unwrap_or(0)
    }

    /// Per-pair record counts keyed by canonical pair
    pub fn pair_counts(&self) -> &HashMap<(CandidateId, CandidateId), u32> {
        &self.pair_counts
    }

    /// Summary counts
    pub fn stats(&self) -> LedgerStats {
        let mut stats = LedgerStats {
            candidates: self.candidates.len(),
            comparisons: self.ledger.len(),
            ..Default::default()
        };
        for comparison in &self.ledger {
            match comparison.outcome {
                Outcome::AWins | Outcome::BWins => stats.decided += 1,
                Outcome::Tie => stats.ties += 1,
                Outcome::Unknown => stats.skipped += 1,
            }
        }
        stats
    }
}

/// Canonical (order-insensitive) key for a pair
pub(crate) fn pair_key(a: &CandidateId, b: &CandidateId) -> (CandidateId, CandidateId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}
