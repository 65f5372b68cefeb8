//! Batch ordering for even rater exposure

use std::collections::HashMap;

use crate::ledger::CandidateId;

/// Reorder a batch so candidates show up evenly
///
/// Greedy: repeatedly take the remaining pair whose two candidates have been
/// shown the fewest times so far (sum of both counts), keeping the incoming
/// order among equals. No candidate therefore appears `n + 1` times while a
/// candidate it could be paired with has appeared fewer than `n` times. The
/// output is a permutation of the input.
pub fn balance_exposure(pairs: Vec<(CandidateId, CandidateId)>) -> Vec<(CandidateId, CandidateId)> {
    let mut shown: HashMap<CandidateId, usize> = HashMap::new();
    let mut remaining = pairs;
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let exposure = |id: &CandidateId| shown.get(id).copied().unwrap_or(0);
        let mut best = 0;
        let mut best_score = usize::MAX;
        for (idx, (a, b)) in remaining.iter().enumerate() {
            let score = exposure(a) + exposure(b);
            if score < best_score {
                best = idx;
                best_score = score;
            }
        }

        let (a, b) = remaining.remove(best);
        *shown.entry(a.clone()).or_insert(0) += 1;
        *shown.entry(b.clone()).or_insert(0) += 1;
        ordered.push((a, b));
    }

    ordered
}
