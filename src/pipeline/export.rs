//! Reward signal handed to the generator's training step

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConvergenceWarning;
use crate::ledger::{CandidateId, ComparisonStore};
use crate::ranking::RankingModel;

/// Reward for one candidate
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    /// Strength in logistic units (`mean / scale`)
    pub reward: f64,
    /// Share of prior uncertainty removed by evidence, in `[0, 1]`
    pub confidence: f64,
}

/// Snapshot of the ranking in the form training consumes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingSignal {
    /// Round the signal was produced in
    pub round: u64,
    /// Ledger version the estimates include
    pub ledger_version: u64,
    /// Reward per registered candidate
    pub rewards: BTreeMap<CandidateId, Reward>,
    /// Candidates best first (mean descending, id ascending)
    pub ranking: Vec<CandidateId>,
    /// Set when the estimates are a best-available fallback
    pub warnings: Vec<ConvergenceWarning>,
    /// When the signal was produced
    pub created_at: DateTime<Utc>,
}

impl TrainingSignal {
    /// Build the signal from the model's current estimates
    pub fn from_model(
        model: &RankingModel,
        round: u64,
        warnings: Vec<ConvergenceWarning>,
    ) -> Self {
        let config = model.config();
        let rewards = model
            .estimates()
            .iter()
            .map(|(id, estimate)| {
                (
                    id.clone(),
                    Reward {
                        reward: estimate.mean / config.scale,
                        confidence: estimate.confidence(config.prior_variance),
                    },
                )
            })
            .collect();

        Self {
            round,
            ledger_version: model.synced_version(),
            rewards,
            ranking: model.ranking().into_iter().map(|(id, _)| id.clone()).collect(),
            warnings,
            created_at: Utc::now(),
        }
    }

    /// Whether downstream training should discount this signal
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// One training example: the dataset triplet `(a, b, winner)`
///
/// `winner` is 0.0 when `candidate_a` was preferred, 1.0 when `candidate_b`
/// was, and 0.5 for a draw.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingPair {
    /// First candidate
    pub candidate_a: CandidateId,
    /// Second candidate
    pub candidate_b: CandidateId,
    /// Winner encoding
    pub winner: f64,
}

/// Every informative comparison of the ledger as a training triplet
pub fn training_pairs(store: &ComparisonStore) -> Vec<TrainingPair> {
    store
        .comparisons()
        .iter()
        .filter_map(|comparison| {
            comparison.outcome.winner_value().map(|winner| TrainingPair {
                candidate_a: comparison.candidate_a.clone(),
                candidate_b: comparison.candidate_b.clone(),
                winner,
            })
        })
        .collect()
}
