//! Pairwise comparison records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidate::CandidateId;

/// Outcome of a pairwise comparison, oriented to `(candidate_a, candidate_b)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// The first candidate was preferred
    AWins,
    /// The second candidate was preferred
    BWins,
    /// Neither was preferred
    Tie,
    /// The rater skipped or no answer arrived; kept for audit only
    Unknown,
}

impl Outcome {
    /// Score credited to the first candidate: 1 for a win, 0.5 for a tie
    ///
    /// Returns `None` for `Unknown`, which carries no statistical evidence.
    pub fn score_a(&self) -> Option<f64> {
        match self {
            Self::AWins => Some(1.0),
            Self::BWins => Some(0.0),
            Self::Tie => Some(0.5),
            Self::Unknown => None,
        }
    }

    /// The same outcome seen from the other side
    pub fn flipped(&self) -> Self {
        match self {
            Self::AWins => Self::BWins,
            Self::BWins => Self::AWins,
            other => *other,
        }
    }

    /// Whether this outcome contributes evidence to the model
    pub fn is_informative(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Parse the dataset "winner" encoding: 0 = first wins, 1 = second wins, 0.5 = draw
    ///
    /// Values in between round to the nearest of the three; values outside
    /// `[0, 1]` (and NaN) are rejected.
    pub fn from_winner(winner: f64) -> Option<Self> {
        if !(0.0..=1.0).contains(&winner) {
            return None;
        }
        Some(if winner < 0.25 {
            Self::AWins
        } else if winner > 0.75 {
            Self::BWins
        } else {
            Self::Tie
        })
    }

    /// The dataset "winner" encoding of this outcome
    pub fn winner_value(&self) -> Option<f64> {
        self.score_a().map(|s| 1.0 - s)
    }
}

/// One immutable ledger entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Position in the ledger (0-based, dense)
    pub sequence: u64,
    /// First candidate
    pub candidate_a: CandidateId,
    /// Second candidate
    pub candidate_b: CandidateId,
    /// Outcome oriented to `(candidate_a, candidate_b)`
    pub outcome: Outcome,
    /// When the comparison was appended
    pub timestamp: DateTime<Utc>,
    /// Who produced the judgement
    pub rater_id: String,
}

impl Comparison {
    /// Whether this entry involves the candidate
    pub fn involves(&self, id: &CandidateId) -> bool {
        &self.candidate_a == id || &self.candidate_b == id
    }

    /// The pair in canonical order with the outcome re-oriented to match
    pub fn canonical(&self) -> (&CandidateId, &CandidateId, Outcome) {
        if self.candidate_a <= self.candidate_b {
            (&self.candidate_a, &self.candidate_b, self.outcome)
        } else {
            (&self.candidate_b, &self.candidate_a, self.outcome.flipped())
        }
    }

    /// The other side of the comparison, if `id` takes part in it
    pub fn opponent(&self, id: &CandidateId) -> Option<&CandidateId> {
        if &self.candidate_a == id {
            Some(&self.candidate_b)
        } else if &self.candidate_b == id {
            Some(&self.candidate_a)
        } else {
            None
        }
    }
}
