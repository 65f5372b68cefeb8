//! Interfaces to the systems the pipeline drives
//!
//! Candidate generation, human labeling and generator training all live
//! outside the crate. The pipeline only sees them through these traits.

use serde::{Deserialize, Serialize};

use super::export::TrainingSignal;
use crate::error::CollaboratorError;
use crate::ledger::{Candidate, CandidateId, Outcome};

/// Produces fresh candidates
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    /// Emit `n` new candidates with identifiers never used before
    async fn generate_batch(&self, n: usize) -> Result<Vec<Candidate>, CollaboratorError>;
}

/// Collects a human judgement for one pair
#[async_trait::async_trait]
pub trait Labeler: Send + Sync {
    /// Present the pair and wait for the rater's answer
    async fn label(&self, request: LabelRequest) -> Result<LabelSubmission, CollaboratorError>;
}

/// Consumes the exported reward signal
#[async_trait::async_trait]
pub trait TrainingSink: Send + Sync {
    /// Hand the signal to the generator's training step
    async fn consume(&self, signal: &TrainingSignal) -> Result<(), CollaboratorError>;
}

/// A pair dispatched for labeling
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRequest {
    /// Round the request belongs to
    pub round: u64,
    /// Position of the pair in the round's batch
    pub index: usize,
    /// Candidates to compare
    pub pair: (CandidateId, CandidateId),
}

impl LabelRequest {
    /// Stable identifier for the request, usable as a submission id
    pub fn request_id(&self) -> String {
        format!("round-{}-pair-{}", self.round, self.index)
    }
}

/// A rater's answer for one pair
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelSubmission {
    /// The compared pair; the outcome is oriented to this order
    pub pair: (CandidateId, CandidateId),
    /// The judgement
    pub outcome: Outcome,
    /// Who produced the judgement
    pub rater_id: String,
    /// Deduplication key: re-delivered submissions carry the same id
    pub submission_id: String,
}

impl LabelSubmission {
    /// Create a submission
    pub fn new(
        pair: (CandidateId, CandidateId),
        outcome: Outcome,
        rater_id: impl Into<String>,
        submission_id: impl Into<String>,
    ) -> Self {
        Self {
            pair,
            outcome,
            rater_id: rater_id.into(),
            submission_id: submission_id.into(),
        }
    }

    /// Placeholder recorded when a request ran out of time
    pub fn timed_out(request: &LabelRequest) -> Self {
        Self::new(
            request.pair.clone(),
            Outcome::Unknown,
            "timeout",
            format!("{}:timeout", request.request_id()),
        )
    }

    /// Whether the submission answers the request (either orientation)
    pub fn answers(&self, request: &LabelRequest) -> bool {
        let (a, b) = &request.pair;
        (&self.pair.0 == a && &self.pair.1 == b) || (&self.pair.0 == b && &self.pair.1 == a)
    }
}
