//! Round lifecycle state machine

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Where the pipeline is within a round
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    /// No round in progress
    #[default]
    Idle,
    /// Waiting for the generator's batch
    AwaitingCandidates,
    /// Label requests in flight
    AwaitingLabels,
    /// Applying labels and refitting
    Aggregating,
    /// Handing the signal to the training step
    Exporting,
}

impl PipelineState {
    /// Short name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingCandidates => "awaiting_candidates",
            Self::AwaitingLabels => "awaiting_labels",
            Self::Aggregating => "aggregating",
            Self::Exporting => "exporting",
        }
    }

    /// The state that follows this one in a successful round
    pub fn next(&self) -> Self {
        match self {
            Self::Idle => Self::AwaitingCandidates,
            Self::AwaitingCandidates => Self::AwaitingLabels,
            Self::AwaitingLabels => Self::Aggregating,
            Self::Aggregating => Self::Exporting,
            Self::Exporting => Self::Idle,
        }
    }

    /// Move to `to` if the cycle allows it
    ///
    /// Besides the forward step, any state may drop back to `Idle` when a
    /// round is abandoned.
    pub fn transition(&mut self, to: PipelineState) -> PipelineResult<()> {
        if to == self.next() || to == Self::Idle {
            tracing::trace!(from = self.name(), to = to.name(), "pipeline transition");
            *self = to;
            Ok(())
        } else {
            Err(PipelineError::InvalidTransition {
                from: self.name(),
                to: to.name(),
            })
        }
    }

    /// Whether a round is in progress
    pub fn is_busy(&self) -> bool {
        *self != Self::Idle
    }
}
