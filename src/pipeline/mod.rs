//! The preference-learning control loop
//!
//! A [`Pipeline`] cycles through
//!
//! ```text
//! Idle → AwaitingCandidates → AwaitingLabels → Aggregating → Exporting → Idle
//! ```
//!
//! pulling candidates from a [`Generator`], sending the sampler's pairs to a
//! [`Labeler`], folding the answers into the ledger and model, and handing
//! the resulting [`TrainingSignal`] to a [`TrainingSink`]. It is the only part
//! of the crate that talks to those collaborators.
//!
//! Collaborator failures are retried with exponential backoff. When a phase
//! runs out of attempts the round is abandoned, the state returns to `Idle`,
//! and none of that round's labels reach the ledger.

pub mod collaborators;
pub mod config;
pub mod export;
pub mod orchestrator;
pub mod pool;
pub mod state;

pub use collaborators::{Generator, LabelRequest, LabelSubmission, Labeler, TrainingSink};
pub use config::{PipelineConfig, MAX_RETRY_DELAY};
pub use export::{training_pairs, Reward, TrainingPair, TrainingSignal};
pub use orchestrator::{Pipeline, PipelineBuilder, RoundReport, SubmitOutcome};
pub use pool::{CandidatePool, PoolEntry, PruneConfig};
pub use state::PipelineState;
