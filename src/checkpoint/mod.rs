//! Checkpointing support for pipeline state persistence
//!
//! This module provides serialization and recovery of the ledger, the
//! model's estimates and the orchestrator's bookkeeping, so a pipeline can be
//! stopped and resumed without losing labels.

mod recovery;
mod state;

pub use recovery::*;
pub use state::{PipelineCheckpoint, CHECKPOINT_VERSION};
