//! Checkpoint state structures
//!
//! A checkpoint holds the durable ledger, the model's estimates and the
//! orchestrator's bookkeeping. Restoring replays the ledger through the
//! store's own validation instead of trusting the serialized indices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::{CheckpointError, ConvergenceWarning};
use crate::ledger::{Candidate, Comparison, ComparisonStore};
use crate::pipeline::CandidatePool;
use crate::ranking::StrengthSnapshot;

/// Current checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Complete pipeline state for checkpointing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineCheckpoint {
    /// Schema version for forward compatibility
    pub version: u32,
    /// Number of the next round
    pub round: u64,
    /// When the checkpoint was taken
    pub created_at: DateTime<Utc>,
    /// Registered candidates
    pub candidates: Vec<Candidate>,
    /// Ledger entries in insertion order
    pub comparisons: Vec<Comparison>,
    /// Model estimates at checkpoint time
    pub strengths: StrengthSnapshot,
    /// Active pool and its bookkeeping
    pub pool: CandidatePool,
    /// Submission ids already applied
    pub processed_submissions: BTreeSet<String>,
    /// Warnings attached to the most recent export
    pub warnings: Vec<ConvergenceWarning>,
    /// Custom metadata
    pub metadata: HashMap<String, String>,
}

impl PipelineCheckpoint {
    /// Create a checkpoint from a ledger, estimates and pool
    pub fn new(
        round: u64,
        store: &ComparisonStore,
        strengths: StrengthSnapshot,
        pool: CandidatePool,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            round,
            created_at: Utc::now(),
            candidates: store.candidates().cloned().collect(),
            comparisons: store.comparisons().to_vec(),
            strengths,
            pool,
            processed_submissions: BTreeSet::new(),
            warnings: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Set the applied submission ids
    pub fn with_processed(mut self, processed: BTreeSet<String>) -> Self {
        self.processed_submissions = processed;
        self
    }

    /// Set the export warnings
    pub fn with_warnings(mut self, warnings: Vec<ConvergenceWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Add custom metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check if this checkpoint can be loaded
    pub fn is_compatible(&self) -> bool {
        self.version <= CHECKPOINT_VERSION
    }

    /// Rebuild the comparison store, validating every entry
    pub fn restore_store(&self) -> Result<ComparisonStore, CheckpointError> {
        ComparisonStore::replay(self.candidates.iter().cloned(), self.comparisons.iter().cloned())
            .map_err(|(index, source)| CheckpointError::Replay { index, source })
    }

    pub(crate) fn into_parts(self) -> Result<RestoredParts, CheckpointError> {
        if !self.is_compatible() {
            return Err(CheckpointError::VersionTooNew(self.version));
        }
        let store = self.restore_store()?;

        if let Some(stray) = self.pool.ids().find(|id| !store.contains(id)) {
            return Err(CheckpointError::Corrupted(format!(
                "pool member {stray} is not registered"
            )));
        }
        if self.strengths.synced_version > store.version() {
            return Err(CheckpointError::Corrupted(format!(
                "estimates synced to version {} but the ledger ends at {}",
                self.strengths.synced_version,
                store.version()
            )));
        }

        Ok(RestoredParts {
            store,
            strengths: self.strengths,
            pool: self.pool,
            round: self.round,
            processed: self.processed_submissions,
            warnings: self.warnings,
        })
    }
}

/// Validated pieces a pipeline is rebuilt from
pub(crate) struct RestoredParts {
    pub(crate) store: ComparisonStore,
    pub(crate) strengths: StrengthSnapshot,
    pub(crate) pool: CandidatePool,
    pub(crate) round: u64,
    pub(crate) processed: BTreeSet<String>,
    pub(crate) warnings: Vec<ConvergenceWarning>,
}
