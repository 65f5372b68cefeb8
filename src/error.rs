//! Error types for alife-rlhf
//!
//! This module defines all error types used throughout the library.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::CandidateId;

/// Ledger integrity errors
///
/// These are programming errors at the store boundary and are surfaced
/// immediately; the ledger is left unchanged when one is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A candidate with this identifier is already registered
    #[error("Duplicate candidate: {0}")]
    DuplicateCandidate(CandidateId),

    /// A comparison referenced a candidate that was never registered
    #[error("Unknown candidate: {0}")]
    UnknownCandidate(CandidateId),

    /// A comparison paired a candidate with itself
    #[error("Candidate {0} cannot be compared with itself")]
    SelfComparison(CandidateId),
}

/// Error type for external collaborator failures (generator, labeler, training sink)
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollaboratorError {
    /// The collaborator did not answer in time
    #[error("{collaborator} timed out after {elapsed:?}")]
    Timeout {
        collaborator: &'static str,
        elapsed: Duration,
    },

    /// The collaborator answered with malformed data
    #[error("{collaborator} protocol error: {message}")]
    Protocol {
        collaborator: &'static str,
        message: String,
    },

    /// The collaborator is unavailable (transport failure, crashed worker, ...)
    #[error("{collaborator} unavailable: {message}")]
    Unavailable {
        collaborator: &'static str,
        message: String,
        retryable: bool,
    },
}

impl CollaboratorError {
    /// Create a timeout error
    pub fn timeout(collaborator: &'static str, elapsed: Duration) -> Self {
        Self::Timeout {
            collaborator,
            elapsed,
        }
    }

    /// Create a protocol error
    pub fn protocol(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            collaborator,
            message: message.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(
        collaborator: &'static str,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self::Unavailable {
            collaborator,
            message: message.into(),
            retryable,
        }
    }

    /// Whether a round should be retried after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Protocol { .. } => true,
            Self::Unavailable { retryable, .. } => *retryable,
        }
    }

    /// Short error code for logging
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Protocol { .. } => "protocol_error",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

/// Non-fatal notice that a batch fit stopped before its convergence criterion
///
/// Attached to exported training signals so downstream training can discount
/// a best-available estimate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceWarning {
    /// Iterations performed before stopping
    pub iterations: usize,
    /// Largest mean change in the final iteration
    pub max_delta: f64,
    /// Whether the fit was cancelled rather than hitting its iteration cap
    pub cancelled: bool,
}

impl std::fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cancelled {
            write!(
                f,
                "fit cancelled after {} iterations (max |Δmean| = {:.3e})",
                self.iterations, self.max_delta
            )
        } else {
            write!(
                f,
                "fit did not converge in {} iterations (max |Δmean| = {:.3e})",
                self.iterations, self.max_delta
            )
        }
    }
}

/// Error type for checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// IO error during checkpoint
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Checkpoint version is too new
    #[error("Checkpoint version {0} is newer than supported")]
    VersionTooNew(u32),

    /// Checkpoint file not found
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Corrupted checkpoint data
    #[error("Corrupted checkpoint: {0}")]
    Corrupted(String),

    /// Replayed log violates ledger integrity
    #[error("Ledger replay failed at record {index}: {source}")]
    Replay {
        index: usize,
        #[source]
        source: LedgerError,
    },
}

/// Top-level error type for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Ledger integrity error
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Collaborator failure that was not retried
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// Checkpoint error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// State machine was asked for a transition it does not allow
    #[error("Invalid pipeline transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// Retries were exhausted; the round was dropped
    #[error("Round {round} abandoned after {attempts} attempts: {last_error}")]
    RoundAbandoned {
        round: u64,
        attempts: u32,
        last_error: CollaboratorError,
    },
}

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
