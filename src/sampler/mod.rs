//! Active pair selection
//!
//! Given the active pool and current strength estimates, choose which pairs a
//! rater should judge next. Selection is a pure function of a
//! [`PoolSnapshot`], so fixtures are reproducible and repeated calls on an
//! unchanged snapshot return the same pairs.
//!
//! Small pools are scanned exhaustively. Above
//! [`SamplerConfig::full_scan_limit`] only a bounded set is scored: each
//! candidate's neighbours in rank order plus a seeded random sample of pairs.
//!
//! # Example
//!
//! ```rust
//! use alife_rlhf::sampler::{PoolSnapshot, SamplerConfig, SnapshotEntry, UncertaintySampler};
//!
//! let entries = ["a", "b", "c"].map(|id| SnapshotEntry {
//!     id: id.into(),
//!     mean: 0.0,
//!     variance: 4.0,
//! });
//! let snapshot = PoolSnapshot::from_entries(entries, [], 1.0, 4.0);
//!
//! let sampler = UncertaintySampler::new(SamplerConfig::default());
//! let pairs = sampler.next_pairs(&snapshot, 2);
//! assert_eq!(pairs.len(), 2);
//! ```

pub mod exposure;
pub mod snapshot;
pub mod uncertainty;

pub use exposure::balance_exposure;
pub use snapshot::{PoolSnapshot, SnapshotEntry};
pub use uncertainty::{pair_score, SamplerConfig, ScoredPair, UncertaintySampler};
