//! Append-only comparison ledger
//!
//! The ledger is the single source of truth for preference data: a registry
//! of candidate identifiers plus the ordered log of every pairwise outcome
//! ever reported. It holds no ranking logic. Entries are never mutated or
//! removed; a correction is simply a later comparison for the same pair.
//!
//! # Example
//!
//! ```rust
//! use alife_rlhf::ledger::{Candidate, ComparisonStore, Outcome};
//!
//! let mut store = ComparisonStore::new();
//! store.register(Candidate::new("a")).unwrap();
//! store.register(Candidate::new("b")).unwrap();
//! store.record(&"a".into(), &"b".into(), Outcome::AWins, "rater-1").unwrap();
//!
//! assert_eq!(store.version(), 1);
//! assert_eq!(store.comparisons_for(&"a".into()).len(), 1);
//! ```

pub mod candidate;
pub mod comparison;
pub mod store;

pub use candidate::{Candidate, CandidateHandle, CandidateId, PayloadSource};
pub use comparison::{Comparison, Outcome};
pub use store::{ComparisonStore, LedgerStats};
pub(crate) use store::pair_key;
