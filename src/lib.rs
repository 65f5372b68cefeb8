//! # alife-rlhf
//!
//! Preference aggregation and active pair sampling for training parameter
//! generators from human feedback.
//!
//! Raters compare two candidates at a time. The crate keeps those judgements
//! in an append-only ledger, turns them into Bradley–Terry strength estimates
//! with uncertainty, picks the next pairs whose labels would be most
//! informative, and drives the whole loop against external collaborators.
//!
//! ## Core Concepts
//!
//! - **Ledger**: [`ComparisonStore`](ledger::ComparisonStore) is the single
//!   source of truth; every other structure can be rebuilt from it
//! - **Strengths**: [`RankingModel`](ranking::RankingModel) keeps a mean and
//!   variance per candidate, updated cheaply per label and refit in batch
//! - **Sampling**: [`UncertaintySampler`](sampler::UncertaintySampler) scores
//!   pairs by combined uncertainty and closeness of strength
//! - **Orchestration**: [`Pipeline`](pipeline::Pipeline) runs generate, label,
//!   aggregate and export rounds with retries and timeouts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use alife_rlhf::prelude::*;
//!
//! let mut pipeline = PipelineBuilder::new()
//!     .pairs_per_round(16)
//!     .generator(my_generator)
//!     .labeler(my_labeling_queue)
//!     .training_sink(my_trainer)
//!     .build()?;
//!
//! let report = pipeline.run_round().await?;
//! let signal = pipeline.export();
//! ```

#[cfg(feature = "checkpoint")]
pub mod checkpoint;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod ranking;
pub mod sampler;

/// Prelude module for convenient imports
pub mod prelude {
    #[cfg(feature = "checkpoint")]
    pub use crate::checkpoint::*;
    pub use crate::error::*;
    pub use crate::ledger::*;
    pub use crate::pipeline::*;
    pub use crate::ranking::*;
    pub use crate::sampler::*;
}
