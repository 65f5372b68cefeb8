//! Pipeline configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::pool::PruneConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::ranking::RankingConfig;
use crate::sampler::SamplerConfig;

/// Upper bound on any single backoff delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Configuration for a [`Pipeline`](super::Pipeline)
///
/// Durations are stored in milliseconds so the struct reads naturally from
/// JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Candidates requested from the generator per round
    pub candidates_per_round: usize,
    /// Pairs sent for labeling per round
    pub pairs_per_round: usize,
    /// Label requests in flight at once
    pub label_concurrency: usize,
    /// Attempts per collaborator phase before the round is abandoned
    pub max_attempts: u32,
    /// Base delay of the exponential backoff between attempts
    pub retry_base_delay_ms: u64,
    /// Bound on generator and training sink calls
    pub collaborator_timeout_ms: u64,
    /// Bound on a single label request; expiry records `Unknown`
    pub label_timeout_ms: u64,
    /// Run a batch refit after the incremental update of every round
    pub batch_refit: bool,
    /// Bound on the batch refit; expiry cancels it
    pub refit_timeout_ms: u64,
    /// Reorder each batch for even candidate exposure
    pub balance_exposure: bool,
    /// Active pool limits
    pub prune: PruneConfig,
    /// Strength estimation settings
    pub ranking: RankingConfig,
    /// Pair selection settings
    pub sampler: SamplerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            candidates_per_round: 8,
            pairs_per_round: 16,
            label_concurrency: 4,
            max_attempts: 3,
            retry_base_delay_ms: 500,
            collaborator_timeout_ms: 30_000,
            label_timeout_ms: 300_000,
            batch_refit: true,
            refit_timeout_ms: 5_000,
            balance_exposure: true,
            prune: PruneConfig::default(),
            ranking: RankingConfig::default(),
            sampler: SamplerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::Configuration(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> PipelineResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Configuration(e.to_string()))
    }

    /// Check that every parameter is in range
    pub fn validate(&self) -> PipelineResult<()> {
        if self.pairs_per_round == 0 {
            return Err(PipelineError::Configuration(
                "pairs_per_round must be at least 1".into(),
            ));
        }
        if self.label_concurrency == 0 {
            return Err(PipelineError::Configuration(
                "label_concurrency must be at least 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(PipelineError::Configuration(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.retry_base_delay() > MAX_RETRY_DELAY {
            return Err(PipelineError::Configuration(format!(
                "retry_base_delay_ms must be at most {}, got {}",
                MAX_RETRY_DELAY.as_millis(),
                self.retry_base_delay_ms
            )));
        }
        if self.prune.max_active == Some(0) {
            return Err(PipelineError::Configuration(
                "prune.max_active must be at least 1 when set".into(),
            ));
        }
        self.ranking.validate()?;
        self.sampler.validate()
    }

    /// Base delay between attempts
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Bound on generator and training sink calls
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    /// Bound on a single label request
    pub fn label_timeout(&self) -> Duration {
        Duration::from_millis(self.label_timeout_ms)
    }

    /// Bound on the batch refit
    pub fn refit_timeout(&self) -> Duration {
        Duration::from_millis(self.refit_timeout_ms)
    }
}
