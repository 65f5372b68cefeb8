//! The round loop binding generation, labeling, aggregation and export

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use super::collaborators::{Generator, LabelRequest, LabelSubmission, Labeler, TrainingSink};
use super::config::{PipelineConfig, MAX_RETRY_DELAY};
use super::export::{training_pairs, TrainingPair, TrainingSignal};
use super::pool::CandidatePool;
use super::state::PipelineState;
#[cfg(feature = "checkpoint")]
use crate::checkpoint::PipelineCheckpoint;
use crate::error::{CollaboratorError, ConvergenceWarning, PipelineError, PipelineResult};
use crate::ledger::{Candidate, CandidateId, ComparisonStore};
use crate::ranking::{BradleyTerry, FitInput, FitReport, RankingModel};
use crate::sampler::{balance_exposure, PoolSnapshot, UncertaintySampler};

/// Result of applying a label submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitOutcome {
    /// A new ledger entry was appended
    Recorded,
    /// The submission id was seen before; nothing changed
    Duplicate,
}

/// Summary of a completed round
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    /// Round number
    pub round: u64,
    /// Candidates registered from the generator
    pub registered: usize,
    /// Pairs sent for labeling
    pub requested: usize,
    /// Submissions appended to the ledger (timeouts included)
    pub recorded: usize,
    /// Submissions dropped as already processed
    pub duplicates: usize,
    /// Requests that expired and were recorded as `Unknown`
    pub timed_out: usize,
    /// Candidates removed from the active pool after the round
    pub retired: Vec<CandidateId>,
    /// Report of the round's batch refit, if one ran
    pub fit: Option<FitReport>,
    /// Warnings attached to the exported signal
    pub warnings: Vec<ConvergenceWarning>,
}

/// A preference-learning pipeline instance
///
/// Owns the ledger, the model, the sampler and the active pool. `&mut self`
/// on every mutating method is the single serialization point: one round at
/// a time, labels applied one at a time.
pub struct Pipeline {
    config: PipelineConfig,
    store: ComparisonStore,
    model: RankingModel,
    sampler: UncertaintySampler,
    pool: CandidatePool,
    state: PipelineState,
    round: u64,
    processed: BTreeSet<String>,
    warnings: Vec<ConvergenceWarning>,
    generator: Arc<dyn Generator>,
    labeler: Arc<dyn Labeler>,
    sink: Arc<dyn TrainingSink>,
}

impl Pipeline {
    /// Start building a pipeline
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Run one full round
    ///
    /// On `RoundAbandoned` the state returns to `Idle` and no label from the
    /// abandoned round has reached the ledger. Candidates registered before
    /// the failing phase stay registered.
    pub async fn run_round(&mut self) -> PipelineResult<RoundReport> {
        self.state.transition(PipelineState::AwaitingCandidates)?;
        let round = self.round;
        tracing::info!(round, pool = self.pool.len(), "starting round");

        let result = self.drive_round(round).await;
        self.round += 1;

        if result.is_err() {
            self.state = PipelineState::Idle;
        }
        if let Err(PipelineError::RoundAbandoned {
            attempts,
            last_error,
            ..
        }) = &result
        {
            tracing::warn!(
                round,
                attempts,
                code = last_error.code(),
                error = %last_error,
                "round abandoned"
            );
        }
        result
    }

    async fn drive_round(&mut self, round: u64) -> PipelineResult<RoundReport> {
        // Generation
        let candidates = self.generate(round).await?;
        let registered = candidates.len();
        for candidate in candidates {
            let id = candidate.id.clone();
            self.store.register(candidate)?;
            self.pool.insert(id.clone(), round);
            self.model.track(&id);
        }
        tracing::debug!(round, registered, "candidates registered");
        self.state.transition(PipelineState::AwaitingLabels)?;

        // Labeling
        let snapshot = PoolSnapshot::capture(&self.pool, &self.store, &self.model);
        let mut pairs = self.sampler.select(&snapshot, self.config.pairs_per_round);
        if self.config.balance_exposure {
            pairs = balance_exposure(pairs);
        }
        for (a, b) in &pairs {
            self.pool.mark_sampled(a, round);
            self.pool.mark_sampled(b, round);
        }
        let requests: Vec<LabelRequest> = pairs
            .into_iter()
            .enumerate()
            .map(|(index, pair)| LabelRequest { round, index, pair })
            .collect();
        let (submissions, timed_out) = self.collect_labels(round, &requests).await?;
        self.state.transition(PipelineState::Aggregating)?;

        // Aggregation
        let mut recorded = 0;
        let mut duplicates = 0;
        for submission in submissions {
            match self.apply_submission(submission)? {
                SubmitOutcome::Recorded => recorded += 1,
                SubmitOutcome::Duplicate => duplicates += 1,
            }
        }
        self.model.refit_incremental(&self.store);

        let fit = if self.config.batch_refit {
            self.batch_refit().await
        } else {
            None
        };
        self.warnings = fit.iter().filter_map(FitReport::warning).collect();
        self.state.transition(PipelineState::Exporting)?;

        // Export
        let signal = TrainingSignal::from_model(&self.model, round, self.warnings.clone());
        self.deliver(round, &signal).await?;
        self.state.transition(PipelineState::Idle)?;

        let retired = self.pool.prune(round, &self.config.prune);
        tracing::info!(
            round,
            registered,
            requested = requests.len(),
            recorded,
            duplicates,
            timed_out,
            retired = retired.len(),
            ledger_version = self.store.version(),
            "round complete"
        );

        Ok(RoundReport {
            round,
            registered,
            requested: requests.len(),
            recorded,
            duplicates,
            timed_out,
            retired,
            fit,
            warnings: signal.warnings,
        })
    }

    async fn generate(&self, round: u64) -> PipelineResult<Vec<Candidate>> {
        let n = self.config.candidates_per_round;
        if n == 0 {
            return Ok(Vec::new());
        }
        let limit = self.config.collaborator_timeout();
        let store = &self.store;
        let generator = &self.generator;

        retry_phase(
            round,
            "generator",
            self.config.max_attempts,
            self.config.retry_base_delay(),
            |_| async move {
                let batch = timeout(limit, generator.generate_batch(n))
                    .await
                    .map_err(|_| CollaboratorError::timeout("generator", limit))??;
                validate_batch(store, &batch, n)?;
                Ok::<_, CollaboratorError>(batch)
            },
        )
        .await
    }

    /// Dispatch every request, retrying failed ones, until all are answered
    async fn collect_labels(
        &self,
        round: u64,
        requests: &[LabelRequest],
    ) -> PipelineResult<(Vec<LabelSubmission>, usize)> {
        let limit = self.config.label_timeout();
        let mut answers: Vec<Option<LabelSubmission>> = vec![None; requests.len()];
        let mut pending: Vec<usize> = (0..requests.len()).collect();
        let mut timed_out = 0;
        let mut attempts = 0;

        while !pending.is_empty() {
            attempts += 1;
            let labeler = &self.labeler;
            let mut results: Vec<(usize, Result<LabelAnswer, CollaboratorError>)> =
                stream::iter(pending.iter().map(|&index| {
                    let request = requests[index].clone();
                    async move {
                        let result = match timeout(limit, labeler.label(request.clone())).await {
                            Ok(Ok(submission)) if submission.answers(&request) => {
                                Ok(LabelAnswer::Answered(submission))
                            }
                            Ok(Ok(submission)) => Err(CollaboratorError::protocol(
                                "labeler",
                                format!(
                                    "answered ({}, {}) to {}",
                                    submission.pair.0,
                                    submission.pair.1,
                                    request.request_id()
                                ),
                            )),
                            Ok(Err(err)) => Err(err),
                            Err(_) => Ok(LabelAnswer::Expired(LabelSubmission::timed_out(&request))),
                        };
                        (index, result)
                    }
                }))
                .buffer_unordered(self.config.label_concurrency)
                .collect()
                .await;
            results.sort_by_key(|(index, _)| *index);

            let mut failed = Vec::new();
            let mut first_error = None;
            for (index, result) in results {
                match result {
                    Ok(LabelAnswer::Answered(submission)) => answers[index] = Some(submission),
                    Ok(LabelAnswer::Expired(submission)) => {
                        tracing::debug!(round, request = index, "label request timed out");
                        timed_out += 1;
                        answers[index] = Some(submission);
                    }
                    Err(err) => {
                        failed.push(index);
                        first_error.get_or_insert(err);
                    }
                }
            }

            if let Some(err) = first_error {
                if !err.is_retryable() || attempts >= self.config.max_attempts {
                    return Err(PipelineError::RoundAbandoned {
                        round,
                        attempts,
                        last_error: err,
                    });
                }
                let delay = backoff_delay(self.config.retry_base_delay(), attempts - 1);
                tracing::warn!(
                    round,
                    phase = "labeler",
                    attempt = attempts,
                    failed = failed.len(),
                    code = err.code(),
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "label requests failed, retrying"
                );
                sleep(delay).await;
            }
            pending = failed;
        }

        Ok((answers.into_iter().flatten().collect(), timed_out))
    }

    /// Batch fit on a blocking worker, cancelled once `refit_timeout` expires
    ///
    /// A cancelled fit is reported but not installed: the incremental
    /// estimates stay in place.
    async fn batch_refit(&mut self) -> Option<FitReport> {
        let input = FitInput::from_store(&self.store);
        let fitter = BradleyTerry::new(self.model.config().clone());
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let mut handle = tokio::task::spawn_blocking(move || fitter.fit(&input, Some(&*flag)));

        let limit = self.config.refit_timeout();
        let joined = match timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "batch refit timed out, cancelling"
                );
                cancel.store(true, Ordering::Relaxed);
                handle.await
            }
        };

        match joined {
            Ok(fit) if fit.report.cancelled => Some(fit.report),
            Ok(fit) => {
                let report = fit.report.clone();
                self.model.install(fit);
                self.sampler.invalidate();
                Some(report)
            }
            Err(err) => {
                tracing::error!(error = %err, "batch refit worker failed");
                None
            }
        }
    }

    async fn deliver(&self, round: u64, signal: &TrainingSignal) -> PipelineResult<()> {
        let limit = self.config.collaborator_timeout();
        let sink = &self.sink;

        retry_phase(
            round,
            "training_sink",
            self.config.max_attempts,
            self.config.retry_base_delay(),
            |_| async move {
                timeout(limit, sink.consume(signal))
                    .await
                    .map_err(|_| CollaboratorError::timeout("training_sink", limit))?
            },
        )
        .await
    }

    fn apply_submission(&mut self, submission: LabelSubmission) -> PipelineResult<SubmitOutcome> {
        if self.processed.contains(&submission.submission_id) {
            tracing::debug!(submission = %submission.submission_id, "duplicate submission ignored");
            return Ok(SubmitOutcome::Duplicate);
        }
        let (a, b) = &submission.pair;
        self.store
            .record(a, b, submission.outcome, submission.rater_id.clone())?;
        self.processed.insert(submission.submission_id);
        Ok(SubmitOutcome::Recorded)
    }

    /// Apply a label delivered outside a round
    ///
    /// Re-delivering a submission id returns `Duplicate` and leaves the
    /// ledger unchanged.
    pub fn submit(&mut self, submission: LabelSubmission) -> PipelineResult<SubmitOutcome> {
        let outcome = self.apply_submission(submission)?;
        if outcome == SubmitOutcome::Recorded {
            self.model.refit_incremental(&self.store);
        }
        Ok(outcome)
    }

    /// Current reward signal
    pub fn export(&self) -> TrainingSignal {
        TrainingSignal::from_model(&self.model, self.round, self.warnings.clone())
    }

    /// Every informative ledger entry as a `(a, b, winner)` training triplet
    pub fn training_pairs(&self) -> Vec<TrainingPair> {
        training_pairs(&self.store)
    }

    /// Register a candidate directly, bypassing the generator
    pub fn register(&mut self, candidate: Candidate) -> PipelineResult<()> {
        let id = candidate.id.clone();
        self.store.register(candidate)?;
        self.pool.insert(id.clone(), self.round);
        self.model.track(&id);
        Ok(())
    }

    /// Drop back to `Idle` after a round future was dropped mid-flight
    pub fn reset(&mut self) {
        if self.state.is_busy() {
            tracing::warn!(state = self.state.name(), "resetting interrupted round");
        }
        self.state = PipelineState::Idle;
    }

    /// Get the configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The comparison ledger
    pub fn store(&self) -> &ComparisonStore {
        &self.store
    }

    /// The ranking model
    pub fn model(&self) -> &RankingModel {
        &self.model
    }

    /// The active pool
    pub fn pool(&self) -> &CandidatePool {
        &self.pool
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Number of the next round
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Submission ids already applied
    pub fn processed_submissions(&self) -> &BTreeSet<String> {
        &self.processed
    }

    /// Warnings attached to the most recent export
    pub fn warnings(&self) -> &[ConvergenceWarning] {
        &self.warnings
    }

    /// Capture everything needed to pick up after a restart
    #[cfg(feature = "checkpoint")]
    pub fn checkpoint(&self) -> PipelineCheckpoint {
        PipelineCheckpoint::new(self.round, &self.store, self.model.snapshot(), self.pool.clone())
            .with_processed(self.processed.clone())
            .with_warnings(self.warnings.clone())
    }

    /// Rebuild a pipeline from a checkpoint
    ///
    /// The ledger is replayed entry by entry, so a checkpoint that violates
    /// ledger integrity is rejected rather than partially loaded. Estimates
    /// resume from the stored snapshot and catch up on any entries the
    /// snapshot had not seen.
    #[cfg(feature = "checkpoint")]
    pub fn resume(builder: PipelineBuilder, checkpoint: PipelineCheckpoint) -> PipelineResult<Self> {
        let parts = checkpoint.into_parts()?;
        let mut pipeline = builder.build()?;
        pipeline.model = RankingModel::restore(pipeline.config.ranking.clone(), parts.strengths);
        pipeline.store = parts.store;
        pipeline.pool = parts.pool;
        pipeline.round = parts.round;
        pipeline.processed = parts.processed;
        pipeline.warnings = parts.warnings;
        for id in pipeline.store.all_candidates() {
            pipeline.model.track(&id);
        }
        pipeline.model.refit_incremental(&pipeline.store);

        tracing::info!(
            round = pipeline.round,
            comparisons = pipeline.store.len(),
            candidates = pipeline.store.candidate_count(),
            "pipeline resumed from checkpoint"
        );
        Ok(pipeline)
    }
}

enum LabelAnswer {
    Answered(LabelSubmission),
    Expired(LabelSubmission),
}

/// Reject batches that reuse identifiers
fn validate_batch(
    store: &ComparisonStore,
    batch: &[Candidate],
    requested: usize,
) -> Result<(), CollaboratorError> {
    if batch.len() > requested {
        return Err(CollaboratorError::protocol(
            "generator",
            format!("returned {} candidates, {} requested", batch.len(), requested),
        ));
    }
    let mut seen = HashSet::new();
    for candidate in batch {
        if store.contains(&candidate.id) || !seen.insert(&candidate.id) {
            return Err(CollaboratorError::protocol(
                "generator",
                format!("candidate {} already registered", candidate.id),
            ));
        }
    }
    Ok(())
}

/// Run `call` until it succeeds, fails permanently, or `max_attempts` is spent
async fn retry_phase<T, F, Fut>(
    round: u64,
    phase: &'static str,
    max_attempts: u32,
    base_delay: Duration,
    mut call: F,
) -> PipelineResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut attempt = 0;
    loop {
        match call(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !err.is_retryable() || attempt >= max_attempts {
                    return Err(PipelineError::RoundAbandoned {
                        round,
                        attempts: attempt,
                        last_error: err,
                    });
                }
                let delay = backoff_delay(base_delay, attempt - 1);
                tracing::warn!(
                    round,
                    phase,
                    attempt,
                    code = err.code(),
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "collaborator failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

/// `base · 2^attempt`, doubling at most five times and capped at [`MAX_RETRY_DELAY`]
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1 << attempt.min(5)).min(MAX_RETRY_DELAY)
}

/// Builder for [`Pipeline`]
pub struct PipelineBuilder {
    config: PipelineConfig,
    generator: Option<Arc<dyn Generator>>,
    labeler: Option<Arc<dyn Labeler>>,
    sink: Option<Arc<dyn TrainingSink>>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            generator: None,
            labeler: None,
            sink: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set candidates requested per round
    pub fn candidates_per_round(mut self, n: usize) -> Self {
        self.config.candidates_per_round = n;
        self
    }

    /// Set pairs labeled per round
    pub fn pairs_per_round(mut self, k: usize) -> Self {
        self.config.pairs_per_round = k;
        self
    }

    /// Set label requests in flight
    pub fn label_concurrency(mut self, n: usize) -> Self {
        self.config.label_concurrency = n;
        self
    }

    /// Set attempts per collaborator phase
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    /// Set the backoff base delay
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the per-request label timeout
    pub fn label_timeout(mut self, limit: Duration) -> Self {
        self.config.label_timeout_ms = limit.as_millis() as u64;
        self
    }

    /// Set the bound on generator and training sink calls
    pub fn collaborator_timeout(mut self, limit: Duration) -> Self {
        self.config.collaborator_timeout_ms = limit.as_millis() as u64;
        self
    }

    /// Set the bound on the per-round batch refit
    pub fn refit_timeout(mut self, limit: Duration) -> Self {
        self.config.refit_timeout_ms = limit.as_millis() as u64;
        self
    }

    /// Enable or disable the per-round batch refit
    pub fn batch_refit(mut self, enabled: bool) -> Self {
        self.config.batch_refit = enabled;
        self
    }

    /// Set the generator
    pub fn generator(mut self, generator: impl Generator + 'static) -> Self {
        self.generator = Some(Arc::new(generator));
        self
    }

    /// Set the labeler
    pub fn labeler(mut self, labeler: impl Labeler + 'static) -> Self {
        self.labeler = Some(Arc::new(labeler));
        self
    }

    /// Set the training sink
    pub fn training_sink(mut self, sink: impl TrainingSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Build the pipeline
    pub fn build(self) -> PipelineResult<Pipeline> {
        self.config.validate()?;
        let generator = self
            .generator
            .ok_or_else(|| PipelineError::Configuration("Generator required".into()))?;
        let labeler = self
            .labeler
            .ok_or_else(|| PipelineError::Configuration("Labeler required".into()))?;
        let sink = self
            .sink
            .ok_or_else(|| PipelineError::Configuration("Training sink required".into()))?;

        Ok(Pipeline {
            model: RankingModel::new(self.config.ranking.clone()),
            sampler: UncertaintySampler::new(self.config.sampler.clone()),
            config: self.config,
            store: ComparisonStore::new(),
            pool: CandidatePool::new(),
            state: PipelineState::Idle,
            round: 0,
            processed: BTreeSet::new(),
            warnings: Vec::new(),
            generator,
            labeler,
            sink,
        })
    }
}
