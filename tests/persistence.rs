//! Checkpoint and ledger-log recovery

#![cfg(feature = "checkpoint")]

use alife_rlhf::prelude::*;
use std::time::Duration;
use tempfile::tempdir;

struct NoGenerator;

#[async_trait::async_trait]
impl Generator for NoGenerator {
    async fn generate_batch(&self, _n: usize) -> Result<Vec<Candidate>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// Prefers the lexicographically larger id
struct LargerIdWins;

#[async_trait::async_trait]
impl Labeler for LargerIdWins {
    async fn label(&self, request: LabelRequest) -> Result<LabelSubmission, CollaboratorError> {
        let outcome = if request.pair.0 > request.pair.1 {
            Outcome::AWins
        } else {
            Outcome::BWins
        };
        let id = request.request_id();
        Ok(LabelSubmission::new(request.pair, outcome, "bot", id))
    }
}

struct NullSink;

#[async_trait::async_trait]
impl TrainingSink for NullSink {
    async fn consume(&self, _signal: &TrainingSignal) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

fn builder() -> PipelineBuilder {
    PipelineBuilder::new()
        .candidates_per_round(0)
        .pairs_per_round(4)
        .retry_base_delay(Duration::from_millis(1))
        .generator(NoGenerator)
        .labeler(LargerIdWins)
        .training_sink(NullSink)
}

async fn trained_pipeline() -> Pipeline {
    let mut pipeline = builder().build().unwrap();
    for id in ["p", "q", "r", "s", "t"] {
        pipeline.register(Candidate::new(id)).unwrap();
    }
    for _ in 0..3 {
        pipeline.run_round().await.unwrap();
    }
    pipeline
}

#[tokio::test]
async fn test_resume_from_json_and_binary() {
    let pipeline = trained_pipeline().await;
    let expected = pipeline.model().batch_fit(pipeline.store());
    let dir = tempdir().unwrap();

    for format in [CheckpointFormat::Json, CheckpointFormat::Binary] {
        let path = dir.path().join(format!("state-{format:?}"));
        save_checkpoint(&pipeline.checkpoint(), &path, format).unwrap();

        let restored = Pipeline::resume(builder(), load_checkpoint(&path).unwrap()).unwrap();

        assert_eq!(restored.round(), pipeline.round());
        assert_eq!(restored.store().comparisons(), pipeline.store().comparisons());
        assert_eq!(restored.store().version(), pipeline.store().version());
        assert_eq!(restored.pool(), pipeline.pool());
        assert_eq!(
            restored.processed_submissions(),
            pipeline.processed_submissions()
        );
        for (id, estimate) in pipeline.model().estimates() {
            let resumed = restored.model().estimate(id);
            assert!((estimate.mean - resumed.mean).abs() < 1e-12);
            assert_eq!(estimate.comparisons, resumed.comparisons);
        }

        let refit = restored.model().batch_fit(restored.store());
        for (id, estimate) in &expected.estimates {
            let other = &refit.estimates[id];
            assert!((estimate.mean - other.mean).abs() < 1e-12, "{id} mean drifted");
            assert!((estimate.variance - other.variance).abs() < 1e-12);
        }
    }
}

#[tokio::test]
async fn test_resumed_pipeline_keeps_deduplicating() {
    let pipeline = trained_pipeline().await;
    let replayed_id = pipeline
        .processed_submissions()
        .iter()
        .next()
        .cloned()
        .unwrap();

    let mut restored = Pipeline::resume(builder(), pipeline.checkpoint()).unwrap();
    let before = restored.store().len();

    let again = LabelSubmission::new(("p".into(), "q".into()), Outcome::AWins, "r", replayed_id);
    assert_eq!(restored.submit(again).unwrap(), SubmitOutcome::Duplicate);
    assert_eq!(restored.store().len(), before);

    let report = restored.run_round().await.unwrap();
    assert_eq!(report.round, 3);
}

#[tokio::test]
async fn test_checkpoint_manager_picks_latest_round() {
    let mut pipeline = builder().build().unwrap();
    for id in ["a", "b", "c"] {
        pipeline.register(Candidate::new(id)).unwrap();
    }
    let dir = tempdir().unwrap();
    let manager = CheckpointManager::new(dir.path(), "pipeline").keep(2).every(1);

    for _ in 0..4 {
        pipeline.run_round().await.unwrap();
        if manager.should_save(pipeline.round()) {
            manager.save(&pipeline.checkpoint()).unwrap();
        }
    }

    let latest = manager.load_latest().unwrap().unwrap();
    assert_eq!(latest.round, 4);
    assert_eq!(latest.comparisons.len(), pipeline.store().len());
}

#[tokio::test]
async fn test_ledger_log_rebuilds_the_store() {
    let pipeline = trained_pipeline().await;
    let dir = tempdir().unwrap();
    let log = LedgerLog::new(dir.path().join("ledger.jsonl"));

    log.write_store(pipeline.store()).unwrap();
    let replayed = log.replay().unwrap();

    assert_eq!(replayed.comparisons(), pipeline.store().comparisons());
    assert_eq!(replayed.all_candidates(), pipeline.store().all_candidates());

    let direct = pipeline.model().batch_fit(pipeline.store());
    let from_log = pipeline.model().batch_fit(&replayed);
    assert_eq!(direct.estimates, from_log.estimates);
}

#[test]
fn test_corrupted_binary_checkpoint_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.ckpt");
    let mut bytes = CHECKPOINT_VERSION.to_le_bytes().to_vec();
    bytes.extend_from_slice(b"ARLH");
    bytes.extend_from_slice(&[0xFF; 3]);
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(
        load_checkpoint(&path),
        Err(CheckpointError::Deserialization(_))
    ));
}
