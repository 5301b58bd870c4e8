//! End-to-end job runs against mock providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use turnwise_core::{
    Dataset, EvalConfig, ExtractionError, GoldenSet, MetricKind, PromptContextBuilder,
    RegexStateExtractor, StateExtractor, StateSnapshot, Turn,
};
use turnwise_runtime::{
    ArtifactStore, ChatProvider, ChatRequest, Completion, FsArtifactStore, InMemoryDatasetRepository,
    JobRegistry, JobState, MemoryArtifactStore, Orchestrator, ProviderError, ProviderRegistry,
    RunSettings, Scorer, TurnPipeline,
};

/// Answers every request with a fixed refund approval that quotes the
/// number of messages it saw. Each call waits for a semaphore permit.
struct GatedProvider {
    calls: AtomicUsize,
    gate: Semaphore,
}

impl GatedProvider {
    fn open() -> Arc<Self> {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    fn closed() -> Arc<Self> {
        Self::with_permits(0)
    }

    fn with_permits(permits: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(permits),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for GatedProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ProviderError::HttpError(e.to_string()))?;
        permit.forget();

        Ok(Completion {
            content: format!(
                "Refund approved for order A1 (reply to {} messages).",
                request.messages.len()
            ),
            provider_meta: serde_json::json!({"mock": true}),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct FailingProvider;

#[async_trait]
impl ChatProvider for FailingProvider {
    async fn complete(&self, _request: &ChatRequest) -> Result<Completion, ProviderError> {
        Err(ProviderError::ApiError {
            status: 500,
            message: "model crashed".to_string(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Regex extraction, except that a user turn saying "explode" fails.
struct TrippingExtractor(RegexStateExtractor);

impl StateExtractor for TrippingExtractor {
    fn extract_state(&self, domain: &str, transcript: &[Turn]) -> Result<StateSnapshot, ExtractionError> {
        if transcript.iter().any(|t| t.text.contains("explode")) {
            return Err(ExtractionError::Failed("tripped on purpose".to_string()));
        }
        self.0.extract_state(domain, transcript)
    }
}

fn dataset() -> Dataset {
    serde_json::from_value(serde_json::json!({
        "dataset_id": "demo",
        "version": "1.0.0",
        "metadata": {"domain": "commerce"},
        "conversations": [
            {
                "conversation_id": "c1",
                "turns": [
                    {"role": "user", "text": "I need a refund for order A1"},
                    {"role": "assistant", "text": "SCRIPTED REPLY"},
                    {"role": "user", "text": "Thanks, when will it arrive?"}
                ],
                "metadata": {"policy_text": "Refunds allowed within 30 days."}
            },
            {
                "conversation_id": "c2",
                "turns": [{"role": "user", "text": "Refund order A1 please"}]
            },
            {
                "conversation_id": "c3",
                "turns": [{"role": "user", "text": "Where is order A1?"}]
            }
        ]
    }))
    .unwrap()
}

fn orchestrator_with(
    provider: Arc<dyn ChatProvider>,
    extractor: Arc<dyn StateExtractor>,
    store: Arc<dyn ArtifactStore>,
    dataset: Dataset,
) -> Orchestrator {
    let mut providers = ProviderRegistry::new();
    providers.register(provider);

    let pipeline = Arc::new(TurnPipeline::new(
        extractor,
        Arc::new(PromptContextBuilder::new()),
        Arc::new(providers),
        store.clone(),
    ));

    Orchestrator::new(
        Arc::new(JobRegistry::new()),
        Arc::new(InMemoryDatasetRepository::from_iter([dataset])),
        pipeline,
        store,
        RunSettings::default(),
    )
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_full_run_persists_and_scores() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(FsArtifactStore::new(dir.path()));
    let provider = GatedProvider::open();
    let orchestrator = orchestrator_with(
        provider.clone(),
        Arc::new(RegexStateExtractor::new()),
        store.clone(),
        dataset(),
    );

    let job = orchestrator
        .submit("demo", "mock:test-model", EvalConfig::default())
        .await?;
    orchestrator.start(&job.job_id)?;
    orchestrator.start(&job.job_id)?;
    let finished = orchestrator.wait(&job.job_id).await?;

    assert_eq!(finished.state, JobState::Succeeded);
    assert_eq!(finished.progress_pct, 100);
    assert_eq!(finished.completed_conversations, 3);
    assert!(finished.error.is_none());
    assert_eq!(provider.calls(), 4);

    let run_dir = store.run_dir(&finished.run_id);
    assert!(run_dir.join("run_config.json").exists());
    assert!(run_dir.join("conversations/c1/turn_000.json").exists());
    assert!(run_dir.join("conversations/c1/turn_002.json").exists());

    let c1 = store.read_turns(&finished.run_id, "c1").await?;
    assert_eq!(c1.len(), 2);
    assert_eq!(c1[0].reply_index, 1);
    assert_eq!(c1[1].turn_index, 2);

    // The generated reply replaced the scripted one in the second call.
    let second_call: Vec<&str> = c1[1].request.messages.iter().map(|m| m.content.as_str()).collect();
    assert!(second_call.iter().any(|m| m.starts_with("Refund approved for order A1")));
    assert!(!second_call.contains(&"SCRIPTED REPLY"));
    assert!(c1[1].pre_state.decision.is_some());
    assert!(c1[0].request.messages[0].content.contains("Refunds allowed within 30 days."));

    let golden: GoldenSet = serde_json::from_value(serde_json::json!({
        "dataset_id": "demo",
        "version": "1.0.0",
        "entries": [{
            "conversation_id": "c2",
            "turns": [{"turn_index": 1, "expected": {"variants": [
                "Refund approved for order A1 (reply to 2 messages)."
            ]}}],
            "final_outcome": {"decision": "ALLOW"}
        }]
    }))?;
    let config = EvalConfig {
        metrics: vec![MetricKind::Exact, MetricKind::Consistency, MetricKind::Hallucination],
        ..Default::default()
    };
    let results = Scorer::new(store.clone())
        .score_run(&finished.run_id, &finished.model_spec, &golden, &config)
        .await?;

    let c2 = results.conversation("c2").expect("c2 scored");
    assert!(c2.summary.conversation_pass, "{:?}", c2.summary);
    assert_eq!(c2.summary.weighted_pass_rate, 1.0);
    assert!(run_dir.join("results.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_cancel_stops_at_conversation_boundary() {
    let store = Arc::new(MemoryArtifactStore::new());
    let provider = GatedProvider::closed();
    let orchestrator = orchestrator_with(
        provider.clone(),
        Arc::new(RegexStateExtractor::new()),
        store.clone(),
        dataset(),
    );

    let job = orchestrator
        .submit("demo", "mock:m", EvalConfig::default())
        .await
        .unwrap();
    orchestrator.start(&job.job_id).unwrap();

    // c1 has two user turns; the third call is c2's, in flight.
    provider.gate.add_permits(2);
    eventually(|| provider.calls() == 3).await;

    orchestrator.cancel(&job.job_id).unwrap();
    provider.gate.add_permits(10);
    let finished = orchestrator.wait(&job.job_id).await.unwrap();

    assert_eq!(finished.state, JobState::Cancelled);
    assert_eq!(finished.completed_conversations, 2);
    assert_eq!(finished.progress_pct, 66);
    assert_eq!(provider.calls(), 3);

    assert_eq!(store.read_turns(&job.run_id, "c1").await.unwrap().len(), 2);
    assert_eq!(store.read_turns(&job.run_id, "c2").await.unwrap().len(), 1);
    assert!(store.read_turns(&job.run_id, "c3").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pause_holds_and_resume_completes() {
    let store = Arc::new(MemoryArtifactStore::new());
    let provider = GatedProvider::open();
    let orchestrator = orchestrator_with(
        provider.clone(),
        Arc::new(RegexStateExtractor::new()),
        store.clone(),
        dataset(),
    );

    let job = orchestrator
        .submit("demo", "mock:m", EvalConfig::default())
        .await
        .unwrap();
    orchestrator.pause(&job.job_id).unwrap();
    orchestrator.start(&job.job_id).unwrap();

    eventually(|| orchestrator.status(&job.job_id).unwrap().state == JobState::Paused).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(provider.calls(), 0);
    assert_eq!(store.turn_count(), 0);

    orchestrator.resume(&job.job_id).unwrap();
    let finished = orchestrator.wait(&job.job_id).await.unwrap();

    assert_eq!(finished.state, JobState::Succeeded);
    assert_eq!(finished.completed_conversations, 3);
    assert_eq!(store.turn_count(), 4);
}

#[tokio::test]
async fn test_cancel_while_paused() {
    let store = Arc::new(MemoryArtifactStore::new());
    let orchestrator = orchestrator_with(
        GatedProvider::open(),
        Arc::new(RegexStateExtractor::new()),
        store.clone(),
        dataset(),
    );

    let job = orchestrator
        .submit("demo", "mock:m", EvalConfig::default())
        .await
        .unwrap();
    orchestrator.pause(&job.job_id).unwrap();
    orchestrator.start(&job.job_id).unwrap();
    eventually(|| orchestrator.status(&job.job_id).unwrap().state == JobState::Paused).await;

    orchestrator.cancel(&job.job_id).unwrap();
    let finished = orchestrator.wait(&job.job_id).await.unwrap();

    assert_eq!(finished.state, JobState::Cancelled);
    assert_eq!(finished.completed_conversations, 0);
    assert_eq!(store.turn_count(), 0);
}

#[tokio::test]
async fn test_provider_failures_are_recorded_and_job_succeeds() {
    let store = Arc::new(MemoryArtifactStore::new());
    let orchestrator = orchestrator_with(
        Arc::new(FailingProvider),
        Arc::new(RegexStateExtractor::new()),
        store.clone(),
        dataset(),
    );

    let job = orchestrator
        .submit("demo", "mock:m", EvalConfig::default())
        .await
        .unwrap();
    orchestrator.start(&job.job_id).unwrap();
    let finished = orchestrator.wait(&job.job_id).await.unwrap();

    assert_eq!(finished.state, JobState::Succeeded);
    let records = store.read_turns(&job.run_id, "c1").await.unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert!(!record.response.ok);
        assert_eq!(
            record.response.error.as_deref(),
            Some("API error: 500 - model crashed")
        );
    }
}

#[tokio::test]
async fn test_extractor_failure_fails_job_verbatim() {
    let mut data = dataset();
    data.conversations[1].turns = vec![Turn::user("please explode")];

    let store = Arc::new(MemoryArtifactStore::new());
    let orchestrator = orchestrator_with(
        GatedProvider::open(),
        Arc::new(TrippingExtractor(RegexStateExtractor::new())),
        store.clone(),
        data,
    );

    let job = orchestrator
        .submit("demo", "mock:m", EvalConfig::default())
        .await
        .unwrap();
    orchestrator.start(&job.job_id).unwrap();
    let finished = orchestrator.wait(&job.job_id).await.unwrap();

    assert_eq!(finished.state, JobState::Failed);
    assert_eq!(
        finished.error.as_deref(),
        Some("State extraction failed: Extraction failed: tripped on purpose")
    );
    assert_eq!(finished.completed_conversations, 1);
    assert_eq!(store.read_turns(&job.run_id, "c1").await.unwrap().len(), 2);
    assert!(store.read_turns(&job.run_id, "c3").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_run_id_tracks_config() {
    let orchestrator = orchestrator_with(
        GatedProvider::open(),
        Arc::new(RegexStateExtractor::new()),
        Arc::new(MemoryArtifactStore::new()),
        dataset(),
    );

    let base = EvalConfig {
        metrics: vec![MetricKind::Exact],
        ..Default::default()
    };
    let mut stricter = base.clone();
    stricter.thresholds.insert("semantic".to_string(), 0.9);

    let a = orchestrator.submit("demo", "mock:m", base.clone()).await.unwrap();
    let b = orchestrator.submit("demo", "mock:m", base).await.unwrap();
    let c = orchestrator.submit("demo", "mock:m", stricter).await.unwrap();

    assert_eq!(a.run_id, b.run_id);
    assert_ne!(a.run_id, c.run_id);
    assert_ne!(a.job_id, b.job_id);
}

#[tokio::test]
async fn test_identical_rerun_reuses_recorded_turns() {
    let store = Arc::new(MemoryArtifactStore::new());
    let provider = GatedProvider::open();
    let orchestrator = orchestrator_with(
        provider.clone(),
        Arc::new(RegexStateExtractor::new()),
        store.clone(),
        dataset(),
    );

    let first = orchestrator
        .submit("demo", "mock:m", EvalConfig::default())
        .await
        .unwrap();
    orchestrator.start(&first.job_id).unwrap();
    let first = orchestrator.wait(&first.job_id).await.unwrap();
    let before = store.read_turns(&first.run_id, "c1").await.unwrap();

    let second = orchestrator
        .submit("demo", "mock:m", EvalConfig::default())
        .await
        .unwrap();
    orchestrator.start(&second.job_id).unwrap();
    let second = orchestrator.wait(&second.job_id).await.unwrap();

    assert_eq!(first.state, JobState::Succeeded);
    assert_eq!(second.state, JobState::Succeeded, "{:?}", second.error);
    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.completed_conversations, 3);
    assert_eq!(provider.calls(), 4);
    assert_eq!(store.turn_count(), 4);
    assert_eq!(store.read_turns(&first.run_id, "c1").await.unwrap(), before);
}

#[tokio::test]
async fn test_rerun_after_cancel_finishes_remaining_turns() {
    let store = Arc::new(MemoryArtifactStore::new());
    let provider = GatedProvider::closed();
    let orchestrator = orchestrator_with(
        provider.clone(),
        Arc::new(RegexStateExtractor::new()),
        store.clone(),
        dataset(),
    );

    let job = orchestrator
        .submit("demo", "mock:m", EvalConfig::default())
        .await
        .unwrap();
    orchestrator.start(&job.job_id).unwrap();
    provider.gate.add_permits(2);
    eventually(|| provider.calls() == 3).await;
    orchestrator.cancel(&job.job_id).unwrap();
    provider.gate.add_permits(10);
    let cancelled = orchestrator.wait(&job.job_id).await.unwrap();
    assert_eq!(cancelled.state, JobState::Cancelled);

    let retry = orchestrator
        .submit("demo", "mock:m", EvalConfig::default())
        .await
        .unwrap();
    orchestrator.start(&retry.job_id).unwrap();
    let finished = orchestrator.wait(&retry.job_id).await.unwrap();

    assert_eq!(finished.state, JobState::Succeeded, "{:?}", finished.error);
    assert_eq!(provider.calls(), 4);
    assert_eq!(store.read_turns(&job.run_id, "c3").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_model_name_with_slashes_runs_on_disk() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(FsArtifactStore::new(dir.path()));
    let orchestrator = orchestrator_with(
        GatedProvider::open(),
        Arc::new(RegexStateExtractor::new()),
        store.clone(),
        dataset(),
    );

    let job = orchestrator
        .submit("demo", "mock:hf.co/org/model", EvalConfig::default())
        .await?;
    orchestrator.start(&job.job_id)?;
    let finished = orchestrator.wait(&job.job_id).await?;

    assert_eq!(finished.state, JobState::Succeeded, "{:?}", finished.error);
    assert!(finished.run_id.starts_with("demo-1.0.0-mock-hf.co-org-model-"));
    assert!(store.run_dir(&finished.run_id).join("run_config.json").exists());
    assert_eq!(store.read_turns(&finished.run_id, "c1").await?[0].model, "hf.co/org/model");
    Ok(())
}
