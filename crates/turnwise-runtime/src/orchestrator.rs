//! Job orchestrator.
//!
//! A job runs one model over every conversation of a dataset as a single
//! tokio task. Jobs move through
//!
//! ```text
//! queued ─▶ running ─▶ succeeded | failed | cancelled
//!              ▲  │
//!              │  ▼
//!             paused
//! ```
//!
//! Cancel and pause are cooperative: the task checks them between
//! conversations, so an in-flight turn always finishes and is persisted.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use turnwise_core::{
    compute_run_id, Conversation, Dataset, EvalConfig, ModelSpec, PromptContextBuilder,
    RegexStateExtractor, Role, Turn,
};

use crate::artifacts::{ArtifactStore, FsArtifactStore};
use crate::config::RuntimeConfig;
use crate::dataset::DatasetRepository;
use crate::pipeline::{TurnPipeline, TurnRequest};
use crate::providers::ProviderRegistry;
use crate::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Paused,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Paused => "paused",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub run_id: String,
    pub dataset_id: String,
    pub dataset_version: String,
    pub model_spec: String,
    pub config: EvalConfig,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_conversations: usize,
    pub completed_conversations: usize,
    pub progress_pct: u8,
    /// Message of the error that failed the job, verbatim
    pub error: Option<String>,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        JobStatus {
            state: self.state,
            progress_pct: self.progress_pct,
            total_conversations: self.total_conversations,
            completed_conversations: self.completed_conversations,
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub progress_pct: u8,
    pub total_conversations: usize,
    pub completed_conversations: usize,
    pub error: Option<String>,
}

/// `floor(completed * 100 / max(total, 1))`, capped at 100.
pub fn progress_pct(completed: usize, total: usize) -> u8 {
    let pct = completed.saturating_mul(100) / total.max(1);
    pct.min(100) as u8
}

/// Per-job control block shared by the orchestrator and the job's task.
struct JobHandle {
    job: RwLock<Job>,
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
    state: watch::Sender<JobState>,
    started: AtomicBool,
}

impl JobHandle {
    fn new(job: Job) -> Self {
        let (pause, _) = watch::channel(false);
        let (state, _) = watch::channel(job.state);
        Self {
            job: RwLock::new(job),
            cancel: CancellationToken::new(),
            pause,
            state,
            started: AtomicBool::new(false),
        }
    }

    fn snapshot(&self) -> Job {
        self.job.read().clone()
    }

    fn current_state(&self) -> JobState {
        self.job.read().state
    }

    fn update(&self, f: impl FnOnce(&mut Job)) {
        let mut job = self.job.write();
        f(&mut job);
        job.updated_at = Utc::now();
    }

    /// Move to `next` unless the job already finished. Returns whether the
    /// transition happened.
    fn transition(&self, next: JobState) -> bool {
        {
            let mut job = self.job.write();
            if job.state.is_terminal() {
                return false;
            }
            job.state = next;
            job.updated_at = Utc::now();
        }
        self.state.send_replace(next);
        true
    }

    fn finish(&self, state: JobState, error: Option<String>) -> bool {
        {
            let mut job = self.job.write();
            if job.state.is_terminal() {
                return false;
            }
            if state == JobState::Succeeded {
                job.progress_pct = 100;
            }
            job.state = state;
            job.error = error;
            job.updated_at = Utc::now();
        }
        self.state.send_replace(state);
        true
    }
}

/// Process-wide table of jobs, created by the composition root and shared
/// by reference.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<BTreeMap<String, Arc<JobHandle>>>,
    next_id: AtomicU64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self, build: impl FnOnce(String) -> Job) -> Arc<JobHandle> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let job_id = format!("job-{:04}", id);
        let handle = Arc::new(JobHandle::new(build(job_id.clone())));
        self.jobs.write().insert(job_id, handle.clone());
        handle
    }

    fn handle(&self, job_id: &str) -> Result<Arc<JobHandle>, RuntimeError> {
        self.jobs
            .read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| RuntimeError::not_found("job", job_id))
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().get(job_id).map(|h| h.snapshot())
    }

    /// All jobs, ordered by job id.
    pub fn list(&self) -> Vec<Job> {
        self.jobs.read().values().map(|h| h.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.len())
            .finish()
    }
}

/// Settings every job of an orchestrator shares.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub max_tokens: u32,
    pub default_domain: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

impl From<&RuntimeConfig> for RunSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            default_domain: config.default_domain.clone(),
        }
    }
}

enum Outcome {
    Completed,
    Cancelled,
}

#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<JobRegistry>,
    datasets: Arc<dyn DatasetRepository>,
    pipeline: Arc<TurnPipeline>,
    artifacts: Arc<dyn ArtifactStore>,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<JobRegistry>,
        datasets: Arc<dyn DatasetRepository>,
        pipeline: Arc<TurnPipeline>,
        artifacts: Arc<dyn ArtifactStore>,
        settings: RunSettings,
    ) -> Self {
        Self {
            registry,
            datasets,
            pipeline,
            artifacts,
            settings,
        }
    }

    /// Default wiring: filesystem artifacts under `runs_root`, the regex
    /// extractor, the prompt context builder and every compiled-in provider.
    pub fn from_config(
        config: &RuntimeConfig,
        datasets: Arc<dyn DatasetRepository>,
    ) -> Result<Self, RuntimeError> {
        let artifacts: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(&config.runs_root));
        let providers = Arc::new(ProviderRegistry::with_defaults(&config.providers)?);
        let pipeline = Arc::new(TurnPipeline::new(
            Arc::new(RegexStateExtractor::new()),
            Arc::new(PromptContextBuilder::new()),
            providers,
            artifacts.clone(),
        ));

        Ok(Self::new(
            Arc::new(JobRegistry::new()),
            datasets,
            pipeline,
            artifacts,
            RunSettings::from(config),
        ))
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Register a job in `queued`.
    pub async fn submit(
        &self,
        dataset_id: &str,
        model_spec: &str,
        config: EvalConfig,
    ) -> Result<Job, RuntimeError> {
        ModelSpec::parse(model_spec)?;
        let dataset = self.datasets.get_dataset(dataset_id).await?;
        let run_id = compute_run_id(&dataset.dataset_id, &dataset.version, model_spec, &config)?;

        let now = Utc::now();
        let handle = self.registry.allocate(|job_id| Job {
            job_id,
            run_id,
            dataset_id: dataset.dataset_id.clone(),
            dataset_version: dataset.version.clone(),
            model_spec: model_spec.to_string(),
            config,
            state: JobState::Queued,
            created_at: now,
            updated_at: now,
            total_conversations: dataset.conversations.len(),
            completed_conversations: 0,
            progress_pct: 0,
            error: None,
        });

        let job = handle.snapshot();
        tracing::info!(job_id = %job.job_id, run_id = %job.run_id, "Job submitted");
        Ok(job)
    }

    /// Spawn the job's task. Starting a job twice is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, job_id: &str) -> Result<(), RuntimeError> {
        let handle = self.registry.handle(job_id)?;
        if handle.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let this = self.clone();
        tokio::spawn(async move { this.execute(handle).await });
        Ok(())
    }

    /// Request cancellation. A job that was never started is cancelled
    /// immediately; a running job stops at its next conversation boundary.
    pub fn cancel(&self, job_id: &str) -> Result<(), RuntimeError> {
        let handle = self.registry.handle(job_id)?;
        if handle.current_state().is_terminal() {
            return Ok(());
        }

        if !handle.started.swap(true, Ordering::SeqCst) {
            if handle.finish(JobState::Cancelled, None) {
                tracing::info!(job_id, "Job cancelled before start");
            }
            return Ok(());
        }

        handle.cancel.cancel();
        Ok(())
    }

    pub fn pause(&self, job_id: &str) -> Result<(), RuntimeError> {
        let handle = self.registry.handle(job_id)?;
        if !handle.current_state().is_terminal() {
            handle.pause.send_replace(true);
        }
        Ok(())
    }

    pub fn resume(&self, job_id: &str) -> Result<(), RuntimeError> {
        let handle = self.registry.handle(job_id)?;
        if !handle.current_state().is_terminal() {
            handle.pause.send_replace(false);
        }
        Ok(())
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatus, RuntimeError> {
        Ok(self.registry.handle(job_id)?.snapshot().status())
    }

    pub fn job(&self, job_id: &str) -> Result<Job, RuntimeError> {
        Ok(self.registry.handle(job_id)?.snapshot())
    }

    pub fn list(&self) -> Vec<Job> {
        self.registry.list()
    }

    /// Resolve once the job reaches a terminal state.
    ///
    /// Never resolves for a job that is neither started nor cancelled.
    pub async fn wait(&self, job_id: &str) -> Result<Job, RuntimeError> {
        let handle = self.registry.handle(job_id)?;
        let mut state = handle.state.subscribe();
        state
            .wait_for(|s| s.is_terminal())
            .await
            .map_err(|_| RuntimeError::Internal("job state channel closed".to_string()))?;
        Ok(handle.snapshot())
    }

    async fn execute(self, handle: Arc<JobHandle>) {
        let (job_id, run_id) = {
            let job = handle.job.read();
            (job.job_id.clone(), job.run_id.clone())
        };

        if !handle.transition(JobState::Running) {
            return;
        }
        tracing::info!(job_id = %job_id, run_id = %run_id, "Job started");

        match self.run_job(&handle).await {
            Ok(Outcome::Completed) => {
                handle.finish(JobState::Succeeded, None);
                tracing::info!(job_id = %job_id, run_id = %run_id, "Job succeeded");
            }
            Ok(Outcome::Cancelled) => {
                handle.finish(JobState::Cancelled, None);
                tracing::info!(job_id = %job_id, run_id = %run_id, "Job cancelled");
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(job_id = %job_id, run_id = %run_id, error = %message, "Job failed");
                handle.finish(JobState::Failed, Some(message));
            }
        }
    }

    async fn run_job(&self, handle: &JobHandle) -> Result<Outcome, RuntimeError> {
        let job = handle.snapshot();
        let dataset = self.datasets.get_dataset(&job.dataset_id).await?;
        let spec = ModelSpec::parse(&job.model_spec)?;
        let domain = dataset.domain_or(&self.settings.default_domain);

        self.artifacts
            .init_run(&job.run_id, &self.run_config(&job, &dataset, domain))
            .await?;
        handle.update(|j| j.total_conversations = dataset.conversations.len());

        for conversation in &dataset.conversations {
            if !Self::checkpoint(handle).await {
                return Ok(Outcome::Cancelled);
            }

            self.run_conversation(&job.run_id, &spec, domain, conversation)
                .await?;

            handle.update(|j| {
                j.completed_conversations += 1;
                j.progress_pct = progress_pct(j.completed_conversations, j.total_conversations);
            });
        }

        Ok(Outcome::Completed)
    }

    fn run_config(&self, job: &Job, dataset: &Dataset, domain: &str) -> serde_json::Value {
        serde_json::json!({
            "run_id": job.run_id,
            "job_id": job.job_id,
            "dataset_id": dataset.dataset_id,
            "dataset_version": dataset.version,
            "model_spec": job.model_spec,
            "domain": domain,
            "max_tokens": self.settings.max_tokens,
            "metrics": job.config.metrics,
            "thresholds": job.config.thresholds,
            "context": job.config.context,
            "created_at": job.created_at,
        })
    }

    /// Conversation boundary: returns `false` if the job must stop.
    async fn checkpoint(handle: &JobHandle) -> bool {
        if handle.cancel.is_cancelled() {
            return false;
        }

        let mut pause = handle.pause.subscribe();
        if !*pause.borrow_and_update() {
            return true;
        }

        let job_id = handle.job.read().job_id.clone();
        handle.transition(JobState::Paused);
        tracing::info!(job_id = %job_id, "Job paused");

        let resumed = tokio::select! {
            _ = handle.cancel.cancelled() => false,
            changed = pause.wait_for(|paused| !*paused) => changed.is_ok(),
        };

        if !resumed || handle.cancel.is_cancelled() {
            return false;
        }
        handle.transition(JobState::Running);
        tracing::info!(job_id = %job_id, "Job resumed");
        true
    }

    /// Walk one conversation, answering every user turn. The generated
    /// reply replaces the scripted assistant turn that follows it.
    ///
    /// Turns already recorded under this run id are reused rather than
    /// re-asked, so re-running an identical job resumes where the last one
    /// stopped. A failed call leaves a blank reply in the transcript to
    /// keep positions stable; extraction skips it.
    async fn run_conversation(
        &self,
        run_id: &str,
        spec: &ModelSpec,
        domain: &str,
        conversation: &Conversation,
    ) -> Result<(), RuntimeError> {
        let mut recorded: BTreeMap<usize, String> = self
            .artifacts
            .read_turns(run_id, &conversation.conversation_id)
            .await?
            .into_iter()
            .map(|r| (r.turn_index, r.response.content))
            .collect();

        let mut transcript: Vec<Turn> =
            Vec::with_capacity(conversation.turns.len() + conversation.user_turns());
        let mut reply_pending = false;

        for turn in &conversation.turns {
            match turn.role {
                Role::Assistant if reply_pending => reply_pending = false,
                Role::Assistant => transcript.push(turn.clone()),
                Role::User => {
                    transcript.push(turn.clone());
                    let turn_index = transcript.len() - 1;

                    let reply = match recorded.remove(&turn_index) {
                        Some(content) => {
                            tracing::debug!(
                                run_id,
                                conversation_id = %conversation.conversation_id,
                                turn_index,
                                "Turn already recorded"
                            );
                            content
                        }
                        None => {
                            self.pipeline
                                .run_turn(TurnRequest {
                                    run_id,
                                    provider: &spec.provider,
                                    model: &spec.model,
                                    domain,
                                    conversation_id: &conversation.conversation_id,
                                    turn_index,
                                    turns: &transcript,
                                    meta: &conversation.metadata,
                                    max_tokens: self.settings.max_tokens,
                                })
                                .await?
                                .response
                                .content
                        }
                    };
                    transcript.push(Turn::assistant(reply));
                    reply_pending = true;
                }
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish()
    }
}
