//! Run artifacts: run config, turn records, scored results.
//!
//! On disk a run looks like:
//!
//! ```text
//! <runs_root>/<run_id>/
//!   run_config.json
//!   results.json
//!   conversations/<conversation_id>/turn_000.json
//! ```
//!
//! Turn records are write-once: writing an existing key fails with
//! [`ArtifactError::AlreadyExists`] and leaves the stored record untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use turnwise_core::{ConversationVerdict, TurnScore};

use crate::pipeline::TurnRecord;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Artifact already exists: {0}")]
    AlreadyExists(String),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),
}

/// Scored run, as written to `results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    pub run_id: String,
    pub dataset_id: String,
    pub model_spec: String,
    pub conversations: Vec<ConversationResult>,
}

impl RunResults {
    pub fn conversation(&self, conversation_id: &str) -> Option<&ConversationResult> {
        self.conversations
            .iter()
            .find(|c| c.conversation_id == conversation_id)
    }

    /// Fraction of conversations that passed, 0.0 for an empty run.
    pub fn pass_rate(&self) -> f64 {
        if self.conversations.is_empty() {
            return 0.0;
        }
        let passed = self
            .conversations
            .iter()
            .filter(|c| c.summary.conversation_pass)
            .count();
        passed as f64 / self.conversations.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationResult {
    pub conversation_id: String,
    pub summary: ConversationVerdict,
    pub turns: Vec<TurnScore>,
}

/// Persistence for everything a run produces.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create the run location and record its configuration.
    async fn init_run(&self, run_id: &str, config: &JsonValue) -> Result<(), ArtifactError>;

    /// Persist a turn record. Fails with `AlreadyExists` if the key is taken.
    async fn write_turn(&self, record: &TurnRecord) -> Result<(), ArtifactError>;

    /// Turn records of one conversation, ordered by turn index.
    /// An unknown conversation has no records.
    async fn read_turns(
        &self,
        run_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<TurnRecord>, ArtifactError>;

    async fn write_results(&self, run_id: &str, results: &RunResults) -> Result<(), ArtifactError>;

    async fn read_results(&self, run_id: &str) -> Result<RunResults, ArtifactError>;
}

/// Reject ids that would escape their directory.
fn check_key(kind: &str, value: &str) -> Result<(), ArtifactError> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.contains('\0');
    if bad {
        return Err(ArtifactError::InvalidKey(format!("{} '{}'", kind, value)));
    }
    Ok(())
}

fn turn_key(run_id: &str, conversation_id: &str, turn_index: usize) -> String {
    format!("{}/{}/{}", run_id, conversation_id, turn_index)
}

/// Filesystem store rooted at `runs_root`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    fn conversation_dir(&self, run_id: &str, conversation_id: &str) -> PathBuf {
        self.run_dir(run_id)
            .join("conversations")
            .join(conversation_id)
    }

    pub fn turn_path(&self, run_id: &str, conversation_id: &str, turn_index: usize) -> PathBuf {
        self.conversation_dir(run_id, conversation_id)
            .join(format!("turn_{:03}.json", turn_index))
    }

    async fn create_dir(path: &Path) -> Result<(), ArtifactError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|source| ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
        tokio::fs::write(path, bytes)
            .await
            .map_err(|source| ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn read_file(path: &Path) -> Result<Vec<u8>, ArtifactError> {
        tokio::fs::read(path).await.map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn init_run(&self, run_id: &str, config: &JsonValue) -> Result<(), ArtifactError> {
        check_key("run_id", run_id)?;
        let run_dir = self.run_dir(run_id);
        Self::create_dir(&run_dir.join("conversations")).await?;
        let bytes = serde_json::to_vec_pretty(config)?;
        Self::write_file(&run_dir.join("run_config.json"), &bytes).await
    }

    async fn write_turn(&self, record: &TurnRecord) -> Result<(), ArtifactError> {
        check_key("run_id", &record.run_id)?;
        check_key("conversation_id", &record.conversation_id)?;

        let dir = self.conversation_dir(&record.run_id, &record.conversation_id);
        Self::create_dir(&dir).await?;

        let path = self.turn_path(&record.run_id, &record.conversation_id, record.turn_index);
        let bytes = serde_json::to_vec_pretty(record)?;

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ArtifactError::AlreadyExists(turn_key(
                    &record.run_id,
                    &record.conversation_id,
                    record.turn_index,
                )));
            }
            Err(source) => return Err(ArtifactError::Io { path, source }),
        };

        let io_err = |source| ArtifactError::Io {
            path: path.clone(),
            source,
        };
        file.write_all(&bytes).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        Ok(())
    }

    async fn read_turns(
        &self,
        run_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<TurnRecord>, ArtifactError> {
        check_key("run_id", run_id)?;
        check_key("conversation_id", conversation_id)?;

        let dir = self.conversation_dir(run_id, conversation_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(ArtifactError::Io { path: dir, source }),
        };

        let mut records = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|source| ArtifactError::Io {
                path: dir.clone(),
                source,
            })?;
            let Some(entry) = entry else { break };

            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with("turn_") && name.ends_with(".json")) {
                continue;
            }
            let bytes = Self::read_file(&entry.path()).await?;
            records.push(serde_json::from_slice::<TurnRecord>(&bytes)?);
        }

        records.sort_by_key(|r| r.turn_index);
        Ok(records)
    }

    async fn write_results(&self, run_id: &str, results: &RunResults) -> Result<(), ArtifactError> {
        check_key("run_id", run_id)?;
        let run_dir = self.run_dir(run_id);
        Self::create_dir(&run_dir).await?;
        let bytes = serde_json::to_vec_pretty(results)?;
        Self::write_file(&run_dir.join("results.json"), &bytes).await
    }

    async fn read_results(&self, run_id: &str) -> Result<RunResults, ArtifactError> {
        check_key("run_id", run_id)?;
        let path = self.run_dir(run_id).join("results.json");
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(format!("results for run {}", run_id)))
            }
            Err(source) => Err(ArtifactError::Io { path, source }),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    configs: BTreeMap<String, JsonValue>,
    turns: BTreeMap<(String, String, usize), TurnRecord>,
    results: BTreeMap<String, RunResults>,
}

/// In-process store, for tests and embedding the engine without a disk.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_config(&self, run_id: &str) -> Option<JsonValue> {
        self.inner.read().configs.get(run_id).cloned()
    }

    /// Number of turn records across all runs.
    pub fn turn_count(&self) -> usize {
        self.inner.read().turns.len()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn init_run(&self, run_id: &str, config: &JsonValue) -> Result<(), ArtifactError> {
        check_key("run_id", run_id)?;
        self.inner
            .write()
            .configs
            .insert(run_id.to_string(), config.clone());
        Ok(())
    }

    async fn write_turn(&self, record: &TurnRecord) -> Result<(), ArtifactError> {
        check_key("run_id", &record.run_id)?;
        check_key("conversation_id", &record.conversation_id)?;

        let key = (
            record.run_id.clone(),
            record.conversation_id.clone(),
            record.turn_index,
        );
        let mut inner = self.inner.write();
        if inner.turns.contains_key(&key) {
            return Err(ArtifactError::AlreadyExists(turn_key(
                &record.run_id,
                &record.conversation_id,
                record.turn_index,
            )));
        }
        inner.turns.insert(key, record.clone());
        Ok(())
    }

    async fn read_turns(
        &self,
        run_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<TurnRecord>, ArtifactError> {
        let inner = self.inner.read();
        Ok(inner
            .turns
            .iter()
            .filter(|((run, conv, _), _)| run == run_id && conv == conversation_id)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn write_results(&self, run_id: &str, results: &RunResults) -> Result<(), ArtifactError> {
        check_key("run_id", run_id)?;
        self.inner
            .write()
            .results
            .insert(run_id.to_string(), results.clone());
        Ok(())
    }

    async fn read_results(&self, run_id: &str) -> Result<RunResults, ArtifactError> {
        self.inner
            .read()
            .results
            .get(run_id)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(format!("results for run {}", run_id)))
    }
}
