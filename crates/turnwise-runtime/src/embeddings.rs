//! Text embeddings for the semantic metric.
//!
//! [`CachedEmbedder`] wraps any [`Embedder`] with a moka cache keyed by
//! input text, so golden variants shared by every turn of a run are
//! embedded once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use thiserror::Error;

use crate::providers::ProviderError;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Embedding count mismatch: expected {expected}, got {got}")]
    CountMismatch { expected: usize, got: usize },
}

/// Turns texts into vectors, one per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embedding model name.
    fn model(&self) -> &str;
}

/// Embedder with an in-memory cache in front.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Cache<String, Arc<Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { inner, cache }
    }

    /// Get cache statistics.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Clear all cached vectors.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut slots: Vec<Option<Arc<Vec<f32>>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<String> = Vec::new();

        for text in texts {
            let hit = self.cache.get(text).await;
            if hit.is_none() && !misses.contains(text) {
                misses.push(text.clone());
            }
            slots.push(hit);
        }

        if !misses.is_empty() {
            let vectors = self.inner.embed(&misses).await?;
            if vectors.len() != misses.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: misses.len(),
                    got: vectors.len(),
                });
            }

            for (text, vector) in misses.iter().zip(vectors) {
                let vector = Arc::new(vector);
                self.cache.insert(text.clone(), vector.clone()).await;
                for (slot, candidate) in slots.iter_mut().zip(texts) {
                    if slot.is_none() && candidate == text {
                        *slot = Some(vector.clone());
                    }
                }
            }
        }

        let got = slots.iter().filter(|s| s.is_some()).count();
        if got != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got,
            });
        }
        Ok(slots
            .into_iter()
            .flatten()
            .map(|v| v.as_ref().clone())
            .collect())
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

#[cfg(feature = "ollama")]
pub use ollama::OllamaEmbedder;

#[cfg(feature = "ollama")]
mod ollama {
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use super::{Embedder, EmbeddingError};
    use crate::config::{EmbeddingConfig, ProviderConfig};
    use crate::providers::http::{endpoint, HttpTransport};
    use crate::providers::ProviderError;

    /// Embeddings from a local Ollama server (`/api/embed`).
    #[derive(Debug, Clone)]
    pub struct OllamaEmbedder {
        host: String,
        model: String,
        transport: HttpTransport,
    }

    impl OllamaEmbedder {
        pub fn from_config(
            providers: &ProviderConfig,
            embeddings: &EmbeddingConfig,
        ) -> Result<Self, ProviderError> {
            Ok(Self {
                host: providers.ollama_host.trim_end_matches('/').to_string(),
                model: embeddings.model.clone(),
                transport: HttpTransport::new(providers.request_timeout, providers.max_retries)?,
            })
        }
    }

    #[derive(Serialize)]
    struct EmbedRequest<'a> {
        model: &'a str,
        input: &'a [String],
    }

    #[derive(Deserialize)]
    struct EmbedResponse {
        embeddings: Vec<Vec<f32>>,
    }

    #[async_trait]
    impl Embedder for OllamaEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let url = endpoint(&self.host, "api/embed");
            let body = EmbedRequest {
                model: &self.model,
                input: texts,
            };
            let response: EmbedResponse = self
                .transport
                .send_json(|client| client.post(&url).json(&body))
                .await?;
            Ok(response.embeddings)
        }

        fn model(&self) -> &str {
            &self.model
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds a text as `[len, 1.0]` and counts texts it was asked for.
    #[derive(Default)]
    struct CountingEmbedder {
        texts_seen: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn model(&self) -> &str {
            "counting"
        }
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(vec![vec![1.0]])
        }

        fn model(&self) -> &str {
            "short"
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_only_misses_are_embedded() {
        let inner = Arc::new(CountingEmbedder::default());
        let cached = CachedEmbedder::new(inner.clone(), 100, Duration::from_secs(60));

        let first = cached.embed(&texts(&["a", "bb"])).await.unwrap();
        assert_eq!(first, vec![vec![1.0, 1.0], vec![2.0, 1.0]]);
        assert_eq!(inner.texts_seen.load(Ordering::SeqCst), 2);

        let second = cached.embed(&texts(&["bb", "ccc", "a"])).await.unwrap();
        assert_eq!(second, vec![vec![2.0, 1.0], vec![3.0, 1.0], vec![1.0, 1.0]]);
        assert_eq!(inner.texts_seen.load(Ordering::SeqCst), 3);
        assert_eq!(cached.model(), "counting");
    }

    #[tokio::test]
    async fn test_duplicate_inputs_embedded_once() {
        let inner = Arc::new(CountingEmbedder::default());
        let cached = CachedEmbedder::new(inner.clone(), 100, Duration::from_secs(60));

        let vectors = cached.embed(&texts(&["same", "same"])).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vectors[1]);
        assert_eq!(inner.texts_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_error() {
        let cached = CachedEmbedder::new(Arc::new(ShortEmbedder), 100, Duration::from_secs(60));
        let err = cached.embed(&texts(&["a", "b"])).await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::CountMismatch { expected: 2, got: 1 }
        ));
    }
}
