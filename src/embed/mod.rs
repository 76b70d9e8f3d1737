//! Embedding generation
//!
//! This module provides an abstraction over embedding models with:
//! - A trait for different embedding backends
//! - An OpenAI-compatible HTTP backend
//! - A deterministic local hashing backend

mod hashing;
mod http_backend;

pub use hashing::*;
pub use http_backend::*;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::rate_limit::RateLimiter;
use crate::retry::{retry_with_backoff, Backoff};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Scale a vector to unit length
pub fn normalize_embedding(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

/// Trait for embedding providers
///
/// Errors: `RateLimited` and `Network` are retryable, `InvalidInput` is not.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; one vector per input, in order
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Model identifier stored with every vector
    fn model_name(&self) -> &str;
}

/// Call policy applied around every embedding request
#[derive(Clone)]
pub struct EmbedPolicy {
    pub backoff: Backoff,
    pub retries: u32,
    pub timeout: Duration,
    pub limiter: RateLimiter,
}

/// Embed `texts` under the limiter, a per-call timeout and retry with backoff
pub async fn embed_with_retry(
    embedder: &dyn Embedder,
    policy: &EmbedPolicy,
    texts: Vec<String>,
) -> Result<Vec<Vec<f32>>> {
    retry_with_backoff("embed", policy.backoff, policy.retries, || {
        let texts = texts.clone();
        async move {
            policy.limiter.wait().await;
            tokio::time::timeout(policy.timeout, embedder.embed(texts))
                .await
                .map_err(|_| {
                    Error::Timeout(format!(
                        "embedding call exceeded {}s",
                        policy.timeout.as_secs()
                    ))
                })?
        }
    })
    .await
}

/// Embedder whose every call goes through [`embed_with_retry`]
///
/// Used for query-time embeddings by search and the tutor.
pub struct ResilientEmbedder {
    inner: Arc<dyn Embedder>,
    policy: EmbedPolicy,
}

impl ResilientEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, policy: EmbedPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Embedder for ResilientEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        embed_with_retry(self.inner.as_ref(), &self.policy, texts).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(
            config.model.clone(),
            config.dimension,
        ))),
        "http" => Ok(Arc::new(HttpEmbedder::new(config)?)),
        other => Err(Error::Config(format!(
            "Unsupported embedding backend '{}'",
            other
        ))),
    }
}

/// Check a backend reply has one vector of the right size per input
pub fn validate_embeddings(
    model: &str,
    expected_count: usize,
    dimension: usize,
    embeddings: &[Vec<f32>],
) -> Result<()> {
    if embeddings.len() != expected_count {
        return Err(Error::InvalidInput(format!(
            "Model '{}' returned {} embeddings for {} inputs",
            model,
            embeddings.len(),
            expected_count
        )));
    }
    if let Some(mismatch) = embeddings.iter().find(|vec| vec.len() != dimension) {
        return Err(Error::InvalidInput(format!(
            "Embedding dimension mismatch for model '{}': expected {}, got {}",
            model,
            dimension,
            mismatch.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::jobs::fakes::FlakyEmbedder;
    use std::sync::atomic::Ordering;

    fn policy(retries: u32, timeout: Duration) -> EmbedPolicy {
        EmbedPolicy {
            backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(5)),
            retries,
            timeout,
            limiter: RateLimiter::new(1000),
        }
    }

    struct StalledEmbedder;

    #[async_trait]
    impl Embedder for StalledEmbedder {
        async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "stalled"
        }
    }

    #[test]
    fn test_normalize() {
        let v = normalize_embedding(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalize_embedding(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_validate_embeddings() {
        assert!(validate_embeddings("m", 2, 3, &[vec![0.0; 3], vec![0.0; 3]]).is_ok());
        assert!(validate_embeddings("m", 2, 3, &[vec![0.0; 3]]).is_err());
        assert!(validate_embeddings("m", 1, 3, &[vec![0.0; 4]]).is_err());
    }

    #[test]
    fn test_create_embedder_by_backend() {
        let mut config = EmbeddingConfig::default();
        config.backend = "hashing".to_string();
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(), config.dimension);

        config.backend = "onnx".to_string();
        assert!(create_embedder(&config).is_err());
    }

    #[tokio::test]
    async fn test_resilient_embedder_retries_transient_errors() {
        let inner = Arc::new(FlakyEmbedder::new(1));
        let embedder = ResilientEmbedder::new(inner.clone(), policy(2, Duration::from_secs(5)));
        let vectors = embedder.embed(vec!["parse config".to_string()]).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(embedder.model_name(), inner.model_name());

        let bare = ResilientEmbedder::new(Arc::new(FlakyEmbedder::new(1)), policy(0, Duration::from_secs(5)));
        let err = bare.embed(vec!["parse config".to_string()]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientInfra);
    }

    #[tokio::test]
    async fn test_stalled_call_times_out() {
        let embedder = ResilientEmbedder::new(Arc::new(StalledEmbedder), policy(1, Duration::from_millis(20)));
        let err = embedder.embed(vec!["q".to_string()]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
