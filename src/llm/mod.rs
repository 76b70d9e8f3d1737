//! Language model capability
//!
//! The documentation generator and the tutor only ever see this trait.
//! Output is treated as untrusted text by both.

mod http_backend;

pub use http_backend::*;

use crate::error::Result;
use crate::retry::{retry_with_backoff, Backoff};
use async_trait::async_trait;

/// Text completion over a grounding context
///
/// Errors: `RateLimited` and `Network` are retryable, `ContentPolicy` is not.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `context` following `instructions`
    async fn complete(&self, context: &str, instructions: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// `complete` retried with backoff on rate limits, network errors and timeouts
pub async fn complete_with_retry(
    llm: &dyn LanguageModel,
    backoff: Backoff,
    retries: u32,
    context: &str,
    instructions: &str,
) -> Result<String> {
    retry_with_backoff("complete", backoff, retries, || llm.complete(context, instructions)).await
}
