use super::LanguageModel;
use crate::backend::BackendClient;
use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Language model backed by an OpenAI-compatible `/v1/chat/completions` endpoint
pub struct HttpLlm {
    client: BackendClient,
    limiter: RateLimiter,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl HttpLlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = BackendClient::new(
            "language model",
            &config.url,
            config.api_key(),
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self {
            client,
            limiter: RateLimiter::new(config.requests_per_second),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl LanguageModel for HttpLlm {
    async fn complete(&self, context: &str, instructions: &str) -> Result<String> {
        self.limiter.wait().await;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: instructions,
                },
                ChatMessage {
                    role: "user",
                    content: context,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response: ChatResponse = self
            .client
            .post_json("/v1/chat/completions", &request)
            .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidInput("language model returned no choices".into()))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(Error::ContentPolicy(
                "language model withheld the completion".to_string(),
            ));
        }

        let content = choice.message.content.unwrap_or_default();
        debug!(model = %self.model, chars = content.len(), "Completion received");
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
