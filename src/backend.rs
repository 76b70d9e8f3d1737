//! HTTP client shared by the OpenAI-compatible model backends

use crate::error::{Error, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::trace;
use url::Url;

pub struct BackendClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    service: &'static str,
}

impl BackendClient {
    pub fn new(
        service: &'static str,
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid {} URL '{}': {}", service, base_url, e)))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
            service,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid {} URL: {}", self.service, e)))
    }

    /// POST `body` as JSON and decode the JSON reply
    ///
    /// Transport failures and non-success statuses come back as capability
    /// errors so callers can decide whether to retry.
    pub async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        trace!(service = self.service, %url, "POST");

        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(self.service, status, &body));
        }

        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_str(&text).map_err(|e| {
            Error::InvalidInput(format!(
                "{} returned an unexpected response: {}",
                self.service, e
            ))
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout(format!("{} request timed out", self.service))
        } else {
            Error::Network(format!("{} request failed: {}", self.service, err))
        }
    }
}
