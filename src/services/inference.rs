//! HTTP client for the inference service.
//!
//! Endpoint contract: POST a JSON body `{"text": "..."}` and receive the
//! suggestion JSON matching [`InferenceOutput`]. Auth is an optional bearer
//! token. Timeouts map to the retryable `InferenceError::Timeout`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use super::{InferenceError, InferenceOutput, InferenceService};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Inference client speaking JSON over HTTP
pub struct HttpInferenceClient {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SuggestRequest<'a> {
    text: &'a str,
}

impl HttpInferenceClient {
    pub fn new(endpoint: String, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            endpoint,
            token,
            client,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("KONTERA_INFERENCE_ENDPOINT")
            .context("KONTERA_INFERENCE_ENDPOINT environment variable required")?;
        let token = std::env::var("KONTERA_INFERENCE_TOKEN").ok();
        Ok(Self::new(endpoint, token))
    }
}

#[async_trait]
impl InferenceService for HttpInferenceClient {
    async fn suggest(&self, ocr_text: &str) -> Result<InferenceOutput, InferenceError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&SuggestRequest { text: ocr_text });

        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout
            } else {
                InferenceError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Http(format!(
                "inference service returned {status}: {body}"
            )));
        }

        let output: InferenceOutput = response
            .json()
            .await
            .map_err(|e| InferenceError::Malformed(e.to_string()))?;

        Ok(output.normalized())
    }
}
