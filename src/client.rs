//! Shared HTTP client for OpenAI-compatible and Ollama APIs.
//!
//! Every outbound JSON call (embeddings, chat completions, vision) goes
//! through [`ApiClient::post_json`], which applies the retry strategy used
//! across the crate:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! `max_retries` defaults to 0 in the configuration: failures are terminal
//! for the current request unless an operator opts into retries.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("OPENAI_API_KEY environment variable not set")]
    MissingApiKey,
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} API error {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("invalid {service} response: {detail}")]
    InvalidResponse {
        service: &'static str,
        detail: String,
    },
}

/// Reads `OPENAI_API_KEY`, treating an empty value as unset.
pub fn api_key_from_env() -> Option<String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty())
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    service: &'static str,
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl ApiClient {
    pub fn new(
        service: &'static str,
        base_url: &str,
        api_key: Option<String>,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|source| ClientError::Transport { service, source })?;
        Ok(Self {
            service,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries,
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// POST `body` to `{base_url}{path}` and return the decoded JSON reply.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(service = self.service, attempt, ?delay, "retrying request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .http
                .post(&url)
                .header("Content-Type", "application/json")
                .json(body);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|e| {
                            ClientError::InvalidResponse {
                                service: self.service,
                                detail: e.to_string(),
                            }
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = ClientError::Status {
                        service: self.service,
                        status: status.as_u16(),
                        body: body_text,
                    };

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(source) => {
                    last_err = Some(ClientError::Transport {
                        service: self.service,
                        source,
                    });
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ClientError::InvalidResponse {
            service: self.service,
            detail: "request failed after retries".to_string(),
        }))
    }
}

/// Text reply and reported token usage of a chat completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub total_tokens: Option<u64>,
}

/// Extract `choices[0].message.content` and `usage.total_tokens`.
pub fn parse_chat_response(service: &'static str, json: &Value) -> Result<Completion, ClientError> {
    let text = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| ClientError::InvalidResponse {
            service,
            detail: "missing choices[0].message.content".to_string(),
        })?;
    let total_tokens = json
        .get("usage")
        .and_then(|u| u.get("total_tokens"))
        .and_then(|t| t.as_u64());
    Ok(Completion {
        text: text.to_string(),
        total_tokens,
    })
}
