//! Embedding providers.
//!
//! Concrete implementations of [`normcheck_core::embedding::Embedder`]:
//! - **[`OpenAiEmbedder`]** calls `POST {base}/embeddings`.
//! - **[`OllamaEmbedder`]** calls a local Ollama instance's `/api/embed` endpoint.
//!
//! # Provider Selection
//!
//! [`create_embedder`] returns `None` when the provider is `"disabled"` or
//! cannot be constructed (e.g. no API key). The caller then falls back to
//! keyword retrieval.
//!
//! ```rust
//! # use normcheck::config::Config;
//! # use normcheck::embedding::create_embedder;
//! let config = Config::default(); // provider = "disabled"
//! assert!(create_embedder(&config).is_none());
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use normcheck_core::embedding::Embedder;

use crate::client::{api_key_from_env, ApiClient, ClientError};
use crate::config::Config;

pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Embedding provider using the OpenAI API.
pub struct OpenAiEmbedder {
    client: ApiClient,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(client: ApiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self.client.post_json("/embeddings", &body).await?;
        let vectors = parse_openai_response(&json)?;
        check_count(self.client.service(), texts.len(), vectors.len())?;
        Ok(vectors)
    }
}

/// Extracts `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>, ClientError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("openai embeddings", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| invalid("openai embeddings", "missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, to_f32("openai embeddings", embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Embedding provider using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled (e.g.
/// `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    client: ApiClient,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(client: ApiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self.client.post_json("/api/embed", &body).await?;
        let vectors = parse_ollama_response(&json)?;
        check_count(self.client.service(), texts.len(), vectors.len())?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>, ClientError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| invalid("ollama", "missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .ok_or_else(|| invalid("ollama", "embedding is not an array"))
                .and_then(|values| to_f32("ollama", values))
        })
        .collect()
}

fn to_f32(service: &'static str, values: &[Value]) -> Result<Vec<f32>, ClientError> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|x| x as f32)
                .ok_or_else(|| invalid(service, &format!("non-numeric embedding value: {}", v)))
        })
        .collect()
}

fn check_count(service: &'static str, expected: usize, actual: usize) -> Result<(), ClientError> {
    if expected != actual {
        return Err(ClientError::InvalidResponse {
            service,
            detail: format!("expected {} embeddings, got {}", expected, actual),
        });
    }
    Ok(())
}

fn invalid(service: &'static str, detail: &str) -> ClientError {
    ClientError::InvalidResponse {
        service,
        detail: detail.to_string(),
    }
}

/// Build the configured embedder, or `None` for keyword-only operation.
///
/// | `embedding.provider` | Result |
/// |----------------------|--------|
/// | `"disabled"` | `None` |
/// | `"openai"` | [`OpenAiEmbedder`] (needs `OPENAI_API_KEY`) |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &Config) -> Option<Arc<dyn Embedder>> {
    let settings = &config.embedding;
    let built: Result<Arc<dyn Embedder>, ClientError> = match settings.provider.as_str() {
        "openai" => api_key_from_env()
            .ok_or(ClientError::MissingApiKey)
            .and_then(|key| {
                let base = settings
                    .url
                    .as_deref()
                    .unwrap_or(&config.analysis.api_base);
                ApiClient::new(
                    "openai embeddings",
                    base,
                    Some(key),
                    settings.timeout_secs,
                    settings.max_retries,
                )
            })
            .map(|client| {
                let model = settings.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);
                Arc::new(OpenAiEmbedder::new(client, model)) as Arc<dyn Embedder>
            }),
        "ollama" => ApiClient::new(
            "ollama",
            settings.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL),
            None,
            settings.timeout_secs,
            settings.max_retries,
        )
        .map(|client| {
            let model = settings.model.as_deref().unwrap_or(DEFAULT_OLLAMA_MODEL);
            Arc::new(OllamaEmbedder::new(client, model)) as Arc<dyn Embedder>
        }),
        _ => return None,
    };

    match built {
        Ok(embedder) => {
            tracing::info!(
                provider = %settings.provider,
                model = embedder.model_name(),
                "embedding provider ready"
            );
            Some(embedder)
        }
        Err(e) => {
            tracing::warn!(
                provider = %settings.provider,
                error = %e,
                "embedding provider unavailable, using keyword retrieval"
            );
            None
        }
    }
}
