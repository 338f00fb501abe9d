//! Reasoning-service client.
//!
//! The analyzer talks to the language model only through the [`Completer`]
//! trait so tests can substitute a scripted fake.

use async_trait::async_trait;

use crate::client::{api_key_from_env, parse_chat_response, ApiClient, ClientError, Completion};
use crate::config::AnalysisConfig;

#[async_trait]
pub trait Completer: Send + Sync {
    fn model_name(&self) -> &str;

    /// Send one system + user exchange and return the model's reply.
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, ClientError>;
}

/// Chat completions against an OpenAI-compatible endpoint.
pub struct OpenAiCompleter {
    client: ApiClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompleter {
    pub fn new(client: ApiClient, settings: &AnalysisConfig) -> Self {
        Self {
            client,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    /// Build from configuration; fails with [`ClientError::MissingApiKey`]
    /// when `OPENAI_API_KEY` is not set.
    pub fn from_config(settings: &AnalysisConfig, timeout_secs: u64) -> Result<Self, ClientError> {
        let key = api_key_from_env().ok_or(ClientError::MissingApiKey)?;
        let client = ApiClient::new("chat", &settings.api_base, Some(key), timeout_secs, 0)?;
        Ok(Self::new(client, settings))
    }
}

#[async_trait]
impl Completer for OpenAiCompleter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<Completion, ClientError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let json = self.client.post_json("/chat/completions", &body).await?;
        parse_chat_response(self.client.service(), &json)
    }
}
