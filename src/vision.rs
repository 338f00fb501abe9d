//! Image-understanding service used to describe diagrams and tables in
//! standard documents.

use async_trait::async_trait;
use base64::Engine as _;

use crate::client::{api_key_from_env, parse_chat_response, ApiClient, ClientError, Completion};
use crate::config::Config;

pub const VISION_SYSTEM_PROMPT: &str = "You are an expert for technical documentation and \
DIN standards. Analyse the image and extract all technical information relevant for \
checking construction plans. Focus on technical diagrams and drawings, tables with \
limits and specifications, dimensions and tolerances, symbols and legends, and \
construction details.";

const VISION_MAX_TOKENS: u32 = 800;

/// Prompt for one rendered page of a standard document.
pub fn page_prompt(page: u32, filename: &str) -> String {
    format!(
        "Analyse page {} of the DIN standard '{}'. Extract all technical information \
         relevant for checking construction plans. Describe diagrams, tables, dimensions \
         and technical details.",
        page, filename
    )
}

#[async_trait]
pub trait ImageDescriber: Send + Sync {
    async fn describe(&self, jpeg: &[u8], prompt: &str) -> Result<Completion, ClientError>;
}

/// Vision chat completions with inline base64 JPEG.
pub struct OpenAiVision {
    client: ApiClient,
    model: String,
}

impl OpenAiVision {
    pub fn new(client: ApiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        let key = api_key_from_env().ok_or(ClientError::MissingApiKey)?;
        let client = ApiClient::new(
            "vision",
            &config.analysis.api_base,
            Some(key),
            config.embedding.timeout_secs,
            0,
        )?;
        Ok(Self::new(client, config.extraction.vision_model.clone()))
    }
}

#[async_trait]
impl ImageDescriber for OpenAiVision {
    async fn describe(&self, jpeg: &[u8], prompt: &str) -> Result<Completion, ClientError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(jpeg);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": VISION_SYSTEM_PROMPT},
                {"role": "user", "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {
                        "url": format!("data:image/jpeg;base64,{}", encoded),
                        "detail": "high"
                    }}
                ]}
            ],
            "max_tokens": VISION_MAX_TOKENS,
            "temperature": 0.2,
        });
        let json = self.client.post_json("/chat/completions", &body).await?;
        parse_chat_response(self.client.service(), &json)
    }
}
