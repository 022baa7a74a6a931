//! OpenAI-compatible multimodal chat client.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::VisionConfig;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("network error: {0}")]
    Network(String),
    #[error("vision endpoint returned HTTP {0}: {1}")]
    Status(u16, String),
    #[error("rate limited by vision endpoint")]
    RateLimited,
    #[error("malformed model output: {0}")]
    Malformed(String),
    #[error("vision call timed out")]
    Timeout,
    #[error("vision model not configured")]
    NotConfigured,
}

/// Image in, raw model text out.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe(&self, image: &[u8], instruction: &str) -> Result<String, VisionError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Value>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

pub struct OpenAiVision {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiVision {
    pub fn new(cfg: &VisionConfig) -> Result<Self, VisionError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| VisionError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
        })
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

pub(crate) fn image_data_url(image: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(image))
}

#[async_trait]
impl VisionModel for OpenAiVision {
    async fn describe(&self, image: &[u8], instruction: &str) -> Result<String, VisionError> {
        if self.api_key.is_empty() {
            return Err(VisionError::NotConfigured);
        }

        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": instruction },
                    { "type": "image_url", "image_url": { "url": image_data_url(image) } }
                ]
            })],
            max_tokens: 500,
            temperature: 0.1,
        };

        let response = self
            .client
            .post(self.chat_completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VisionError::Timeout
                } else {
                    VisionError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(VisionError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VisionError::Status(status.as_u16(), text));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| VisionError::Malformed(e.to_string()))?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| VisionError::Malformed("no content in response".into()))
    }
}
