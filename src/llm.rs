use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ModelConfig;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model call timed out")]
    Timeout,

    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("malformed model response: {0}")]
    Malformed(String),
}

/// One piece of the user message. Images are passed as URLs, which for
/// uploaded photos means a base64 data URL built by the handler.
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    ImageUrl(String),
}

/// Completion seam for the meal-analysis model. The orchestrator wraps every
/// call in its own tokio deadline and never trusts the client's timeouts.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, system: &str, user: &[ContentPart]) -> Result<String, ModelError>;
}

// --- OpenAI-compatible wire types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(cfg: &ModelConfig) -> anyhow::Result<Self> {
        // Generous client-side timeout; the caller enforces the real deadline.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(cfg.image_timeout_secs.max(cfg.text_timeout_secs) + 30))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
        })
    }

    fn user_content(parts: &[ContentPart]) -> serde_json::Value {
        let items: Vec<serde_json::Value> = parts
            .iter()
            .map(|p| match p {
                ContentPart::Text(t) => serde_json::json!({ "type": "text", "text": t }),
                ContentPart::ImageUrl(u) => {
                    serde_json::json!({ "type": "image_url", "image_url": { "url": u } })
                }
            })
            .collect();
        serde_json::Value::Array(items)
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(&self, system: &str, user: &[ContentPart]) -> Result<String, ModelError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: serde_json::Value::String(system.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: Self::user_content(user),
                },
            ],
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Unavailable(format!("{status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::Malformed("empty choices".into()))?;

        debug!(chars = content.len(), "model completion received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_content_shapes_text_and_image_parts() {
        let parts = vec![
            ContentPart::Text("a meal".into()),
            ContentPart::ImageUrl("data:image/jpeg;base64,AAAA".into()),
        ];
        let v = OpenAiClient::user_content(&parts);
        assert_eq!(v[0]["type"], "text");
        assert_eq!(v[0]["text"], "a meal");
        assert_eq!(v[1]["type"], "image_url");
        assert_eq!(v[1]["image_url"]["url"], "data:image/jpeg;base64,AAAA");
    }
}
