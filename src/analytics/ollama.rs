use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::Snapshot;
use crate::config::VisionConfig;

use super::{Analyzer, FALLBACK_DESCRIPTION};

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("inference server returned status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    MalformedResponse(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    images: Vec<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

pub struct OllamaAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    prompt: String,
}

impl OllamaAnalyzer {
    pub fn new(server: &str, config: &VisionConfig) -> Result<Self, AnalyzeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", server.trim_end_matches('/')),
            model: config.model.clone(),
            prompt: config.prompt.clone(),
        })
    }

    pub async fn try_describe(&self, snapshot: &Snapshot) -> Result<String, AnalyzeError> {
        let request = ChatRequest {
            model: &self.model,
            prompt: &self.prompt,
            stream: false,
            messages: vec![ChatMessage {
                role: "user",
                content: &self.prompt,
                images: vec![BASE64.encode(&snapshot.jpeg)],
            }],
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AnalyzeError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let parsed: ChatResponse = serde_json::from_slice(&body)?;
        Ok(parsed.message.content.trim().to_string())
    }
}

#[async_trait]
impl Analyzer for OllamaAnalyzer {
    async fn describe(&self, snapshot: &Snapshot) -> String {
        match self.try_describe(snapshot).await {
            Ok(description) => {
                tracing::info!(camera = %snapshot.camera, description = %description, "snapshot analyzed");
                description
            }
            Err(e) => {
                tracing::warn!(camera = %snapshot.camera, error = %e, "vision analysis failed");
                FALLBACK_DESCRIPTION.to_string()
            }
        }
    }
}
