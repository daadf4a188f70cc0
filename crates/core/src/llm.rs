use crate::{ChatMessage, GenerationError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// One complete answer for the conversation in `messages`.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaChatMessage>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatMessage {
    #[serde(default)]
    content: String,
}

/// Chat completion against an Ollama server (`POST /api/chat`).
pub struct OllamaChat {
    client: Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl OllamaChat {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.endpoint)
    }

    fn classify(&self, error: reqwest::Error) -> GenerationError {
        if error.is_timeout() {
            GenerationError::Timeout {
                endpoint: self.chat_url(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else if error.is_connect() {
            GenerationError::Unreachable {
                endpoint: self.chat_url(),
                details: error.to_string(),
            }
        } else {
            GenerationError::Http(error)
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(self.chat_url())
            .json(&OllamaChatRequest {
                model: &self.model,
                messages,
                stream: false,
            })
            .send()
            .await
            .map_err(|error| self.classify(error))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::BackendResponse {
                backend: "ollama".to_string(),
                details: format!("{status}: {}", body.trim()),
            });
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|error| self.classify(error))?;

        extract_answer(parsed)
    }
}

fn extract_answer(parsed: OllamaChatResponse) -> Result<String, GenerationError> {
    let answer = parsed
        .message
        .map(|message| message.content.trim().to_string())
        .unwrap_or_default();

    if answer.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(answer)
}
