//! Chat-completion collaborator.
//!
//! Given a transcript, produce the assistant's reply. The session engine is
//! indifferent to how the reply gets generated; this default talks to an
//! OpenAI-compatible `chat/completions` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretBox};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Response parsing error: {0}")]
    ParseError(String),
}

/// Produces a reply for one transcribed utterance.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, transcript: &str) -> Result<String, ChatError>;
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: Some(1024),
            system_prompt: "You are a voice assistant. Answer briefly and \
                            conversationally; your reply will be spoken aloud."
                .to_string(),
        }
    }
}

pub struct HttpChatClient {
    client: Client,
    api_key: SecretBox<String>,
    config: ChatConfig,
}

impl HttpChatClient {
    pub fn new(api_key: SecretBox<String>) -> Self {
        Self::with_config(api_key, ChatConfig::default())
    }

    pub fn with_config(api_key: SecretBox<String>, config: ChatConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60)) // LLM calls can be slow
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            config,
        }
    }

    /// Pull the reply text out of a completions response.
    fn parse_response(response_text: &str) -> Result<String, ChatError> {
        let json: Value = serde_json::from_str(response_text)
            .map_err(|e| ChatError::ParseError(format!("Invalid JSON: {}", e)))?;

        let choices = json["choices"]
            .as_array()
            .ok_or_else(|| ChatError::ParseError("Missing 'choices' field".to_string()))?;

        let first_choice = choices
            .first()
            .ok_or_else(|| ChatError::ParseError("Empty choices array".to_string()))?;

        Ok(first_choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_string())
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn complete(&self, transcript: &str) -> Result<String, ChatError> {
        let mut payload = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": self.config.system_prompt },
                { "role": "user", "content": transcript }
            ],
            "temperature": self.config.temperature,
            "stream": false
        });
        if let Some(max_tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }

        let response = self
            .client
            .post(&self.config.url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ChatError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let response_text = response.text().await?;
        Self::parse_response(&response_text)
    }
}
