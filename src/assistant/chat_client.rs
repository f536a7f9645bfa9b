//! OpenAI-compatible chat completion client.
//!
//! Posts the whole history to `{base_url}/chat/completions` and returns the
//! first choice's content. Works against OpenAI, OpenRouter, Ollama's `/v1`
//! endpoint and anything else speaking the same protocol.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::turn::Turn;
use crate::config::LmConfig;
use crate::error::{ConfigError, RemoteCallError};

/// Key sent to local endpoints, which ignore it.
const LOCAL_API_KEY: &str = "not-required";

/// Anything that turns an ordered history into an assistant reply.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, history: &[Turn]) -> Result<String, RemoteCallError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Validate the language-model parameters before any client is built.
pub fn validate_lm_config(config: &LmConfig) -> Result<(), ConfigError> {
    if config.base_url.trim().is_empty() {
        return Err(ConfigError::MissingBaseUrl);
    }
    if config.model.trim().is_empty() {
        return Err(ConfigError::MissingModel);
    }
    if !config.is_local() && config.api_key.trim().is_empty() {
        return Err(ConfigError::MissingApiKey);
    }
    Ok(())
}

pub struct OpenAiChatClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiChatClient {
    pub fn new(config: &LmConfig) -> Result<Self, ConfigError> {
        validate_lm_config(config)?;

        let is_local = config.is_local();
        let api_key = if is_local && config.api_key.is_empty() {
            LOCAL_API_KEY.to_string()
        } else {
            config.api_key.clone()
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(ConfigError::HttpClient)?;

        info!(
            "Using {} model: {}",
            if is_local { "local" } else { "cloud" },
            config.model
        );

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiChatClient {
    async fn complete(&self, history: &[Turn]) -> Result<String, RemoteCallError> {
        debug!("Sending {} turns to model '{}'", history.len(), self.model);

        let body = ChatRequest {
            model: &self.model,
            messages: history,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RemoteCallError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: ChatResponse = resp
            .json()
            .await
            .map_err(|e| RemoteCallError::Malformed(e.to_string()))?;

        data.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RemoteCallError::Malformed("no message content in first choice".into()))
    }
}
