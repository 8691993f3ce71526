//! OpenAI-compatible chat-completions connector
//!
//! Works against any server exposing `/chat/completions` (LM Studio,
//! llama.cpp, vLLM, hosted proxies). The model is asked for a small JSON
//! verdict; replies that are not JSON are kept verbatim as the response text.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ConnectorError, ConnectorResponse, ProviderConnector};
use crate::escalation::payload::ContextPayload;

const SYSTEM_PROMPT: &str = "You are a senior engineer triaging errors from a developer's workspace. \
Explain the most likely cause briefly and give concrete, ordered fixes. Answer only with the requested JSON.";

/// Connector settings, as written in the settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiCompatConfig {
    pub provider_id: String,
    /// Base URL including the API prefix, e.g. `http://localhost:1234/v1`
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the bearer token, if the server wants one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    512
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    analysis: String,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Connector for an OpenAI-compatible endpoint
pub struct OpenAiCompatConnector {
    config: OpenAiCompatConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatConnector {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, ConnectorError> {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    pub fn config(&self) -> &OpenAiCompatConfig {
        &self.config
    }
}

#[async_trait]
impl ProviderConnector for OpenAiCompatConnector {
    fn provider_id(&self) -> &str {
        &self.config.provider_id
    }

    async fn dispatch(&self, payload: &ContextPayload) -> Result<ConnectorResponse, ConnectorError> {
        let prompt = payload.render_prompt();
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ConnectorError::Malformed("no choices in completion".to_string()))?;

        debug!(provider = %self.config.provider_id, chars = content.len(), "Completion received");
        Ok(parse_verdict(&content))
    }
}

/// Interpret a model reply, accepting fenced or bare JSON and falling back to raw text
pub fn parse_verdict(content: &str) -> ConnectorResponse {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    match serde_json::from_str::<Verdict>(unfenced) {
        Ok(verdict) => ConnectorResponse {
            text: verdict.analysis,
            suggestions: verdict.suggestions,
            confidence: verdict.confidence.map(|c| c.clamp(0.0, 1.0)),
        },
        Err(_) => ConnectorResponse {
            text: trimmed.to_string(),
            suggestions: Vec::new(),
            confidence: None,
        },
    }
}

/// Check if an endpoint is reachable (`GET {base_url}/models`)
pub async fn check_endpoint(base_url: &str) -> bool {
    let models_url = format!("{}/models", base_url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
