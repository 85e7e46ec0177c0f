//! Transcript analysis through an OpenAI-compatible chat completion API

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ProviderError, Result};

pub const DEFAULT_PROMPT: &str = "Summarize this podcast episode in a few paragraphs, then list the main topics discussed.";

/// Chat completion service settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL, `/chat/completions` is appended
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl LlmConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(ProviderError::invalid_config(
                "LLM API URL must start with http:// or https://",
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ProviderError::invalid_config("LLM model is empty"));
        }
        Ok(())
    }
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
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: Option<String>,
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

pub struct LlmAnalyzer {
    url: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl LlmAnalyzer {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ProviderError::unexpected(format!("HTTP client: {}", e)))?;

        Ok(Self {
            url: format!("{}/chat/completions", config.api_url.trim_end_matches('/')),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            client,
        })
    }

    /// Sends `transcript` with `prompt` as system instruction
    ///
    /// Returns `{"summary", "model"}`.
    pub async fn analyze(&self, transcript: &str, prompt: Option<&str>) -> Result<Value> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt.unwrap_or(DEFAULT_PROMPT),
                },
                ChatMessage {
                    role: "user",
                    content: transcript,
                },
            ],
            stream: false,
        };

        debug!("Requesting analysis of {} chars from {}", transcript.len(), self.model);

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &self.url, &body)
                .unwrap_or_else(|| ProviderError::submission(body)));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::unexpected(format!("unparsable completion: {}", e)))?;

        let summary = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ProviderError::unexpected("completion returned no content"))?;

        info!("Analysis produced {} chars", summary.len());
        Ok(json!({
            "summary": summary,
            "model": reply.model.unwrap_or_else(|| self.model.clone()),
        }))
    }
}
