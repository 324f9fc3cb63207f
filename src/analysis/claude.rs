//! Claude Analysis Strategy
//!
//! Sends category prompts to the Anthropic Messages API. The moderation
//! instructions are a static system block marked for prompt caching, so the
//! per-cycle cost is mostly the chat log itself.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::AnalysisStrategy;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";

const SYSTEM_PROMPT: &str = "You are a live-stream chat moderation analyst. \
Read the chat log you are given and answer ONLY with the JSON described in the \
request. Never add commentary. Judge messages in context; banter between \
regulars is not toxicity.";

/// System message block with optional cache control
#[derive(Debug, Serialize)]
struct SystemBlock {
    r#type: &'static str,
    text: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    r#type: &'static str,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    system: Vec<SystemBlock>,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    r#type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
    #[serde(default)]
    cache_read_input_tokens: usize,
}

/// Hosted model strategy
#[derive(Clone)]
pub struct ClaudeStrategy {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: usize,
}

impl ClaudeStrategy {
    pub fn new(api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1024,
        })
    }

    /// Override the model id
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

#[async_trait]
impl AnalysisStrategy for ClaudeStrategy {
    fn name(&self) -> &str {
        "claude"
    }

    async fn analyze(&self, prompt: &str) -> Result<String> {
        let request = MessageRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: vec![SystemBlock {
                r#type: "text",
                text: SYSTEM_PROMPT,
                cache_control: Some(CacheControl { r#type: "ephemeral" }),
            }],
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!("Calling Claude API: model={}, prompt_len={}", self.model, prompt.len());

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Claude API request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Claude API error {}: {}", status, text);
        }

        let result: MessageResponse = response
            .json()
            .await
            .context("Malformed Claude API response")?;

        debug!(
            "Claude analysis: in={}, out={}, cache_read={}",
            result.usage.input_tokens,
            result.usage.output_tokens,
            result.usage.cache_read_input_tokens
        );

        Ok(result
            .content
            .into_iter()
            .filter_map(|b| if b.r#type == "text" { b.text } else { None })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
