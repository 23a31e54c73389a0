//! OpenAI-compatible risk advisor.
//!
//! Calls `POST {base_url}/chat/completions` with a system prompt that pins
//! the reply to the decision JSON shape, then parses and sanitizes the
//! first object found in the reply.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::application::ports::{AdvisorError, AdvisorMode, AdvisorStatus, DecisionAdvisorPort};
use crate::domain::decision::{EventInput, RiskDecision, parse_decision};
use crate::infrastructure::config::RiskAgentConfig;

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You are RiskAgent. You MUST output ONLY valid JSON.
Rules:
- Only risk control assessment. No buy/sell points. No profit prediction.
- If evidence is insufficient or unclear, downgrade severity to low and risk_level to 1-2.
- why[] and action_hint[] must each have 1-3 concise items.
- one_liner is a single short sentence.
- confidence is 0.0-1.0.
- severity must be low|med|high.";

const PING_PROMPT: &str = "Return ONLY valid JSON: {\"ok\":true}. No other text.";

const MAX_ERROR_CHARS: usize = 300;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Advisor backed by a chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiAdvisor {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiAdvisor {
    /// Create an advisor from a config whose credentials are already
    /// resolved.
    ///
    /// # Errors
    ///
    /// Returns [`AdvisorError::Request`] if the HTTP client cannot be built.
    pub fn new(config: &RiskAgentConfig) -> Result<Self, AdvisorError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AdvisorError::Request {
                message: e.to_string(),
            })?;
        let base = config.base_url.trim().trim_end_matches('/');
        let base = if base.is_empty() { DEFAULT_BASE_URL } else { base };
        Ok(Self {
            client,
            endpoint: format!("{base}/chat/completions"),
            api_key: config.api_key.trim().to_string(),
            model: config.model.trim().to_string(),
        })
    }

    /// Model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, AdvisorError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdvisorError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.chars().count() > MAX_ERROR_CHARS {
                message = message.chars().take(MAX_ERROR_CHARS).collect::<String>() + "...";
            }
            tracing::warn!(status = status.as_u16(), message = %message, "Advisor API error");
            return Err(AdvisorError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| AdvisorError::Request {
            message: format!("decode response: {e}"),
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(AdvisorError::EmptyReply)
    }
}

#[async_trait]
impl DecisionAdvisorPort for OpenAiAdvisor {
    async fn evaluate(&self, input: &EventInput) -> Result<RiskDecision, AdvisorError> {
        let payload = serde_json::to_string(input).map_err(|e| AdvisorError::Request {
            message: format!("encode event: {e}"),
        })?;
        let text = self.complete(SYSTEM_PROMPT, &format!("Event: {payload}")).await?;
        let draft = parse_decision(&text)?;
        Ok(draft.sanitize())
    }

    async fn ping(&self) -> AdvisorStatus {
        let start = Instant::now();
        match self.complete(PING_PROMPT, "ping").await {
            Ok(_) => AdvisorStatus {
                ok: true,
                mode: AdvisorMode::Llm,
                reason: None,
                model: Some(self.model.clone()),
                latency_ms: Some(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Advisor ping failed");
                AdvisorStatus::fallback("llm error")
            }
        }
    }
}
