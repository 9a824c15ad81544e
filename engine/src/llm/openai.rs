//! OpenAI-compatible chat completions provider
//!
//! Works with any endpoint that speaks the `/chat/completions` dialect with
//! native `tools`. The API key is read from the environment at call time and
//! never stored in configuration.

use super::{ContentPart, LLMError, LLMProvider, Message, MessageRole, ModelTurn, ToolCall};
use crate::config::OpenAIConfig;
use async_trait::async_trait;
use sdk::types::ToolSchema;
use serde_json::json;

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

pub struct OpenAIProvider {
    config: OpenAIConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(config: OpenAIConfig, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    fn api_key(&self) -> super::Result<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LLMError::AuthenticationFailed(format!("{} is not set", API_KEY_ENV)))
    }

    fn convert_messages(messages: &[Message]) -> Vec<serde_json::Value> {
        let mut api_messages = Vec::new();
        for msg in messages {
            match msg.role {
                MessageRole::Tool => {
                    for result in msg.results() {
                        api_messages.push(json!({
                            "role": "tool",
                            "tool_call_id": result.tool_call_id,
                            "content": result.render(),
                        }));
                    }
                }
                role => {
                    let tool_calls: Vec<serde_json::Value> = msg
                        .parts
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::ToolCall(call) => Some(json!({
                                "id": call.id,
                                "type": "function",
                                "function": { "name": call.name, "arguments": call.arguments },
                            })),
                            _ => None,
                        })
                        .collect();
                    let mut value = json!({
                        "role": role.to_string(),
                        "content": msg.text(),
                    });
                    if !tool_calls.is_empty() {
                        value["tool_calls"] = serde_json::Value::Array(tool_calls);
                    }
                    api_messages.push(value);
                }
            }
        }
        api_messages
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn check_health(&self) -> bool {
        self.api_key().is_ok()
    }

    async fn send(&self, history: &[Message], tools: &[ToolSchema]) -> super::Result<ModelTurn> {
        let api_key = self.api_key()?;

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let mut payload = json!({
            "model": self.config.model,
            "messages": Self::convert_messages(history),
        });
        if !tools.is_empty() {
            payload["tools"] =
                serde_json::Value::Array(tools.iter().map(ToolSchema::to_json_schema).collect());
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                500..=599 => LLMError::ProviderUnavailable(text),
                _ => LLMError::InvalidRequest(text),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let message = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| LLMError::ParseError("No message in response".to_string()))?;

        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        let native: Vec<ToolCall> = message
            .get("tool_calls")
            .and_then(|c| c.as_array())
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        let id = call.get("id")?.as_str()?;
                        let function = call.get("function")?;
                        let name = function.get("name")?.as_str()?;
                        let arguments = match function.get("arguments") {
                            Some(serde_json::Value::String(raw)) => raw.clone(),
                            Some(other) => other.to_string(),
                            None => "{}".to_string(),
                        };
                        Some(ToolCall::new(id, name, arguments))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if native.is_empty() {
            if content.is_empty() {
                return Err(LLMError::ParseError("Empty content".to_string()));
            }
            return Ok(ModelTurn::from_content(content));
        }

        Ok(ModelTurn {
            text_segments: if content.is_empty() {
                Vec::new()
            } else {
                vec![content]
            },
            tool_calls: native,
        })
    }
}
