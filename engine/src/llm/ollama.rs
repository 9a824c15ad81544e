//! Ollama LLM Provider
//!
//! This module implements the LLMProvider trait for Ollama, a local LLM provider.
//! Ollama runs models locally, typically at http://localhost:11434.
//!
//! Key features:
//! - Local execution (no API keys required)
//! - Native tool calling via the `tools` field of `/api/chat`
//! - Fallback extraction of tool calls the model wrote as text
//! - Error mapping to LLMError

use async_trait::async_trait;
use reqwest::Client;
use sdk::types::ToolSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ContentPart, LLMError, LLMProvider, Message, MessageRole, ModelTurn, Result, ToolCall};

/// Ollama provider configuration
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    /// Base URL for Ollama API (typically http://localhost:11434)
    base_url: String,

    /// Model name to use (e.g., "llama3.1:8b")
    model: String,

    /// HTTP client for API requests
    client: Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    ///
    /// # Arguments
    /// * `base_url` - Base URL for Ollama API (e.g., "http://localhost:11434")
    /// * `model` - Model name to use (e.g., "llama3.1:8b")
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_timeout(base_url, model, Duration::from_secs(300))
    }

    /// Create a provider with a custom HTTP timeout
    pub fn with_timeout(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        }
    }

    /// Convert our Message format to Ollama's format.
    ///
    /// A combined tool turn becomes one `tool` message per result, in the
    /// order the results are stored.
    fn convert_messages(&self, messages: &[Message]) -> Vec<OllamaMessage> {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role {
                MessageRole::Tool => {
                    for result in msg.results() {
                        out.push(OllamaMessage {
                            role: "tool".to_string(),
                            content: result.render(),
                            tool_calls: None,
                        });
                    }
                }
                role => {
                    let tool_calls: Vec<OllamaToolCall> = msg
                        .parts
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::ToolCall(call) => Some(OllamaToolCall {
                                function: OllamaFunction {
                                    name: call.name.clone(),
                                    arguments: serde_json::from_str(&call.arguments)
                                        .unwrap_or(serde_json::Value::String(
                                            call.arguments.clone(),
                                        )),
                                },
                            }),
                            _ => None,
                        })
                        .collect();
                    out.push(OllamaMessage {
                        role: role.to_string(),
                        content: msg.text(),
                        tool_calls: if tool_calls.is_empty() {
                            None
                        } else {
                            Some(tool_calls)
                        },
                    });
                }
            }
        }
        out
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn send(&self, history: &[Message], tools: &[ToolSchema]) -> Result<ModelTurn> {
        let ollama_messages = self.convert_messages(history);

        tracing::debug!(
            "Ollama request: model={}, messages={}, tools={}",
            self.model,
            ollama_messages.len(),
            tools.len()
        );

        let request = OllamaRequest {
            model: self.model.clone(),
            messages: ollama_messages,
            tools: tools.iter().map(ToolSchema::to_json_schema).collect(),
            stream: false,
        };

        let url = format!("{}/api/chat", self.base_url);
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else if e.is_connect() {
                    LLMError::ProviderUnavailable(format!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.base_url
                    ))
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        tracing::info!(
            "Ollama response received in {:.1}s",
            start.elapsed().as_secs_f64()
        );

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => LLMError::RateLimitExceeded,
                400..=499 => LLMError::InvalidRequest(error_text),
                _ => LLMError::ProviderUnavailable(format!(
                    "Ollama API error ({}): {}",
                    status, error_text
                )),
            });
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse Ollama response: {}", e)))?;

        let message = ollama_response.message;
        match message.tool_calls {
            Some(native) if !native.is_empty() => {
                let tool_calls = native
                    .into_iter()
                    .map(|tc| {
                        let arguments = match tc.function.arguments {
                            serde_json::Value::String(raw) => raw,
                            other => other.to_string(),
                        };
                        ToolCall::generated(tc.function.name, arguments)
                    })
                    .collect();
                let text_segments = if message.content.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![message.content]
                };
                Ok(ModelTurn {
                    text_segments,
                    tool_calls,
                })
            }
            _ => Ok(ModelTurn::from_content(message.content)),
        }
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(self.client.get(&url).send().await, Ok(r) if r.status().is_success())
    }
}

/// Ollama API request format
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    stream: bool,
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Ollama API response format
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolResult;

    #[test]
    fn test_ollama_provider_properties() {
        let provider = OllamaProvider::new("http://localhost:11434/", "llama3.1:8b");
        assert_eq!(provider.name(), "ollama");
        assert!(provider.is_local());
        assert_eq!(provider.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_message_conversion() {
        let provider = OllamaProvider::new("http://localhost:11434", "llama3.1:8b");

        let turn = ModelTurn::calls(vec![
            ToolCall::new("c1", "read_file", r#"{"path":"a"}"#),
            ToolCall::new("c2", "read_file", r#"{"path":"b"}"#),
        ]);
        let messages = vec![
            Message::system("You are a helpful assistant"),
            Message::user("Hello"),
            Message::assistant_turn(&turn),
            Message::tool_results(vec![ToolResult::ok("c1", "A"), ToolResult::ok("c2", "B")]),
        ];

        let converted = provider.convert_messages(&messages);

        assert_eq!(converted.len(), 5);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].role, "user");
        assert_eq!(converted[2].role, "assistant");
        assert_eq!(converted[2].tool_calls.as_ref().map(|c| c.len()), Some(2));
        assert_eq!(converted[3].role, "tool");
        assert_eq!(converted[3].content, "A");
        assert_eq!(converted[4].content, "B");
    }
}
