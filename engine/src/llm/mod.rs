//! LLM Provider Abstraction Layer
//!
//! This module defines the conversation data model (messages made of content
//! parts, tool calls and tool results) and the `LLMProvider` trait that every
//! model backend implements. The orchestrator and the evaluator only ever talk
//! to a model through `LLMProvider::send`, so the concrete backend (Ollama,
//! an OpenAI-compatible endpoint, or a scripted test double) is swappable.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::ToolSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod ollama;
pub mod openai;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<LLMError> for EngineError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::AuthenticationFailed(msg) => EngineError::AuthenticationFailed(msg),
            LLMError::RateLimitExceeded => EngineError::RateLimited("LLM provider".to_string()),
            LLMError::NetworkError(msg) => EngineError::Network(msg),
            LLMError::Timeout => EngineError::Timeout("LLM call".to_string()),
            other => EngineError::LLMProvider(other.to_string()),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message
    User,

    /// Assistant message
    Assistant,

    /// System message
    System,

    /// Tool result message
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Tool call request from the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,

    /// Name of the tool to call
    pub name: String,

    /// Arguments to pass to the tool (raw JSON text, validated at dispatch)
    pub arguments: String,

    /// Iteration in which the model emitted the call
    #[serde(default)]
    pub turn: usize,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
            turn: 0,
        }
    }

    /// Create a tool call with a freshly generated id
    pub fn generated(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self::new(
            format!("call_{}", uuid::Uuid::new_v4().simple()),
            name,
            arguments,
        )
    }
}

/// Outcome of a single tool call, matched to its call by `tool_call_id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: true,
            payload: Some(payload.into()),
            error_message: None,
        }
    }

    pub fn failed(tool_call_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: false,
            payload: None,
            error_message: Some(error_message.into()),
        }
    }

    /// Text shown to the model for this result
    pub fn render(&self) -> String {
        match (&self.payload, &self.error_message) {
            (_, Some(err)) if !self.success => format!("ERROR: {}", err),
            (Some(payload), _) => payload.clone(),
            _ => String::new(),
        }
    }
}

/// One part of a message body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Ordered content parts
    pub parts: Vec<ContentPart>,
}

impl Message {
    fn text_message(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text {
                text: content.into(),
            }],
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::text_message(MessageRole::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text_message(MessageRole::Assistant, content)
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::text_message(MessageRole::System, content)
    }

    /// Assistant turn that requested one or more tool calls
    pub fn assistant_turn(turn: &ModelTurn) -> Self {
        let mut parts: Vec<ContentPart> = turn
            .text_segments
            .iter()
            .map(|text| ContentPart::Text { text: text.clone() })
            .collect();
        parts.extend(turn.tool_calls.iter().cloned().map(ContentPart::ToolCall));
        Self {
            role: MessageRole::Assistant,
            parts,
        }
    }

    /// Combined tool turn carrying every result of one round
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: MessageRole::Tool,
            parts: results.into_iter().map(ContentPart::ToolResult).collect(),
        }
    }

    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool calls carried by this message
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.parts.iter().filter_map(|p| match p {
            ContentPart::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    /// Tool results carried by this message
    pub fn results(&self) -> impl Iterator<Item = &ToolResult> {
        self.parts.iter().filter_map(|p| match p {
            ContentPart::ToolResult(result) => Some(result),
            _ => None,
        })
    }

    /// True if this message is an assistant turn requesting tools
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls().next().is_some()
    }

    /// Approximate character length of all parts
    pub fn char_len(&self) -> usize {
        self.parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.len(),
                ContentPart::ToolCall(call) => call.name.len() + call.arguments.len(),
                ContentPart::ToolResult(result) => result.render().len(),
            })
            .sum()
    }
}

/// One model response: zero or more text segments and zero or more tool calls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelTurn {
    pub text_segments: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelTurn {
    /// A text-only turn
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            text_segments: vec![content.into()],
            tool_calls: Vec::new(),
        }
    }

    /// A turn requesting the given tool calls
    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text_segments: Vec::new(),
            tool_calls,
        }
    }

    /// Build a turn from free-form model output, extracting tool calls that
    /// the model wrote inline.
    pub fn from_content(content: impl Into<String>) -> Self {
        let content = content.into();
        let tool_calls = parse_tool_calls(&content);
        if tool_calls.is_empty() {
            Self::text(content)
        } else {
            Self::calls(tool_calls)
        }
    }

    /// All text segments joined
    pub fn joined_text(&self) -> String {
        self.text_segments.join("\n")
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama)
    fn is_local(&self) -> bool;

    /// Send the conversation history and the available tool schemas.
    ///
    /// # Returns
    /// * `Ok(ModelTurn)` - text segments and zero or more tool calls
    /// * `Err(LLMError)` - if the request fails
    async fn send(&self, history: &[Message], tools: &[ToolSchema]) -> Result<ModelTurn>;

    /// Check if the provider is currently healthy and available
    async fn check_health(&self) -> bool {
        true
    }
}

/// Extract tool calls written inline in model text.
///
/// Handles multiple output formats:
/// 1. Raw JSON: `{"function": "...", "arguments": {...}}` or an array of them
/// 2. Fenced JSON (with or without trailing text)
/// 3. `<tool_call>name({...})</tool_call>` markers, any number of them
/// 4. JSON embedded in prose; scans for every `{"function":`
pub fn parse_tool_calls(content: &str) -> Vec<ToolCall> {
    let trimmed = content.trim();

    if let Some(calls) = try_parse_function_json(trimmed) {
        return calls;
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Some(calls) = try_parse_function_json(inner.trim()) {
            return calls;
        }
    }

    let mut calls = Vec::new();
    let mut rest = trimmed;
    while let Some(start) = rest.find("<tool_call>") {
        let after = &rest[start + "<tool_call>".len()..];
        let Some(end) = after.find("</tool_call>") else {
            break;
        };
        let tool_content = &after[..end];
        if let Some(paren_pos) = tool_content.find('(') {
            let tool_name = &tool_content[..paren_pos];
            let args_end = tool_content.rfind(')').unwrap_or(tool_content.len());
            let arguments = &tool_content[paren_pos + 1..args_end.max(paren_pos + 1)];
            calls.push(ToolCall::generated(tool_name.trim(), arguments.trim()));
        }
        rest = &after[end + "</tool_call>".len()..];
    }
    if !calls.is_empty() {
        return calls;
    }

    let mut offset = 0;
    while let Some(pos) = trimmed[offset..].find("{\"function\"") {
        let candidate = &trimmed[offset + pos..];
        match extract_balanced_json(candidate) {
            Some(json_str) => {
                if let Some(found) = try_parse_function_json(json_str) {
                    calls.extend(found);
                }
                offset += pos + json_str.len();
            }
            None => break,
        }
    }

    calls
}

/// Parse `{"function": ..., "arguments": ...}` or an array of such objects.
fn try_parse_function_json(s: &str) -> Option<Vec<ToolCall>> {
    let json: serde_json::Value = serde_json::from_str(s).ok()?;
    match json {
        serde_json::Value::Array(items) => {
            let calls: Vec<ToolCall> = items.iter().filter_map(function_object).collect();
            if calls.is_empty() || calls.len() != items.len() {
                None
            } else {
                Some(calls)
            }
        }
        other => function_object(&other).map(|call| vec![call]),
    }
}

fn function_object(json: &serde_json::Value) -> Option<ToolCall> {
    let function = json.get("function")?.as_str()?;
    let arguments = json.get("arguments")?;
    let arguments = match arguments {
        serde_json::Value::String(raw) => raw.clone(),
        other => other.to_string(),
    };
    Some(ToolCall::generated(function, arguments))
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing fence.
pub(crate) fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals.
pub(crate) fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
