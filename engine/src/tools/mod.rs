//! Tool dispatch
//!
//! Tools are registered by name together with a declared [`ToolSchema`].
//! Every call the model makes is parsed, validated against the schema and
//! only then handed to the handler. Handler failures are classified:
//!
//! - transient failures are retried according to the [`RetryPolicy`]
//! - validation and permanent failures come back as a failed [`ToolResult`]
//!   so the model can see the error and self-correct
//! - fatal failures are returned as `Err` and end the session
//!
//! Calls dispatched from a run go through [`ToolDispatcher::execute_in`], so
//! tools that load content charge that run's budget.

pub mod context;
pub mod filesystem;

pub use context::ReadContextTool;
pub use filesystem::{ListDirTool, ReadFileTool, WriteFileTool};

use async_trait::async_trait;
use sdk::errors::{DuelErrorExt, EngineError, ErrorClass};
use sdk::types::{ToolInput, ToolOutput, ToolSchema};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::context::RunContext;
use crate::fs_guard::FileSystemGuard;
use crate::llm::{ToolCall, ToolResult};
use crate::retry::{RetryDecision, RetryPolicy};

/// A callable tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Declared name, description and parameters
    fn schema(&self) -> ToolSchema;

    /// Run the tool with arguments that already passed schema validation
    async fn call(&self, input: ToolInput) -> Result<ToolOutput, EngineError>;

    /// Run the tool on behalf of a run. Tools that load content override this
    /// to charge the run's budget.
    async fn call_in_run(&self, input: ToolInput, _run: &RunContext) -> Result<ToolOutput, EngineError> {
        self.call(input).await
    }
}

/// Record of one dispatched call
#[derive(Debug, Clone, Serialize)]
pub struct ToolExecution {
    pub call: ToolCall,
    pub result: ToolResult,
    /// Handler invocations made; 0 when the call was rejected before dispatch
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Registered-handler table keyed by tool name
pub struct ToolDispatcher {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    schemas: Vec<ToolSchema>,
    retry: RetryPolicy,
}

impl ToolDispatcher {
    /// Create an empty dispatcher with no tools registered.
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            handlers: HashMap::new(),
            schemas: Vec::new(),
            retry,
        }
    }

    /// Dispatcher with the workspace filesystem tools registered
    pub fn with_filesystem(guard: FileSystemGuard, retry: RetryPolicy) -> Self {
        let mut dispatcher = Self::new(retry);
        dispatcher.register(ReadFileTool::new(guard.clone()));
        dispatcher.register(WriteFileTool::new(guard.clone()));
        dispatcher.register(ListDirTool::new(guard));
        dispatcher
    }

    /// Register a handler under its schema name. A later registration with
    /// the same name replaces the earlier one.
    pub fn register(&mut self, handler: impl ToolHandler + 'static) {
        let schema = handler.schema();
        let name = schema.name.clone();
        if self.handlers.insert(name.clone(), Arc::new(handler)).is_some() {
            self.schemas.retain(|s| s.name != name);
        }
        self.schemas.push(schema);
    }

    /// Schemas advertised to the model, in registration order
    pub fn schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    /// Return the names of all registered tools.
    pub fn tool_names(&self) -> Vec<&str> {
        self.schemas.iter().map(|s| s.name.as_str()).collect()
    }

    /// Execute one tool call.
    ///
    /// # Errors
    ///
    /// Only errors classified as [`ErrorClass::Fatal`] are returned. Every
    /// other failure is encoded in the returned `ToolExecution`.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolExecution, EngineError> {
        self.dispatch(call, None).await
    }

    /// Execute one tool call as part of `run`. Same error contract as
    /// [`ToolDispatcher::execute`].
    pub async fn execute_in(&self, call: &ToolCall, run: &RunContext) -> Result<ToolExecution, EngineError> {
        self.dispatch(call, Some(run)).await
    }

    async fn dispatch(&self, call: &ToolCall, run: Option<&RunContext>) -> Result<ToolExecution, EngineError> {
        let start = Instant::now();
        debug!("Dispatching tool '{}' ({}) with args: {}", call.name, call.id, call.arguments);

        let (result, attempts) = match self.prepare(call) {
            Ok((handler, input)) => self.invoke(call, handler, input, run).await?,
            Err(err) => {
                warn!("Rejected tool call {} before dispatch: {}", call.id, err);
                (ToolResult::failed(&call.id, err.to_string()), 0)
            }
        };

        Ok(ToolExecution {
            call: call.clone(),
            result,
            attempts,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Look up the handler and validate arguments
    fn prepare(&self, call: &ToolCall) -> Result<(Arc<dyn ToolHandler>, ToolInput), EngineError> {
        let handler = self.handlers.get(&call.name).cloned().ok_or_else(|| {
            EngineError::ToolNotFound(format!(
                "'{}'. Available tools: {}",
                call.name,
                self.tool_names().join(", ")
            ))
        })?;

        let raw = call.arguments.trim();
        let arguments: serde_json::Value = if raw.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(raw).map_err(|e| EngineError::InvalidArguments {
                tool: call.name.clone(),
                reason: format!("arguments are not valid JSON: {}", e),
            })?
        };

        let input = handler
            .schema()
            .validate(&arguments)
            .map_err(|e| EngineError::InvalidArguments {
                tool: call.name.clone(),
                reason: e.to_string(),
            })?;

        Ok((handler, input))
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        handler: Arc<dyn ToolHandler>,
        input: ToolInput,
        run: Option<&RunContext>,
    ) -> Result<(ToolResult, u32), EngineError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match run {
                Some(run) => handler.call_in_run(input.clone(), run).await,
                None => handler.call(input.clone()).await,
            };
            match outcome {
                Ok(output) if output.success => {
                    return Ok((ToolResult::ok(&call.id, output.render()), attempt));
                }
                Ok(output) => {
                    let message = output.error.unwrap_or_else(|| "tool reported failure".to_string());
                    return Ok((ToolResult::failed(&call.id, message), attempt));
                }
                Err(err) if err.class() == ErrorClass::Fatal => {
                    error!("Fatal error from tool '{}' ({}): {}", call.name, call.id, err);
                    return Err(err);
                }
                Err(err) => match self.retry.decide(err.class(), attempt) {
                    RetryDecision::Retry { delay } => {
                        warn!(
                            "Tool '{}' attempt {}/{} failed ({}): {}. Retrying in {:?}",
                            call.name,
                            attempt,
                            self.retry.max_attempts(),
                            err.class(),
                            err,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        warn!(
                            "Tool '{}' failed after {} attempt(s) ({}): {}",
                            call.name,
                            attempt,
                            err.class(),
                            err
                        );
                        return Ok((ToolResult::failed(&call.id, err.to_string()), attempt));
                    }
                },
            }
        }
    }

    /// Generate a system prompt describing the registered tools.
    pub fn system_prompt(&self) -> String {
        let mut parts = vec![
            "You are an expert assistant working inside a repository checkout. You can use tools."
                .to_string(),
            String::new(),
            "RULES:".to_string(),
            "1. Call tools through the native tool interface when it is available.".to_string(),
            "2. Otherwise, to call a tool your response must contain only JSON of the form:"
                .to_string(),
            r#"   {"function": "tool_name", "arguments": {"arg1": "value1"}}"#.to_string(),
            "   Several calls may be sent at once as a JSON array of such objects.".to_string(),
            "3. When you have the final answer, respond with plain text only.".to_string(),
            "4. Never guess tool output. Call the tool and wait for the real result.".to_string(),
        ];

        if !self.schemas.is_empty() {
            parts.push(String::new());
            parts.push("Available tools:".to_string());
        }

        for schema in &self.schemas {
            parts.push(String::new());
            parts.push(format!("## {}", schema.name));
            parts.push(schema.description.clone());
            let args: Vec<String> = schema
                .params
                .iter()
                .map(|p| {
                    format!(
                        "{} ({:?}{}): {}",
                        p.name,
                        p.param_type,
                        if p.required { "" } else { ", optional" },
                        p.description
                    )
                    .to_lowercase()
                })
                .collect();
            if !args.is_empty() {
                parts.push(format!("Arguments: {}", args.join("; ")));
            }
        }

        parts.join("\n")
    }
}
