//! Conversation orchestrator
//!
//! Drives the bounded multi-turn loop between the model and the tool
//! dispatcher:
//!
//! 1. Build the initial message from the command (instruction, expert id and
//!    any context loaded through the cache and budget)
//! 2. Send the history and tool schemas to the model
//! 3. If the turn has no tool calls: record the final text and stop
//! 4. Otherwise dispatch every call with bounded concurrency, attach results
//!    by tool call id in the order the model emitted the calls, append them as
//!    one tool turn and go back to 2
//!
//! # Termination
//!
//! - `Completed` when a turn carries no tool calls
//! - `MaxIterations` when the iteration cap is reached; partial tool
//!   executions are returned, this is not an error
//! - `FatalError` when the model call fails or a tool escalates a fatal
//!   error; the message is recorded in the outcome
//!
//! Each run opens its own budget scope on the shared context, so sessions
//! running side by side never clear or consume each other's budget.

use futures::stream::{self, StreamExt};
use sdk::errors::EngineError;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::history::History;
use crate::command::Command;
use crate::config::AgentConfig;
use crate::budget::SizeBudget;
use crate::context::{EngineContext, LoadedContent, RunContext};
use crate::llm::{LLMProvider, Message, ModelTurn, ToolCall};
use crate::tools::{ToolDispatcher, ToolExecution};

/// Lifecycle of one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Running,
    Completed,
    MaxIterations,
    FatalError,
}

/// Mutable state of one session. Created per command.
#[derive(Debug)]
pub struct ConversationState {
    pub session_id: String,
    pub history: History,
    pub iteration_count: usize,
    pub max_iterations: usize,
    pub status: ConversationStatus,
}

impl ConversationState {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            history: History::new(config.history_cap, config.keep_recent),
            iteration_count: 0,
            max_iterations: config.max_iterations,
            status: ConversationStatus::Running,
        }
    }
}

/// Result of [`ConversationOrchestrator::run`]
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub session_id: String,
    pub status: ConversationStatus,
    pub final_text: Option<String>,
    pub iterations: usize,
    pub tool_executions: Vec<ToolExecution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Context loaded into the first message
    pub context: Vec<LoadedContent>,
    /// Budget usage of this run, including `read_context` calls
    pub budget: SizeBudget,
    pub duration_ms: u64,
}

pub struct ConversationOrchestrator {
    provider: Arc<dyn LLMProvider>,
    dispatcher: Arc<ToolDispatcher>,
    ctx: EngineContext,
    config: AgentConfig,
}

impl ConversationOrchestrator {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        dispatcher: Arc<ToolDispatcher>,
        ctx: EngineContext,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            ctx,
            config,
        }
    }

    /// Run one command to completion, the iteration cap, or a fatal error.
    pub async fn run(&self, command: &Command) -> RunOutcome {
        let start = Instant::now();
        let mut state = ConversationState::new(&self.config);
        info!(
            "Starting session {} for expert '{}' with provider {}",
            state.session_id,
            command.expert,
            self.provider.name()
        );

        let run = self.ctx.begin_run();
        let (context, handles) = run.load_all(&command.context_paths).await;
        state
            .history
            .push(Message::user(initial_message(command, &context)));

        let system = Message::system(self.dispatcher.system_prompt());
        let mut tool_executions = Vec::new();
        let mut final_text = None;
        let mut failure: Option<EngineError> = None;

        while state.iteration_count < state.max_iterations {
            state.iteration_count += 1;
            debug!(
                "Session {} iteration {}/{} ({} history entries)",
                state.session_id,
                state.iteration_count,
                state.max_iterations,
                state.history.len()
            );

            let mut request = Vec::with_capacity(state.history.len() + 1);
            request.push(system.clone());
            request.extend_from_slice(state.history.messages());

            let turn = match self.provider.send(&request, self.dispatcher.schemas()).await {
                Ok(turn) => turn,
                Err(e) => {
                    error!("Model call failed in session {}: {}", state.session_id, e);
                    failure = Some(e.into());
                    break;
                }
            };

            if turn.tool_calls.is_empty() {
                let text = turn.joined_text();
                state.history.push(Message::assistant(text.clone()));
                final_text = Some(text);
                state.status = ConversationStatus::Completed;
                break;
            }

            let turn = stamp_calls(turn, state.iteration_count);
            debug!(
                "Model requested {} tool call(s): {}",
                turn.tool_calls.len(),
                turn.tool_calls
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            state.history.push(Message::assistant_turn(&turn));

            match self.dispatch_round(&turn.tool_calls, &run).await {
                Ok(round) => {
                    let results = round.iter().map(|e| e.result.clone()).collect();
                    state.history.push(Message::tool_results(results));
                    tool_executions.extend(round);
                }
                Err((e, partial)) => {
                    error!("Fatal tool error in session {}: {}", state.session_id, e);
                    tool_executions.extend(partial);
                    failure = Some(e);
                    break;
                }
            }
        }

        if failure.is_some() {
            state.status = ConversationStatus::FatalError;
        } else if state.status == ConversationStatus::Running {
            warn!(
                "Session {} reached max iterations ({})",
                state.session_id, state.max_iterations
            );
            state.status = ConversationStatus::MaxIterations;
        }

        run.release(&handles);

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Session {} finished as {:?} after {} iteration(s), {} tool call(s), {}ms",
            state.session_id,
            state.status,
            state.iteration_count,
            tool_executions.len(),
            duration_ms
        );

        RunOutcome {
            session_id: state.session_id,
            status: state.status,
            final_text,
            iterations: state.iteration_count,
            tool_executions,
            error: failure.map(|e| e.to_string()),
            context,
            budget: run.budget.usage(),
            duration_ms,
        }
    }

    /// Dispatch every call of one turn with bounded concurrency.
    ///
    /// Returns executions in the order of `calls`. On a fatal error, returns
    /// the error with whatever executions completed before it.
    async fn dispatch_round(
        &self,
        calls: &[ToolCall],
        run: &RunContext,
    ) -> Result<Vec<ToolExecution>, (EngineError, Vec<ToolExecution>)> {
        let mut pending = stream::iter(calls.iter().map(|call| self.dispatcher.execute_in(call, run)))
            .buffer_unordered(self.config.tool_concurrency.max(1));

        let mut done: HashMap<String, ToolExecution> = HashMap::with_capacity(calls.len());
        while let Some(result) = pending.next().await {
            match result {
                Ok(execution) => {
                    done.insert(execution.call.id.clone(), execution);
                }
                Err(e) => return Err((e, in_call_order(calls, done))),
            }
        }
        Ok(in_call_order(calls, done))
    }
}

fn in_call_order(calls: &[ToolCall], mut done: HashMap<String, ToolExecution>) -> Vec<ToolExecution> {
    calls.iter().filter_map(|c| done.remove(&c.id)).collect()
}

/// Record the iteration on each call and make ids unique within the turn
fn stamp_calls(mut turn: ModelTurn, iteration: usize) -> ModelTurn {
    let mut seen = HashSet::new();
    for call in &mut turn.tool_calls {
        call.turn = iteration;
        if call.id.trim().is_empty() || !seen.insert(call.id.clone()) {
            let fresh = ToolCall::generated(&call.name, &call.arguments);
            warn!("Replacing missing or duplicate tool call id '{}' with {}", call.id, fresh.id);
            call.id = fresh.id;
            seen.insert(call.id.clone());
        }
    }
    turn
}

/// Build the first user message of a session
fn initial_message(command: &Command, context: &[LoadedContent]) -> String {
    let mut parts = vec![
        format!("Expert: {}", command.expert),
        String::new(),
        command.instruction.trim().to_string(),
    ];

    if !command.options.is_empty() {
        parts.push(String::new());
        parts.push("Options:".to_string());
        for (key, value) in &command.options {
            parts.push(format!("- {}: {}", key, value));
        }
    }

    for item in context {
        parts.push(String::new());
        parts.push(format!("--- context: {} ---", item.reference));
        parts.push(item.render());
    }

    parts.join("\n")
}
