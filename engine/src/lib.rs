//! Duel Engine Library
//!
//! Conversation orchestration and comparative prompt evaluation for a
//! comment-driven prompt-engineering workflow. Used by the `duel` binary and
//! the integration tests.

/// Expert conversation loop
pub mod agent;

/// Size accounting for loaded content
pub mod budget;

/// Content-addressed cache for loaded files and URLs
pub mod cache;

/// CLI interface module
pub mod cli;

/// Parsed command handed to the orchestrator
pub mod command;

/// Configuration management module
pub mod config;

/// Shared cache and budget context
pub mod context;

/// Baseline versus variant evaluation
pub mod evaluation;

/// File system security module
pub mod fs_guard;

/// Command handlers module
pub mod handlers;

/// LLM provider abstraction layer
pub mod llm;

/// Retry policy for transient failures
pub mod retry;

/// Telemetry and Observability
pub mod telemetry;

/// Tool registry and dispatch
pub mod tools;
