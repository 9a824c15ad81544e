//! Command handlers for CLI operations
//!
//! - run: run an expert conversation and print the outcome
//! - evaluate: compare a variant against its baseline and print the verdict
//! - config show / validate

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{ConversationOrchestrator, ConversationStatus, RunOutcome};
use crate::command::Command;
use crate::config::Config;
use crate::context::EngineContext;
use crate::evaluation::{ComparativeEvaluator, EvaluationRequest, EvaluationVerdict};
use crate::fs_guard::FileSystemGuard;
use crate::llm::ollama::OllamaProvider;
use crate::llm::openai::OpenAIProvider;
use crate::llm::LLMProvider;
use crate::retry::RetryPolicy;
use crate::tools::{ReadContextTool, ToolDispatcher};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Build the configured default provider. The agent timeout bounds each
/// HTTP request to the model.
pub fn build_provider(config: &Config) -> Result<Arc<dyn LLMProvider>> {
    let timeout = Duration::from_secs(config.agent.llm_timeout_secs);
    let provider: Arc<dyn LLMProvider> = match config.llm.default_provider.as_str() {
        "ollama" => Arc::new(OllamaProvider::with_timeout(
            config.llm.ollama.base_url.clone(),
            config.llm.ollama.model.clone(),
            timeout,
        )),
        "openai" => Arc::new(OpenAIProvider::with_timeout(config.llm.openai.clone(), timeout)),
        other => anyhow::bail!("Unknown LLM provider '{}'", other),
    };
    Ok(provider)
}

/// Dispatcher with the workspace filesystem tools and the cache-backed reader
pub fn build_dispatcher(config: &Config, ctx: &EngineContext) -> Result<ToolDispatcher> {
    let guard = FileSystemGuard::new(config.core.workspace.clone())
        .context("Failed to open workspace")?;
    let mut dispatcher =
        ToolDispatcher::with_filesystem(guard, RetryPolicy::from_config(&config.retry));
    dispatcher.register(ReadContextTool::new(ctx.clone()));
    Ok(dispatcher)
}

/// Run one expert conversation
pub async fn handle_run(command: Command, config: &Config, format: OutputFormat) -> Result<()> {
    let provider = build_provider(config)?;
    if !provider.check_health().await {
        tracing::warn!("Provider {} did not pass its health check", provider.name());
    }

    let ctx = EngineContext::from_config(config).context("Failed to initialize content cache")?;
    let dispatcher = Arc::new(build_dispatcher(config, &ctx)?);
    tracing::info!("Registered tools: {}", dispatcher.tool_names().join(", "));

    let orchestrator =
        ConversationOrchestrator::new(provider, dispatcher, ctx, config.agent.clone());
    let outcome = orchestrator.run(&command).await;

    print_outcome(&outcome, format)?;

    if outcome.status == ConversationStatus::FatalError {
        anyhow::bail!(
            "Session {} failed: {}",
            outcome.session_id,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_outcome(outcome: &RunOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(outcome)?);
        }
        OutputFormat::Text => {
            match outcome.status {
                ConversationStatus::Completed => println!("✓ Session completed"),
                ConversationStatus::MaxIterations => {
                    println!("⚠ Session stopped at the iteration limit")
                }
                ConversationStatus::FatalError => println!("✗ Session failed"),
                ConversationStatus::Running => println!("… Session still running"),
            }
            println!("  Session:    {}", outcome.session_id);
            println!("  Iterations: {}", outcome.iterations);
            println!("  Tool calls: {}", outcome.tool_executions.len());
            println!("  Duration:   {}ms", outcome.duration_ms);
            for item in &outcome.context {
                if item.degraded {
                    println!("  Degraded:   {}", item.reference);
                }
                if item.truncated {
                    println!("  Truncated:  {}", item.reference);
                }
                if item.text.is_none() {
                    println!("  Omitted:    {}", item.reference);
                }
            }
            println!(
                "  Budget:     {} / {} bytes, {} item(s)",
                outcome.budget.used_bytes, outcome.budget.max_total_bytes, outcome.budget.used_items
            );
            if let Some(error) = &outcome.error {
                println!("  Error:      {}", error);
            }
            if let Some(text) = &outcome.final_text {
                println!();
                println!("{}", text);
            }
        }
    }
    Ok(())
}

/// Compare a variant against its baseline
pub async fn handle_evaluate(
    request: EvaluationRequest,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let provider = build_provider(config)?;
    let ctx = EngineContext::from_config(config).context("Failed to initialize content cache")?;
    let evaluator = ComparativeEvaluator::new(provider, ctx, config.evaluation.clone());

    let verdict = evaluator
        .evaluate(&request)
        .await
        .context("Evaluation failed")?;

    print_verdict(&verdict, format)
}

fn print_verdict(verdict: &EvaluationVerdict, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(verdict)?);
        }
        OutputFormat::Text => {
            println!("Decision:   {}", verdict.decision);
            println!("Winner:     {:?}", verdict.winner);
            println!(
                "Scores:     baseline {:.1}, variant {:.1}",
                verdict.score_a, verdict.score_b
            );
            println!("Confidence: {:?}", verdict.confidence);
            for (label, refs) in [
                ("Degraded:  ", &verdict.degraded_refs),
                ("Truncated: ", &verdict.truncated_refs),
                ("Omitted:   ", &verdict.skipped_refs),
            ] {
                if !refs.is_empty() {
                    println!("{} {}", label, refs.join(", "));
                }
            }
            if verdict.thresholds.adjustment > 0.0 {
                println!(
                    "Leniency:   thresholds lowered by {:.1}",
                    verdict.thresholds.adjustment
                );
            }
            println!();
            println!("{}", verdict.rationale);
            if !verdict.improvements.is_empty() {
                println!();
                println!("Improvements:");
                for item in &verdict.improvements {
                    println!("  - {}", item);
                }
            }
        }
    }
    Ok(())
}

/// Print the effective configuration
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => {
            let toml = toml::to_string_pretty(config).context("Failed to serialize config")?;
            println!("{}", toml);
        }
    }
    Ok(())
}

/// Validate the loaded configuration and the workspace
pub fn handle_config_validate(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    if let Err(e) = config.validate() {
        issues.push(e.to_string());
    }
    if let Err(e) = FileSystemGuard::new(config.core.workspace.clone()) {
        issues.push(e.to_string());
    }

    match format {
        OutputFormat::Json => {
            let output = json!({
                "valid": issues.is_empty(),
                "issues": issues,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            if issues.is_empty() {
                println!("✓ Configuration is valid");
            } else {
                for issue in &issues {
                    println!("✗ {}", issue);
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("Configuration has {} issue(s)", issues.len())
    }
}
