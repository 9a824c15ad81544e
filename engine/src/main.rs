// Duel prompt engine
// Main entry point for the duel binary

use clap::Parser;
use duel_engine::cli::{Cli, Command, ConfigAction};
use duel_engine::command::{Command as EngineCommand, CommandMode};
use duel_engine::config::Config;
use duel_engine::evaluation::{EvaluationRequest, Scenario};
use duel_engine::handlers::{
    handle_config_show, handle_config_validate, handle_evaluate, handle_run, OutputFormat,
};
use duel_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let mut config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // Only takes effect if RUST_LOG is not set
    let log_level = cli.log.clone().unwrap_or_else(|| config.core.log_level.clone());
    init_telemetry_with_level(&log_level);

    tracing::info!(
        "Duel Engine v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    match cli.command {
        Command::Run {
            expert,
            instruction,
            context,
            option,
            max_iterations,
        } => {
            if let Some(max) = max_iterations {
                config.agent.max_iterations = max.max(1);
            }
            let mut command = EngineCommand::new(expert, instruction);
            command.mode = CommandMode::Run;
            command.context_paths = context;
            command.options = option.into_iter().collect();

            tracing::info!("Running expert '{}'", command.expert);
            handle_run(command, &config, format).await
        }

        Command::Evaluate {
            rubric,
            baseline,
            variant,
            scenario,
            scenario_text,
            context,
            prior_suggest_cycles,
        } => {
            let mut request = EvaluationRequest::new(rubric, baseline, variant);
            request.scenarios = scenario
                .into_iter()
                .map(Scenario::Ref)
                .chain(scenario_text.into_iter().map(Scenario::Inline))
                .collect();
            request.context_bundle = context;
            request.prior_suggest_cycles = prior_suggest_cycles;

            tracing::info!(
                "Evaluating {} against {} on {} scenario(s)",
                request.candidate_b,
                request.candidate_a,
                request.scenarios.len()
            );
            handle_evaluate(request, &config, format).await
        }

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Validate => handle_config_validate(&config, format),
        },
    }
}
