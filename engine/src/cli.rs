//! CLI interface for Duel
//!
//! Defines the commands and global flags used by the workflow step that
//! drives the engine.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Duel prompt engine
///
/// Runs expert conversations on comment commands and compares prompt
/// variants against their baseline.
#[derive(Parser, Debug)]
#[command(name = "duel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an expert conversation on an instruction
    Run {
        /// Expert identifier
        #[arg(short, long)]
        expert: String,

        /// Instruction text
        instruction: String,

        /// Workspace path or URL to load as context (repeatable)
        #[arg(short, long = "context", value_name = "REF")]
        context: Vec<String>,

        /// Extra option as key=value (repeatable)
        #[arg(short, long = "option", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        option: Vec<(String, String)>,

        /// Override agent.max_iterations
        #[arg(long)]
        max_iterations: Option<usize>,
    },

    /// Compare a prompt variant against its baseline
    Evaluate {
        /// Rubric path or URL
        #[arg(long)]
        rubric: String,

        /// Baseline prompt (candidate A)
        #[arg(long)]
        baseline: String,

        /// Variant prompt (candidate B)
        #[arg(long)]
        variant: String,

        /// Scenario path or URL (repeatable)
        #[arg(long = "scenario", value_name = "REF")]
        scenario: Vec<String>,

        /// Inline scenario text (repeatable)
        #[arg(long = "scenario-text", value_name = "TEXT")]
        scenario_text: Vec<String>,

        /// Context path or URL given to both candidates (repeatable)
        #[arg(short, long = "context", value_name = "REF")]
        context: Vec<String>,

        /// Earlier SUGGEST rounds for this variant
        #[arg(long, default_value = "0")]
        prior_suggest_cycles: u32,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["duel", "--json", "--log", "debug", "config", "show"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from([
            "duel",
            "run",
            "--expert",
            "reviewer",
            "Tighten the intro",
            "--context",
            "prompts/reviewer.md",
            "--option",
            "tone=strict",
        ]);
        if let Command::Run {
            expert,
            instruction,
            context,
            option,
            max_iterations,
        } = cli.command
        {
            assert_eq!(expert, "reviewer");
            assert_eq!(instruction, "Tighten the intro");
            assert_eq!(context, vec!["prompts/reviewer.md"]);
            assert_eq!(option, vec![("tone".to_string(), "strict".to_string())]);
            assert!(max_iterations.is_none());
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_run_rejects_bad_option() {
        let result = Cli::try_parse_from([
            "duel", "run", "--expert", "reviewer", "x", "--option", "novalue",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_evaluate_command() {
        let cli = Cli::parse_from([
            "duel",
            "evaluate",
            "--rubric",
            "rubric.md",
            "--baseline",
            "a.md",
            "--variant",
            "b.md",
            "--scenario",
            "s1.md",
            "--scenario-text",
            "Summarize this",
        ]);
        if let Command::Evaluate {
            rubric,
            scenario,
            scenario_text,
            prior_suggest_cycles,
            ..
        } = cli.command
        {
            assert_eq!(rubric, "rubric.md");
            assert_eq!(scenario, vec!["s1.md"]);
            assert_eq!(scenario_text, vec!["Summarize this"]);
            assert_eq!(prior_suggest_cycles, 0);
        } else {
            panic!("Expected Evaluate command");
        }
    }

    #[test]
    fn test_config_validate() {
        let cli = Cli::parse_from(["duel", "config", "validate"]);
        if let Command::Config { action } = cli.command {
            assert!(matches!(action, ConfigAction::Validate));
        } else {
            panic!("Expected Config command");
        }
    }
}
