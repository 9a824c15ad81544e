//! Integration tests for configuration management
//!
//! These tests verify that config files are loaded, validated, and processed
//! with workspace expansion and canonicalization.

use duel_engine::config::Config;
use sdk::errors::EngineError;
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_minimal_config_uses_defaults() {
    let temp = TempDir::new().unwrap();
    let workspace = temp.path().join("repo");
    let path = write_config(
        &temp,
        &format!(
            r#"
[core]
workspace = "{}"

[llm]
default_provider = "ollama"
"#,
            workspace.display()
        ),
    );

    let config = Config::load_from_path(&path).unwrap();

    // Missing workspace is created and canonicalized
    assert!(workspace.is_dir());
    assert_eq!(config.core.workspace, workspace.canonicalize().unwrap());
    assert_eq!(config.core.log_level, "info");
    assert_eq!(config.agent.max_iterations, 20);
    assert_eq!(config.agent.history_cap, 24);
    assert_eq!(config.agent.keep_recent, 16);
    assert_eq!(config.agent.tool_concurrency, 4);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.cache.ttl_days, 14);
    assert_eq!(config.evaluation.merge_threshold, 8.5);
    assert_eq!(config.evaluation.suggest_threshold, 6.0);
    assert!(config.evaluation.leniency.is_none());
}

#[test]
fn test_full_config_overrides() {
    let temp = TempDir::new().unwrap();
    let path = write_config(
        &temp,
        &format!(
            r#"
[core]
workspace = "{}"
log_level = "debug"

[llm]
default_provider = "openai"

[llm.openai]
base_url = "https://llm.internal.example/v1"
model = "gpt-4o"

[agent]
max_iterations = 8
history_cap = 12
keep_recent = 6
tool_concurrency = 2
llm_timeout_secs = 60

[retry]
max_attempts = 5
initial_delay_ms = 100
max_delay_ms = 1000
multiplier = 3.0

[cache]
ttl_days = 7
placeholder_text = "Placeholder."

[budget]
max_total_bytes = 4096
max_items = 8
max_token_estimate = 1024
max_item_bytes = 1024
critical_ratio = 0.8

[evaluation]
merge_threshold = 9.0
suggest_threshold = 5.0

[evaluation.leniency]
per_cycle = 0.5
max_adjustment = 1.5
"#,
            temp.path().display()
        ),
    );

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.llm.default_provider, "openai");
    assert_eq!(config.llm.openai.model, "gpt-4o");
    assert_eq!(config.agent.max_iterations, 8);
    assert_eq!(config.agent.llm_timeout_secs, 60);
    assert_eq!(config.retry.multiplier, 3.0);
    assert_eq!(config.cache.placeholder_text, "Placeholder.");
    assert_eq!(config.budget.max_items, 8);
    let leniency = config.evaluation.leniency.unwrap();
    assert_eq!(leniency.per_cycle, 0.5);
    assert_eq!(leniency.max_adjustment, 1.5);
}

#[test]
fn test_invalid_values_are_rejected() {
    let temp = TempDir::new().unwrap();
    let cases = [
        ("[core]\nlog_level = \"loud\"", "log level"),
        ("[agent]\nmax_iterations = 0", "max_iterations"),
        ("[evaluation]\nmerge_threshold = 5.0\nsuggest_threshold = 6.0", "thresholds"),
        ("[budget]\ncritical_ratio = 1.5", "critical_ratio"),
    ];

    for (section, expected) in cases {
        let body = if section.starts_with("[core]") {
            format!(
                "{}\nworkspace = \"{}\"\n\n[llm]\ndefault_provider = \"ollama\"\n",
                section,
                temp.path().display()
            )
        } else {
            format!(
                "[core]\nworkspace = \"{}\"\n\n[llm]\ndefault_provider = \"ollama\"\n\n{}\n",
                temp.path().display(),
                section
            )
        };
        let path = write_config(&temp, &body);

        match Config::load_from_path(&path) {
            Err(EngineError::Config(message)) => {
                assert!(message.contains(expected), "{} -> {}", expected, message)
            }
            other => panic!("expected config error for {}, got {:?}", expected, other),
        }
    }
}

#[test]
fn test_unparsable_file_is_config_error() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, "[core\nworkspace = ");
    assert!(matches!(
        Config::load_from_path(&path),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn test_missing_file_is_config_error() {
    let temp = TempDir::new().unwrap();
    let result = Config::load_from_path(&temp.path().join("absent.toml"));
    assert!(matches!(result, Err(EngineError::Config(_))));
}

#[test]
fn test_saved_default_loads_back() {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default_config();
    config.core.workspace = temp.path().to_path_buf();

    let path = write_config(&temp, &toml::to_string_pretty(&config).unwrap());
    let loaded = Config::load_from_path(&path).unwrap();

    assert_eq!(loaded.agent.max_iterations, config.agent.max_iterations);
    assert_eq!(loaded.budget.max_total_bytes, config.budget.max_total_bytes);
    assert_eq!(loaded.cache.placeholder_text, config.cache.placeholder_text);
}
