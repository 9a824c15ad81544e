//! Configuration management
//!
//! This module handles loading, validation, and management of the Duel configuration.
//! Configuration is stored in TOML format at ~/.duel/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Workspace path, log level
//! - **llm**: LLM provider settings
//! - **agent**: Conversation loop limits and history compaction
//! - **retry**: Backoff policy for transient failures
//! - **cache**: Content cache TTL and fallback text
//! - **budget**: Size limits for assembled evaluation context
//! - **evaluation**: Decision thresholds and the optional leniency policy
//!
//! # Path Expansion
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Canonicalizes the workspace path
//! - Creates the workspace directory if it doesn't exist
//!
//! # Examples
//!
//! ```no_run
//! use duel_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Workspace: {:?}", config.core.workspace);
//! println!("Max iterations: {}", config.agent.max_iterations);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// LLM provider configuration
    pub llm: LLMConfig,

    /// Conversation loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Content cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Context size budget
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Comparative evaluation settings
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Workspace directory path (supports ~ expansion)
    pub workspace: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Default LLM provider (ollama, openai)
    pub default_provider: String,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// OpenAI-compatible provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// OpenAI provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for OpenAI API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_openai_model")]
    pub model: String,
    // Note: API key read from OPENAI_API_KEY, not from config
}

/// Conversation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on model invocations per session
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// History length above which compaction runs
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Number of most recent entries kept by compaction
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,

    /// Maximum tool calls executed at once within one model turn
    #[serde(default = "default_tool_concurrency")]
    pub tool_concurrency: usize,

    /// Timeout for a single model call in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            history_cap: default_history_cap(),
            keep_recent: default_keep_recent(),
            tool_concurrency: default_tool_concurrency(),
            llm_timeout_secs: default_llm_timeout_secs(),
        }
    }
}

/// Backoff policy for transient failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Cap for exponential backoff
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier each retry)
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

/// Content cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Days before an unreferenced entry becomes eligible for eviction
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,

    /// Text served in place of content that could not be fetched
    #[serde(default = "default_placeholder_text")]
    pub placeholder_text: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_ttl_days(),
            placeholder_text: default_placeholder_text(),
        }
    }
}

/// Context size budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: usize,

    #[serde(default = "default_max_items")]
    pub max_items: usize,

    #[serde(default = "default_max_token_estimate")]
    pub max_token_estimate: usize,

    /// Items larger than this are truncated before admission
    #[serde(default = "default_max_item_bytes")]
    pub max_item_bytes: usize,

    /// Fraction of any limit past which reservations are denied (0.0-1.0)
    #[serde(default = "default_critical_ratio")]
    pub critical_ratio: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_total_bytes: default_max_total_bytes(),
            max_items: default_max_items(),
            max_token_estimate: default_max_token_estimate(),
            max_item_bytes: default_max_item_bytes(),
            critical_ratio: default_critical_ratio(),
        }
    }
}

/// Comparative evaluation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Variant score at or above which the decision is MERGE
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f64,

    /// Variant score at or above which the decision is SUGGEST
    #[serde(default = "default_suggest_threshold")]
    pub suggest_threshold: f64,

    /// Optional threshold relaxation for repeated SUGGEST cycles.
    /// Absent means no relaxation.
    #[serde(default)]
    pub leniency: Option<LeniencyConfig>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            merge_threshold: default_merge_threshold(),
            suggest_threshold: default_suggest_threshold(),
            leniency: None,
        }
    }
}

/// Threshold relaxation per prior SUGGEST cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeniencyConfig {
    /// Points subtracted from both thresholds per prior cycle
    pub per_cycle: f64,

    /// Upper bound on the total relaxation
    pub max_adjustment: f64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_iterations() -> usize {
    20
}

fn default_history_cap() -> usize {
    24
}

fn default_keep_recent() -> usize {
    16
}

fn default_tool_concurrency() -> usize {
    4
}

fn default_llm_timeout_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_ttl_days() -> u32 {
    14
}

fn default_placeholder_text() -> String {
    "You are a helpful assistant. Follow the user's instructions carefully.".to_string()
}

fn default_max_total_bytes() -> usize {
    512 * 1024
}

fn default_max_items() -> usize {
    64
}

fn default_max_token_estimate() -> usize {
    128_000
}

fn default_max_item_bytes() -> usize {
    64 * 1024
}

fn default_critical_ratio() -> f64 {
    0.9
}

fn default_merge_threshold() -> f64 {
    8.5
}

fn default_suggest_threshold() -> f64 {
    6.0
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.duel/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails (invalid paths, out-of-range values)
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();
        config.validate_and_process()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.duel/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".duel").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                workspace: PathBuf::from("."),
                log_level: default_log_level(),
            },
            llm: LLMConfig {
                default_provider: "ollama".to_string(),
                ollama: OllamaConfig::default(),
                openai: OpenAIConfig::default(),
            },
            agent: AgentConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            budget: BudgetConfig::default(),
            evaluation: EvaluationConfig::default(),
        }
    }

    /// Validate values that do not touch the filesystem
    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["ollama", "openai"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        if self.agent.max_iterations == 0 {
            return Err(EngineError::Config(
                "agent.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.agent.keep_recent == 0 || self.agent.keep_recent >= self.agent.history_cap {
            return Err(EngineError::Config(
                "agent.keep_recent must be between 1 and agent.history_cap - 1".to_string(),
            ));
        }
        if self.agent.tool_concurrency == 0 {
            return Err(EngineError::Config(
                "agent.tool_concurrency must be at least 1".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(EngineError::Config(
                "retry.multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.budget.critical_ratio <= 0.0 || self.budget.critical_ratio > 1.0 {
            return Err(EngineError::Config(
                "budget.critical_ratio must be in (0.0, 1.0]".to_string(),
            ));
        }

        let eval = &self.evaluation;
        if !(0.0..=10.0).contains(&eval.suggest_threshold)
            || !(0.0..=10.0).contains(&eval.merge_threshold)
            || eval.suggest_threshold > eval.merge_threshold
        {
            return Err(EngineError::Config(
                "evaluation thresholds must satisfy 0 <= suggest <= merge <= 10".to_string(),
            ));
        }
        if let Some(leniency) = &eval.leniency {
            if leniency.per_cycle < 0.0 || leniency.max_adjustment < 0.0 {
                return Err(EngineError::Config(
                    "evaluation.leniency values must not be negative".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates field ranges
    /// - Expands ~ in the workspace path
    /// - Canonicalizes the workspace, creating it if needed
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        self.validate()?;

        self.core.workspace = expand_path(&self.core.workspace)?;
        self.core.workspace = canonicalize_or_create(&self.core.workspace)?;

        if !self.core.workspace.is_dir() {
            return Err(EngineError::Config(format!(
                "Workspace path is not a directory: {:?}",
                self.core.workspace
            )));
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Canonicalize path, creating it if it doesn't exist
fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }

    path.canonicalize()
        .map_err(|e| EngineError::Config(format!("Failed to resolve {:?}: {}", path, e)))
}
