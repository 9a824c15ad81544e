//! Parsed command handed in by the comment bot
//!
//! Comment syntax is parsed upstream; the engine only sees this value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the command asks the engine to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMode {
    /// Run the expert conversation on the instruction
    #[default]
    Run,
    /// Compare a candidate prompt against the baseline
    Evaluate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Expert identifier, e.g. "reviewer" or "docs-writer"
    pub expert: String,

    /// Free-form instruction text from the comment
    pub instruction: String,

    /// Extra `key=value` options from the comment
    #[serde(default)]
    pub options: BTreeMap<String, String>,

    #[serde(default)]
    pub mode: CommandMode,

    /// Workspace paths or URLs to load as context for the first message
    #[serde(default)]
    pub context_paths: Vec<String>,
}

impl Command {
    pub fn new(expert: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            expert: expert.into(),
            instruction: instruction.into(),
            options: BTreeMap::new(),
            mode: CommandMode::Run,
            context_paths: Vec::new(),
        }
    }

    pub fn with_context(mut self, path: impl Into<String>) -> Self {
        self.context_paths.push(path.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json_uses_defaults() {
        let command: Command =
            serde_json::from_str(r#"{"expert": "reviewer", "instruction": "Check the intro"}"#)
                .unwrap();
        assert_eq!(command.mode, CommandMode::Run);
        assert!(command.context_paths.is_empty());
        assert!(command.options.is_empty());
    }

    #[test]
    fn test_builder() {
        let command = Command::new("reviewer", "Tighten wording")
            .with_context("prompts/reviewer.md")
            .with_option("tone", "strict");
        assert_eq!(command.context_paths, vec!["prompts/reviewer.md"]);
        assert_eq!(command.options.get("tone").map(String::as_str), Some("strict"));
    }
}
