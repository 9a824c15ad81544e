//! Error types and handling
//!
//! This module provides the error types used throughout the Duel engine.
//! Every error carries an [`ErrorClass`] that decides how the engine reacts
//! to it: transient failures are retried with backoff, validation failures
//! are handed back to the model so it can correct itself, permanent failures
//! are reported inline without retrying, and fatal failures end the session.
//!
//! All errors also implement the `DuelErrorExt` trait which provides
//! user-friendly hints and indicates whether errors are recoverable.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How the engine should react to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network timeout, connection reset, upstream rate limit, 5xx.
    /// Retried with exponential backoff.
    Transient,

    /// Malformed or unknown arguments, unknown tool name.
    /// Returned to the model immediately, never retried.
    Validation,

    /// The operation failed for a reason retrying will not fix
    /// (missing file, 4xx response). Reported inline, never retried.
    Permanent,

    /// Authentication failure, workspace not initialized.
    /// Terminates the session.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Validation => write!(f, "validation"),
            ErrorClass::Permanent => write!(f, "permanent"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// Trait for Duel error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints, recoverability and the retry classification.
pub trait DuelErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to post back into an issue or PR comment and does not
    /// contain secrets or internal paths.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    fn is_recoverable(&self) -> bool;

    /// Returns the retry classification of the error
    fn class(&self) -> ErrorClass;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **LLM Provider**: API failures, authentication errors
/// - **Network**: Timeouts, resets, rate limits, upstream status codes
/// - **Tool**: Unknown tools, malformed arguments, handler failures
/// - **File System**: Workspace confinement and access errors
/// - **Evaluation**: Judge output that cannot be read
///
/// # Examples
///
/// ```
/// use sdk::errors::{DuelErrorExt, EngineError, ErrorClass};
///
/// let error = EngineError::ToolNotFound("frobnicate".to_string());
/// assert_eq!(error.class(), ErrorClass::Validation);
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::AuthenticationFailed("bad token".to_string());
/// assert_eq!(fatal_error.class(), ErrorClass::Fatal);
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Workspace not initialized: {0:?}")]
    WorkspaceNotInitialized(std::path::PathBuf),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool error: {0}")]
    ToolError(String),

    // File system errors
    #[error("Path outside workspace: {0:?}")]
    PathOutsideWorkspace(std::path::PathBuf),

    #[error("Access denied to sensitive path: {0:?}")]
    PathDenied(std::path::PathBuf),

    #[error("Not found: {0}")]
    NotFound(String),

    // Evaluation errors
    #[error("Judge output could not be parsed: {0}")]
    JudgeUnparsable(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Build an error from an HTTP status code, picking the variant that
    /// carries the right classification.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::AuthenticationFailed(message),
            404 => Self::NotFound(message),
            408 => Self::Timeout(message),
            429 => Self::RateLimited(message),
            _ => Self::Upstream { status, message },
        }
    }
}

impl DuelErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::LLMProvider(_) => "LLM provider unavailable. Check your API keys and network",
            Self::AuthenticationFailed(_) => "Credentials were rejected. Check the configured token",
            Self::WorkspaceNotInitialized(_) => "Workspace is missing. Check out the repository first",

            Self::Network(_) => "Network operation failed. Check your connection",
            Self::Timeout(_) => "The remote side took too long to respond. Try again",
            Self::RateLimited(_) => "Rate limit exceeded. Please wait before trying again",
            Self::Upstream { .. } => "The remote service returned an error",

            Self::ToolNotFound(_) => "The requested tool is not available",
            Self::InvalidArguments { .. } => "Tool arguments did not match the declared schema",
            Self::ToolError(_) => "Tool operation failed",

            Self::PathOutsideWorkspace(_) => "Operation must be within workspace",
            Self::PathDenied(_) => "This path is on the deny list and cannot be accessed",
            Self::NotFound(_) => "The requested resource does not exist",

            Self::JudgeUnparsable(_) => "The judge did not return a decision block",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        self.class() != ErrorClass::Fatal
    }

    fn class(&self) -> ErrorClass {
        match self {
            Self::AuthenticationFailed(_) | Self::WorkspaceNotInitialized(_) => ErrorClass::Fatal,

            Self::Network(_) | Self::Timeout(_) | Self::RateLimited(_) => ErrorClass::Transient,
            Self::Upstream { status, .. } if *status >= 500 => ErrorClass::Transient,

            Self::ToolNotFound(_)
            | Self::InvalidArguments { .. }
            | Self::PathOutsideWorkspace(_)
            | Self::PathDenied(_) => ErrorClass::Validation,

            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::WouldBlock => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },

            Self::Config(_)
            | Self::LLMProvider(_)
            | Self::Upstream { .. }
            | Self::ToolError(_)
            | Self::NotFound(_)
            | Self::JudgeUnparsable(_) => ErrorClass::Permanent,
        }
    }
}
