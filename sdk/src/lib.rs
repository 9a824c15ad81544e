//! Duel SDK
//!
//! Shared library providing the error taxonomy and tool schema types used by
//! the engine and by externally registered tool handlers.

/// Error types and handling
pub mod errors;

/// Tool schema, input and output types
pub mod types;

// Re-export commonly used types
pub use errors::{DuelErrorExt, EngineError, ErrorClass};
pub use types::{ParamSpec, ParamType, ToolError, ToolInput, ToolOutput, ToolSchema};
