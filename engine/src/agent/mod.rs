//! Agent conversation loop
//!
//! The orchestrator runs a bounded think-act-observe loop: the model either
//! answers or requests tools, the dispatcher runs the tools, and the results
//! go back to the model until it answers or the iteration cap is reached.

pub mod history;
pub mod orchestrator;

pub use history::History;
pub use orchestrator::{ConversationOrchestrator, ConversationState, ConversationStatus, RunOutcome};
