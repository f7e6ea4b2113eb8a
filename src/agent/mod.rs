//! Agent module - the conversation loop.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Start the history with the user's prompt
//! 2. Call the model with the history and the tool declarations
//! 3. If the model requests tool calls, dispatch each one and append its result
//! 4. Repeat until the model answers without tool calls or the iteration ceiling is reached

mod agent_loop;
mod prompt;

pub use agent_loop::{Agent, AgentError, AgentOutcome, StopReason};
pub use prompt::build_system_prompt;
