//! # Sandbox Agent
//!
//! A command-line coding agent whose tools are confined to one working directory.
//!
//! This library provides:
//! - A sandbox path resolver that keeps every tool path inside the working root
//! - Four tools: list a directory, read a file, write a file, run a Python script
//! - A dispatcher that turns every tool outcome into a result the model can read
//! - A bounded conversation loop against the Gemini API
//!
//! ## Architecture
//!
//! The agent follows the "tools in a loop" pattern:
//! 1. Start the conversation with the user's prompt
//! 2. Call the model with the history and the tool declarations
//! 3. Dispatch any tool calls and append their results to the history
//! 4. Repeat until the model answers or the iteration ceiling is reached
//!
//! ## Example
//!
//! ```rust,ignore
//! use sandbox_agent::{agent::Agent, config::Config};
//!
//! let config = Config::from_env()?;
//! let agent = Agent::from_config(config)?;
//! let outcome = agent.run_task("Run the tests in tests.py").await?;
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod sandbox;
pub mod tools;

pub use config::Config;
