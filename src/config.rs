//! Configuration management for the sandbox agent.
//!
//! Configuration can be set via environment variables (a local `.env` file is loaded first):
//! - `GEMINI_API_KEY` - Required. API key for the Gemini API.
//! - `GEMINI_MODEL` - Optional. Model identifier. Defaults to `gemini-2.0-flash-001`.
//! - `GEMINI_BASE_URL` - Optional. API base URL.
//! - `WORKSPACE_PATH` - Optional. The working root all tools are confined to. Defaults to current directory.
//! - `MAX_ITERATIONS` - Optional. Maximum model calls per run. Defaults to `20`.
//! - `SCRIPT_INTERPRETER` - Optional. Interpreter for `run_python_file`. Defaults to `python3`.
//! - `SCRIPT_TIMEOUT_SECS` - Optional. Script wall-clock limit. Defaults to `30`.
//! - `AGENT_VERBOSE` - Optional. Boolean-like; enables verbose output. Defaults to `false`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::llm::DEFAULT_BASE_URL;
use crate::tools::{DEFAULT_INTERPRETER, DEFAULT_TIMEOUT};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-001";
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Base URL of the model service
    pub api_base_url: String,

    /// Working root for all tool operations
    pub workspace_path: PathBuf,

    /// Maximum model calls per run
    pub max_iterations: usize,

    /// Interpreter used to run scripts
    pub script_interpreter: String,

    /// Wall-clock limit for a script run, in seconds
    pub script_timeout_secs: u64,

    /// Log full tool arguments and print token usage
    pub verbose: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `GEMINI_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("GEMINI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("GEMINI_API_KEY".to_string()))?;

        let model = lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let api_base_url =
            lookup("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let workspace_path = lookup("WORKSPACE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let max_iterations = parse_number("MAX_ITERATIONS", lookup("MAX_ITERATIONS"))?
            .unwrap_or(DEFAULT_MAX_ITERATIONS);
        if max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ITERATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let script_interpreter =
            lookup("SCRIPT_INTERPRETER").unwrap_or_else(|| DEFAULT_INTERPRETER.to_string());

        let script_timeout_secs = parse_number("SCRIPT_TIMEOUT_SECS", lookup("SCRIPT_TIMEOUT_SECS"))?
            .unwrap_or(DEFAULT_TIMEOUT.as_secs());
        if script_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "SCRIPT_TIMEOUT_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let verbose = lookup("AGENT_VERBOSE")
            .map(|v| {
                parse_bool(&v).map_err(|e| ConfigError::InvalidValue("AGENT_VERBOSE".to_string(), e))
            })
            .transpose()?
            .unwrap_or(false);

        Ok(Self {
            api_key,
            model,
            api_base_url,
            workspace_path,
            max_iterations,
            script_interpreter,
            script_timeout_secs,
            verbose,
        })
    }

    /// Create a config with default values (useful for testing).
    pub fn new(api_key: String, workspace_path: PathBuf) -> Self {
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            api_base_url: DEFAULT_BASE_URL.to_string(),
            workspace_path,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            script_interpreter: DEFAULT_INTERPRETER.to_string(),
            script_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            verbose: false,
        }
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }
}

fn parse_number<T>(key: &str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e)))
        })
        .transpose()
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}
