//! Tools the model can call, and the dispatcher that runs them.
//!
//! Every tool is confined to a [`WorkingRoot`]. Tools report failures as [`ToolError`],
//! whose `Display` text is exactly what the model gets to read. The [`ToolRegistry`]
//! turns every outcome, including panics and unknown tool names, into a [`ToolResult`]
//! so nothing a tool does can abort the conversation loop.

mod fs;
mod script;

pub use fs::{ListDirectory, ReadFile, WriteFile, MAX_CHARS};
pub use script::{RunScript, DEFAULT_INTERPRETER, DEFAULT_TIMEOUT, SCRIPT_EXTENSION};

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use crate::llm::{ToolCall, ToolSchema};
use crate::sandbox::{SandboxViolation, WorkingRoot};

/// Failure of a single tool invocation.
///
/// The messages are part of the conversation contract: the model reads them and adapts.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Error: Cannot {action} \"{}\" as it is outside the permitted working directory", .violation.path)]
    SandboxViolation {
        action: &'static str,
        #[source]
        violation: SandboxViolation,
    },

    #[error("Error: File not found or is not a regular file: \"{0}\"")]
    FileNotFound(String),

    #[error("Error: File \"{0}\" not found")]
    ScriptNotFound(String),

    #[error("Error: \"{0}\" is not a directory")]
    NotADirectory(String),

    #[error("Error: \"{0}\" is not a Python file")]
    WrongType(String),

    #[error("Error reading file: {0}")]
    ReadFailure(#[source] std::io::Error),

    #[error("Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error executing file: timed out after {0} seconds")]
    ExecutionTimeout(u64),

    #[error("Error executing file: {0}")]
    ExecutionFailure(String),

    #[error("Error: Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Unknown function: {0}")]
    UnknownTool(String),

    #[error("Error: Tool {tool} panicked: {message}")]
    Panicked { tool: String, message: String },

    /// Message supplied verbatim by a tool outside the built-in set.
    #[error("{0}")]
    Custom(String),
}

impl ToolError {
    /// Wrap a sandbox violation with the verb the calling tool reports it under.
    pub fn outside(action: &'static str, violation: SandboxViolation) -> Self {
        Self::SandboxViolation { action, violation }
    }
}

/// Outcome of exactly one tool invocation, always returned as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResult {
    Ok(String),
    Error(String),
}

impl ToolResult {
    pub fn text(&self) -> &str {
        match self {
            ToolResult::Ok(text) | ToolResult::Error(text) => text,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error(_))
    }

    /// An error that carries no description at all. The loop treats this as a broken
    /// tool rather than something worth showing the model.
    pub fn is_undescribed_error(&self) -> bool {
        matches!(self, ToolResult::Error(text) if text.trim().is_empty())
    }

    /// The `functionResponse.response` payload sent back to the model.
    pub fn to_response_payload(&self) -> Value {
        match self {
            ToolResult::Ok(text) => json!({ "result": text }),
            ToolResult::Error(text) => json!({ "error": text }),
        }
    }
}

impl From<Result<String, ToolError>> for ToolResult {
    fn from(result: Result<String, ToolError>) -> Self {
        match result {
            Ok(output) => ToolResult::Ok(output),
            Err(e) => ToolResult::Error(e.to_string()),
        }
    }
}

/// A tool the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON schema of the tool's arguments.
    fn parameters_schema(&self) -> Value;

    /// Run the tool with the model-supplied arguments, confined to `root`.
    async fn execute(&self, args: Value, root: &WorkingRoot) -> Result<String, ToolError>;
}

/// Name and description of a registered tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Deserialize model-supplied arguments into a tool's typed argument struct.
pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

/// Registry of available tools bound to one working root.
pub struct ToolRegistry {
    root: WorkingRoot,
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Registry with the four built-in tools and the default script runner.
    pub fn new(root: WorkingRoot) -> Self {
        Self::with_script_runner(root, RunScript::default())
    }

    /// Registry with the four built-in tools and a custom script runner.
    pub fn with_script_runner(root: WorkingRoot, runner: RunScript) -> Self {
        let mut registry = Self::empty(root);
        registry.register(Arc::new(ListDirectory));
        registry.register(Arc::new(ReadFile));
        registry.register(Arc::new(WriteFile));
        registry.register(Arc::new(runner));
        registry
    }

    /// Registry with no tools.
    pub fn empty(root: WorkingRoot) -> Self {
        Self {
            root,
            tools: Vec::new(),
        }
    }

    /// Add a tool, replacing any tool already registered under the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn root(&self) -> &WorkingRoot {
        &self.root
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// List registered tools in registration order.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    /// Declarations handed to the model.
    pub fn get_tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Run one tool call and wrap whatever happens in a [`ToolResult`].
    ///
    /// Never fails: unknown names, bad arguments, tool errors and panics all come back
    /// as [`ToolResult::Error`].
    pub async fn dispatch(&self, call: &ToolCall, verbose: bool) -> ToolResult {
        if verbose {
            let args = serde_json::to_string(&call.arguments).unwrap_or_default();
            tracing::info!("Calling function: {}({})", call.name, args);
        } else {
            tracing::info!(" - Calling function: {}", call.name);
        }

        let Some(tool) = self.get(&call.name) else {
            tracing::warn!(tool = %call.name, "Model requested an unknown tool");
            return ToolResult::Error(ToolError::UnknownTool(call.name.clone()).to_string());
        };

        let args = Value::Object(call.arguments.clone());
        let outcome = AssertUnwindSafe(tool.execute(args, &self.root))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(result) => ToolResult::from(result),
            Err(panic) => ToolResult::Error(
                ToolError::Panicked {
                    tool: call.name.clone(),
                    message: panic_message(panic.as_ref()),
                }
                .to_string(),
            ),
        };

        if result.is_error() {
            tracing::warn!(tool = %call.name, "Tool returned error: {}", result.text());
        }
        result
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
