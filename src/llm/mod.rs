//! Remote model collaborator: conversation types and the client trait.

mod gemini;

pub use gemini::{GeminiClient, DEFAULT_BASE_URL};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::tools::ToolResult;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// The result of a tool call, addressed to the tool that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub name: String,
    pub result: ToolResult,
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_response: Option<ToolResponse>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_response: None,
        }
    }

    pub fn model(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Model,
            content,
            tool_calls,
            tool_response: None,
        }
    }

    pub fn tool(name: impl Into<String>, result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: None,
            tool_calls: Vec::new(),
            tool_response: Some(ToolResponse {
                name: name.into(),
                result,
            }),
        }
    }
}

/// Declaration of a callable tool, as sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Token counts reported for one model response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub response_tokens: u32,
}

/// Everything the model needs for one turn.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub system_instruction: Option<&'a str>,
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolSchema],
}

/// The model's reply: final text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to model service failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("model service returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("could not decode model response: {0}")]
    Decode(String),

    #[error("model service returned no candidates")]
    EmptyResponse,
}

/// A chat-completion service that supports tool calling.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_completion(&self, request: ChatRequest<'_>) -> Result<ChatResponse, LlmError>;
}
