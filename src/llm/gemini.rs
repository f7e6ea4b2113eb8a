//! Gemini `generateContent` client with function calling.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmError, Role, TokenUsage, ToolCall,
    ToolSchema,
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Client for Google's Gemini API.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat_completion(&self, request: ChatRequest<'_>) -> Result<ChatResponse, LlmError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            request.model
        );
        let body = build_request(&request);

        tracing::debug!(
            model = request.model,
            messages = request.messages.len(),
            "Sending generateContent request"
        );

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: api_error_message(&body),
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        parse_response(parsed)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations<'a> {
    function_declarations: &'a [ToolSchema],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

fn build_request<'a>(request: &ChatRequest<'a>) -> GenerateContentRequest<'a> {
    let system_instruction = request.system_instruction.map(|text| Content {
        role: None,
        parts: vec![Part {
            text: Some(text.to_string()),
            ..Default::default()
        }],
    });

    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![ToolDeclarations {
            function_declarations: request.tools,
        }]
    };

    GenerateContentRequest {
        system_instruction,
        contents: to_contents(request.messages),
        tools,
    }
}

/// Convert history to Gemini contents.
///
/// Consecutive tool messages are merged into one `user` content so every batch of
/// function calls is answered by a single content with one response part per call.
fn to_contents(messages: &[ChatMessage]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::new();

    for msg in messages {
        match msg.role {
            Role::User => contents.push(Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(msg.content.clone().unwrap_or_default()),
                    ..Default::default()
                }],
            }),
            Role::Model => {
                let mut parts = Vec::new();
                if let Some(text) = msg.content.as_ref().filter(|t| !t.is_empty()) {
                    parts.push(Part {
                        text: Some(text.clone()),
                        ..Default::default()
                    });
                }
                for call in &msg.tool_calls {
                    parts.push(Part {
                        function_call: Some(FunctionCall {
                            name: call.name.clone(),
                            args: call.arguments.clone(),
                        }),
                        ..Default::default()
                    });
                }
                contents.push(Content {
                    role: Some("model".to_string()),
                    parts,
                });
            }
            Role::Tool => {
                let Some(response) = &msg.tool_response else {
                    continue;
                };
                let part = Part {
                    function_response: Some(FunctionResponse {
                        name: response.name.clone(),
                        response: response.result.to_response_payload(),
                    }),
                    ..Default::default()
                };
                match contents.last_mut() {
                    Some(last)
                        if last.parts.iter().all(|p| p.function_response.is_some())
                            && last.role.as_deref() == Some("user") =>
                    {
                        last.parts.push(part);
                    }
                    _ => contents.push(Content {
                        role: Some("user".to_string()),
                        parts: vec![part],
                    }),
                }
            }
        }
    }

    contents
}

fn parse_response(response: GenerateContentResponse) -> Result<ChatResponse, LlmError> {
    let usage = response.usage_metadata.map(|u| TokenUsage {
        prompt_tokens: u.prompt_token_count,
        response_tokens: u.candidates_token_count,
    });

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(LlmError::EmptyResponse)?;

    tracing::debug!(finish_reason = ?candidate.finish_reason, "Received model response");

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in candidate.content.unwrap_or_default().parts {
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if let Some(call) = part.function_call {
            tool_calls.push(ToolCall {
                name: call.name,
                arguments: call.args,
            });
        }
    }

    Ok(ChatResponse {
        content: (!text.is_empty()).then_some(text),
        tool_calls,
        usage,
    })
}

/// Pull `error.message` out of a Gemini error body, falling back to the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}
