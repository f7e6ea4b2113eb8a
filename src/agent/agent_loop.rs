//! Core agent loop implementation.

use std::sync::Arc;

use thiserror::Error;

use crate::config::Config;
use crate::llm::{ChatMessage, ChatRequest, GeminiClient, LlmClient, LlmError, TokenUsage};
use crate::sandbox::WorkingRoot;
use crate::tools::{RunScript, ToolRegistry};

use super::prompt::build_system_prompt;

/// Fatal failures of a run. Tool failures are not among them: those go back to the model.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Invalid tool response from {tool}: the tool failed without a message")]
    InvalidToolResponse { tool: String },
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model answered without requesting tools.
    Completed,
    /// The model was still requesting tools when the iteration ceiling was reached.
    IterationLimit,
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Text of the last model response, if it had any.
    pub final_text: Option<String>,
    /// Token usage reported with the last model response.
    pub usage: Option<TokenUsage>,
    /// Number of model calls made.
    pub iterations: usize,
    pub stop_reason: StopReason,
    pub history: Vec<ChatMessage>,
}

/// The autonomous agent.
pub struct Agent {
    config: Config,
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
}

impl Agent {
    /// Create an agent from explicit collaborators.
    pub fn new(config: Config, llm: Arc<dyn LlmClient>, tools: ToolRegistry) -> Self {
        Self { config, llm, tools }
    }

    /// Create an agent talking to Gemini with the built-in tools, rooted at
    /// `config.workspace_path`.
    pub fn from_config(config: Config) -> std::io::Result<Self> {
        let root = WorkingRoot::new(&config.workspace_path)?;
        let runner = RunScript::new(config.script_interpreter.clone(), config.script_timeout());
        let tools = ToolRegistry::with_script_runner(root, runner);
        let llm = Arc::new(GeminiClient::with_base_url(
            config.api_key.clone(),
            config.api_base_url.clone(),
        ));

        Ok(Self::new(config, llm, tools))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run a prompt to completion.
    ///
    /// Every tool call the model requests in a turn is dispatched in order and its result
    /// appended before the next model call. Model failures abort the run unretried.
    pub async fn run_task(&self, prompt: &str) -> Result<AgentOutcome, AgentError> {
        let system_prompt = build_system_prompt(&self.tools);
        let tool_schemas = self.tools.get_tool_schemas();
        let mut history = vec![ChatMessage::user(prompt)];
        let mut iteration = 0;

        loop {
            iteration += 1;
            tracing::debug!("Agent iteration {}", iteration);

            let response = self
                .llm
                .chat_completion(ChatRequest {
                    model: &self.config.model,
                    system_instruction: Some(system_prompt.as_str()),
                    messages: &history,
                    tools: &tool_schemas,
                })
                .await?;

            history.push(ChatMessage::model(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            let stop_reason = if response.tool_calls.is_empty() {
                Some(StopReason::Completed)
            } else if iteration >= self.config.max_iterations {
                tracing::warn!(
                    "Max iterations ({}) reached with {} tool call(s) pending",
                    self.config.max_iterations,
                    response.tool_calls.len()
                );
                Some(StopReason::IterationLimit)
            } else {
                None
            };

            if let Some(stop_reason) = stop_reason {
                return Ok(AgentOutcome {
                    final_text: response.content,
                    usage: response.usage,
                    iterations: iteration,
                    stop_reason,
                    history,
                });
            }

            for tool_call in &response.tool_calls {
                let result = self.tools.dispatch(tool_call, self.config.verbose).await;

                if result.is_undescribed_error() {
                    return Err(AgentError::InvalidToolResponse {
                        tool: tool_call.name.clone(),
                    });
                }

                tracing::debug!(
                    tool = %tool_call.name,
                    "Tool result: {}",
                    truncate_for_log(result.text(), 1000)
                );

                history.push(ChatMessage::tool(&tool_call.name, result));
            }
        }
    }
}

/// Truncate a string for logging purposes.
fn truncate_for_log(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((idx, _)) => format!("{}... [truncated]", &s[..idx]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, Role, ToolCall};
    use crate::sandbox::WorkingRoot;
    use crate::tools::{Tool, ToolError, ToolResult};
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays canned responses and records how long the history was on each call.
    struct ScriptedLlm {
        responses: Mutex<VecDeque<ChatResponse>>,
        repeat: Option<ChatResponse>,
        seen_history_lens: Mutex<Vec<usize>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                repeat: None,
                seen_history_lens: Mutex::new(Vec::new()),
            }
        }

        fn always(response: ChatResponse) -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                repeat: Some(response),
                seen_history_lens: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<usize> {
            self.seen_history_lens.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat_completion(
            &self,
            request: ChatRequest<'_>,
        ) -> Result<ChatResponse, LlmError> {
            self.seen_history_lens
                .lock()
                .unwrap()
                .push(request.messages.len());
            if let Some(next) = self.responses.lock().unwrap().pop_front() {
                return Ok(next);
            }
            self.repeat.clone().ok_or(LlmError::EmptyResponse)
        }
    }

    struct Silent;

    #[async_trait]
    impl Tool for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        fn description(&self) -> &str {
            "Fails without saying why."
        }

        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, _args: Value, _root: &WorkingRoot) -> Result<String, ToolError> {
            Err(ToolError::Custom(String::new()))
        }
    }

    fn tool_call(name: &str, args: Value) -> ToolCall {
        let arguments = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ToolCall {
            name: name.to_string(),
            arguments,
        }
    }

    fn calls(calls: Vec<ToolCall>) -> ChatResponse {
        ChatResponse {
            content: None,
            tool_calls: calls,
            usage: Some(TokenUsage {
                prompt_tokens: 10,
                response_tokens: 2,
            }),
        }
    }

    fn answer(text: &str) -> ChatResponse {
        ChatResponse {
            content: Some(text.to_string()),
            tool_calls: Vec::new(),
            usage: Some(TokenUsage {
                prompt_tokens: 42,
                response_tokens: 7,
            }),
        }
    }

    fn agent(llm: Arc<ScriptedLlm>, max_iterations: usize) -> (TempDir, Agent) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new("test-key".to_string(), dir.path().to_path_buf());
        config.max_iterations = max_iterations;
        let root = WorkingRoot::new(dir.path()).unwrap();
        let tools = ToolRegistry::new(root);
        (dir, Agent::new(config, llm, tools))
    }

    #[tokio::test]
    async fn list_files_completes_on_second_iteration() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            calls(vec![tool_call("get_files_info", json!({ "directory": "." }))]),
            answer("There is one file: main.py"),
        ]));
        let (dir, agent) = agent(llm.clone(), 20);
        std::fs::write(dir.path().join("main.py"), "print(1)").unwrap();

        let outcome = agent.run_task("list files").await.unwrap();

        assert_eq!(outcome.stop_reason, StopReason::Completed);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(
            outcome.final_text.as_deref(),
            Some("There is one file: main.py")
        );
        assert_eq!(
            outcome.usage,
            Some(TokenUsage {
                prompt_tokens: 42,
                response_tokens: 7
            })
        );

        let roles: Vec<_> = outcome.history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::Tool, Role::Model]);
        let response = outcome.history[2].tool_response.as_ref().unwrap();
        assert_eq!(response.name, "get_files_info");
        assert_eq!(
            response.result,
            ToolResult::Ok("- main.py: file_size=8 bytes, is_dir=false".to_string())
        );

        // The tool result was in the history before the second model call.
        assert_eq!(llm.calls(), vec![1, 3]);
    }

    #[tokio::test]
    async fn every_tool_call_gets_one_result_in_order() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            calls(vec![
                tool_call(
                    "write_file",
                    json!({ "file_path": "pkg/a.txt", "content": "alpha" }),
                ),
                tool_call("get_file_content", json!({ "file_path": "pkg/a.txt" })),
                tool_call("delete_everything", json!({})),
            ]),
            answer("done"),
        ]));
        let (_dir, agent) = agent(llm.clone(), 20);

        let outcome = agent.run_task("write then read").await.unwrap();

        let results: Vec<_> = outcome
            .history
            .iter()
            .filter_map(|m| m.tool_response.as_ref())
            .map(|r| (r.name.as_str(), r.result.clone()))
            .collect();
        assert_eq!(
            results,
            vec![
                (
                    "write_file",
                    ToolResult::Ok(
                        "Successfully wrote to \"pkg/a.txt\" (5 characters written)".to_string()
                    )
                ),
                ("get_file_content", ToolResult::Ok("alpha".to_string())),
                (
                    "delete_everything",
                    ToolResult::Error("Unknown function: delete_everything".to_string())
                ),
            ]
        );
        assert_eq!(llm.calls(), vec![1, 5]);
    }

    #[tokio::test]
    async fn stops_at_iteration_ceiling() {
        let llm = Arc::new(ScriptedLlm::always(calls(vec![tool_call(
            "get_files_info",
            json!({}),
        )])));
        let (_dir, agent) = agent(llm.clone(), 3);

        let outcome = agent.run_task("loop forever").await.unwrap();

        assert_eq!(outcome.stop_reason, StopReason::IterationLimit);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.final_text, None);
        assert_eq!(llm.calls().len(), 3);
        // user + 3 model turns + 2 answered tool batches
        assert_eq!(outcome.history.len(), 6);
    }

    #[tokio::test]
    async fn default_ceiling_is_twenty() {
        let llm = Arc::new(ScriptedLlm::always(calls(vec![tool_call(
            "get_files_info",
            json!({}),
        )])));
        let (_dir, agent) = agent(llm.clone(), crate::config::DEFAULT_MAX_ITERATIONS);

        let outcome = agent.run_task("loop forever").await.unwrap();

        assert_eq!(outcome.iterations, 20);
        assert_eq!(llm.calls().len(), 20);
    }

    #[tokio::test]
    async fn immediate_answer_makes_one_call() {
        let llm = Arc::new(ScriptedLlm::new(vec![answer("4")]));
        let (_dir, agent) = agent(llm.clone(), 20);

        let outcome = agent.run_task("what is 2 + 2?").await.unwrap();

        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.final_text.as_deref(), Some("4"));
        assert_eq!(outcome.history.len(), 2);
    }

    #[tokio::test]
    async fn model_failure_aborts_the_run() {
        let llm = Arc::new(ScriptedLlm::new(vec![calls(vec![tool_call(
            "get_files_info",
            json!({}),
        )])]));
        let (_dir, agent) = agent(llm.clone(), 20);

        let err = agent.run_task("list files").await.unwrap_err();

        assert!(matches!(err, AgentError::Llm(LlmError::EmptyResponse)));
        assert_eq!(llm.calls().len(), 2);
    }

    #[tokio::test]
    async fn blank_tool_error_is_fatal() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            calls(vec![tool_call("silent", json!({}))]),
            answer("unreachable"),
        ]));
        let dir = TempDir::new().unwrap();
        let config = Config::new("test-key".to_string(), dir.path().to_path_buf());
        let mut tools = ToolRegistry::new(WorkingRoot::new(dir.path()).unwrap());
        tools.register(Arc::new(Silent));
        let agent = Agent::new(config, llm.clone(), tools);

        let err = agent.run_task("be quiet").await.unwrap_err();

        assert!(matches!(err, AgentError::InvalidToolResponse { ref tool } if tool == "silent"));
        assert_eq!(llm.calls().len(), 1);
    }

    #[tokio::test]
    async fn empty_success_is_passed_through() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            calls(vec![tool_call("get_files_info", json!({}))]),
            answer("The directory is empty."),
        ]));
        let (_dir, agent) = agent(llm, 20);

        let outcome = agent.run_task("list files").await.unwrap();

        assert_eq!(outcome.stop_reason, StopReason::Completed);
        assert_eq!(
            outcome.history[2].tool_response.as_ref().unwrap().result,
            ToolResult::Ok(String::new())
        );
    }

    #[test]
    fn from_config_requires_existing_workspace() {
        let dir = TempDir::new().unwrap();
        let config = Config::new("k".to_string(), dir.path().join("missing"));
        assert!(Agent::from_config(config).is_err());

        let config = Config::new("k".to_string(), dir.path().to_path_buf());
        let agent = Agent::from_config(config).unwrap();
        assert_eq!(agent.tools().list_tools().len(), 4);
    }

    #[test]
    fn truncate_for_log_respects_char_boundaries() {
        assert_eq!(truncate_for_log("héllo", 10), "héllo");
        assert_eq!(truncate_for_log("héllo", 2), "hé... [truncated]");
    }
}
