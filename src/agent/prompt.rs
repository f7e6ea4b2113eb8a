//! System prompt template for the agent.

use crate::tools::ToolRegistry;

/// Build the system prompt with tool descriptions.
pub fn build_system_prompt(tools: &ToolRegistry) -> String {
    let tool_descriptions = tools
        .list_tools()
        .iter()
        .map(|t| format!("- **{}**: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a helpful AI coding agent.

When a user asks a question or makes a request, make a function call plan. You can perform the following operations:
{tool_descriptions}

All paths you provide should be relative to the working directory. You do not need to specify the working directory in your function calls as it is automatically injected for security reasons.

Read files before changing them, run scripts to check your work, and when you are done answer with a short summary of what you found or changed."#,
        tool_descriptions = tool_descriptions
    )
}
