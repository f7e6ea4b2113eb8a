//! Script execution tool.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{parse_args, Tool, ToolError};
use crate::sandbox::WorkingRoot;

/// Extension a file must carry to be run.
pub const SCRIPT_EXTENSION: &str = "py";

/// Interpreter used when none is configured.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Wall-clock limit for one script run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Run a Python script inside the working root.
#[derive(Debug, Clone)]
pub struct RunScript {
    interpreter: String,
    timeout: Duration,
}

impl Default for RunScript {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPRETER, DEFAULT_TIMEOUT)
    }
}

impl RunScript {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunScriptArgs {
    file_path: String,
    #[serde(default)]
    args: Vec<String>,
}

#[async_trait]
impl Tool for RunScript {
    fn name(&self) -> &str {
        "run_python_file"
    }

    fn description(&self) -> &str {
        "Executes a Python file in the working directory and returns its output. The script runs with a 30 second timeout."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the Python file to execute, relative to the working directory."
                },
                "args": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional command-line arguments passed to the script."
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: Value, root: &WorkingRoot) -> Result<String, ToolError> {
        let args: RunScriptArgs = parse_args(self.name(), args)?;

        let target = root
            .resolve(&args.file_path)
            .map_err(|v| ToolError::outside("execute", v))?;

        let is_file = tokio::fs::metadata(&target)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(ToolError::ScriptNotFound(args.file_path));
        }

        if target.extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION) {
            return Err(ToolError::WrongType(args.file_path));
        }

        tracing::info!("Running script: {}", target.display());

        // kill_on_drop reaps the child when the timeout drops the output future.
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.interpreter)
                .arg(&target)
                .args(&args.args)
                .current_dir(root.path())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ToolError::ExecutionTimeout(self.timeout.as_secs()))?
        .map_err(|e| ToolError::ExecutionFailure(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut sections = Vec::new();
        if !stdout.is_empty() {
            sections.push(stdout.into_owned());
        }
        if !stderr.is_empty() {
            sections.push(format!("Error: {}", stderr.trim()));
        }
        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            sections.push(format!("Script exited with code {}", exit_code));
        }
        if sections.is_empty() {
            sections.push("No output from the script.".to_string());
        }
        sections.push(format!("Successfully executed \"{}\"", args.file_path));

        Ok(sections.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // `sh` stands in for the interpreter so these run without Python installed.
    fn setup(timeout: Duration) -> (TempDir, WorkingRoot, RunScript) {
        let dir = TempDir::new().unwrap();
        let root = WorkingRoot::new(dir.path()).unwrap();
        (dir, root, RunScript::new("sh", timeout))
    }

    #[tokio::test]
    async fn captures_stdout() {
        let (dir, root, tool) = setup(DEFAULT_TIMEOUT);
        std::fs::write(dir.path().join("main.py"), "echo 'Usage: calculator'\n").unwrap();

        let output = tool
            .execute(json!({ "file_path": "main.py" }), &root)
            .await
            .unwrap();
        assert_eq!(
            output,
            "Usage: calculator\n\nSuccessfully executed \"main.py\""
        );
    }

    #[tokio::test]
    async fn reports_stderr_and_exit_code() {
        let (dir, root, tool) = setup(DEFAULT_TIMEOUT);
        std::fs::write(
            dir.path().join("fail.py"),
            "echo partial\necho 'Traceback: boom' >&2\nexit 3\n",
        )
        .unwrap();

        let output = tool
            .execute(json!({ "file_path": "fail.py" }), &root)
            .await
            .unwrap();

        let lines: Vec<_> = output.lines().collect();
        assert_eq!(
            lines,
            vec![
                "partial",
                "",
                "Error: Traceback: boom",
                "Script exited with code 3",
                "Successfully executed \"fail.py\"",
            ]
        );
    }

    #[tokio::test]
    async fn silent_script_reports_no_output() {
        let (dir, root, tool) = setup(DEFAULT_TIMEOUT);
        std::fs::write(dir.path().join("quiet.py"), "true\n").unwrap();

        let output = tool
            .execute(json!({ "file_path": "quiet.py" }), &root)
            .await
            .unwrap();
        assert_eq!(
            output,
            "No output from the script.\nSuccessfully executed \"quiet.py\""
        );
    }

    #[tokio::test]
    async fn runs_in_root_with_args() {
        let (dir, root, tool) = setup(DEFAULT_TIMEOUT);
        std::fs::create_dir(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("data.txt"), "from root").unwrap();
        std::fs::write(dir.path().join("pkg/show.py"), "cat data.txt\necho \" $1\"\n").unwrap();

        let output = tool
            .execute(
                json!({ "file_path": "pkg/show.py", "args": ["3 + 5"] }),
                &root,
            )
            .await
            .unwrap();
        assert!(output.starts_with("from root 3 + 5\n"));
    }

    #[tokio::test]
    async fn missing_script_is_not_found() {
        let (_dir, root, tool) = setup(DEFAULT_TIMEOUT);
        let err = tool
            .execute(json!({ "file_path": "nonexistent.py" }), &root)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Error: File \"nonexistent.py\" not found");
    }

    #[tokio::test]
    async fn wrong_extension_is_rejected() {
        let (dir, root, tool) = setup(DEFAULT_TIMEOUT);
        std::fs::write(dir.path().join("lorem.txt"), "echo hi").unwrap();

        let err = tool
            .execute(json!({ "file_path": "lorem.txt" }), &root)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Error: \"lorem.txt\" is not a Python file");
    }

    #[tokio::test]
    async fn outside_root_is_rejected() {
        let (_dir, root, tool) = setup(DEFAULT_TIMEOUT);
        let err = tool
            .execute(json!({ "file_path": "../main.py" }), &root)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error: Cannot execute \"../main.py\" as it is outside the permitted working directory"
        );
    }

    #[tokio::test]
    async fn slow_script_times_out() {
        let (dir, root, tool) = setup(Duration::from_secs(1));
        std::fs::write(dir.path().join("slow.py"), "sleep 10\n").unwrap();

        let err = tool
            .execute(json!({ "file_path": "slow.py" }), &root)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionTimeout(1)));
        assert_eq!(
            err.to_string(),
            "Error executing file: timed out after 1 seconds"
        );
    }

    #[tokio::test]
    async fn missing_interpreter_is_execution_failure() {
        let dir = TempDir::new().unwrap();
        let root = WorkingRoot::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("main.py"), "print(1)").unwrap();
        let tool = RunScript::new("/nonexistent/interpreter", DEFAULT_TIMEOUT);

        let err = tool
            .execute(json!({ "file_path": "main.py" }), &root)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailure(_)));
        assert!(err.to_string().starts_with("Error executing file: "));
    }
}
