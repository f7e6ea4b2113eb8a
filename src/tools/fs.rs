//! Filesystem tools: list, read, write.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, BufReader};

use super::{parse_args, Tool, ToolError};
use crate::sandbox::WorkingRoot;

/// Maximum number of characters `get_file_content` returns.
pub const MAX_CHARS: usize = 10_000;

/// Bytes read from disk for one `get_file_content` call: enough for `MAX_CHARS + 1`
/// characters of four bytes each, so a longer file is always detected as longer.
const READ_BUDGET_BYTES: u64 = 4 * MAX_CHARS as u64 + 4;

/// List the direct children of a directory.
pub struct ListDirectory;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListDirectoryArgs {
    #[serde(default)]
    directory: Option<String>,
}

#[async_trait]
impl Tool for ListDirectory {
    fn name(&self) -> &str {
        "get_files_info"
    }

    fn description(&self) -> &str {
        "Lists files in the specified directory along with their sizes, constrained to the working directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": {
                    "type": "string",
                    "description": "The directory to list files from, relative to the working directory. If not provided, lists files in the working directory itself."
                }
            }
        })
    }

    async fn execute(&self, args: Value, root: &WorkingRoot) -> Result<String, ToolError> {
        let args: ListDirectoryArgs = parse_args(self.name(), args)?;
        let directory = args.directory.unwrap_or_else(|| ".".to_string());

        let target = root
            .resolve(&directory)
            .map_err(|v| ToolError::outside("list", v))?;

        let is_dir = tokio::fs::metadata(&target)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(ToolError::NotADirectory(directory));
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&target).await?;
        while let Some(entry) = dir.next_entry().await? {
            // Follow symlinks for size and kind; fall back to the link itself if dangling.
            let metadata = match tokio::fs::metadata(entry.path()).await {
                Ok(m) => m,
                Err(_) => entry.metadata().await?,
            };
            entries.push((
                entry.file_name().to_string_lossy().into_owned(),
                metadata.len(),
                metadata.is_dir(),
            ));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(entries
            .iter()
            .map(|(name, size, is_dir)| {
                format!("- {}: file_size={} bytes, is_dir={}", name, size, is_dir)
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Read a text file, capped at [`MAX_CHARS`] characters.
pub struct ReadFile;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadFileArgs {
    file_path: String,
}

#[async_trait]
impl Tool for ReadFile {
    fn name(&self) -> &str {
        "get_file_content"
    }

    fn description(&self) -> &str {
        "Reads the content of a file, constrained to the working directory. Content beyond 10000 characters is truncated."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to read, relative to the working directory."
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: Value, root: &WorkingRoot) -> Result<String, ToolError> {
        let args: ReadFileArgs = parse_args(self.name(), args)?;

        let target = root
            .resolve(&args.file_path)
            .map_err(|v| ToolError::outside("access", v))?;

        let is_file = tokio::fs::metadata(&target)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(ToolError::FileNotFound(args.file_path));
        }

        let file = tokio::fs::File::open(&target)
            .await
            .map_err(ToolError::ReadFailure)?;
        let mut bytes = Vec::new();
        BufReader::new(file)
            .take(READ_BUDGET_BYTES)
            .read_to_end(&mut bytes)
            .await
            .map_err(ToolError::ReadFailure)?;

        let content = decode_prefix(bytes).map_err(ToolError::ReadFailure)?;
        Ok(truncate_content(content, &args.file_path))
    }
}

/// Decode the bytes read so far.
///
/// Invalid or partial UTF-8 is tolerated only past the cap, where it is cut off anyway.
fn decode_prefix(bytes: Vec<u8>) -> std::io::Result<String> {
    match String::from_utf8(bytes) {
        Ok(content) => Ok(content),
        Err(e) => {
            let valid_up_to = e.utf8_error().valid_up_to();
            let mut bytes = e.into_bytes();
            bytes.truncate(valid_up_to);
            let prefix = String::from_utf8(bytes).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.utf8_error())
            })?;
            if prefix.chars().count() > MAX_CHARS {
                Ok(prefix)
            } else {
                Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "stream did not contain valid UTF-8",
                ))
            }
        }
    }
}

/// Cut `content` to [`MAX_CHARS`] characters and mark the cut.
fn truncate_content(mut content: String, file_path: &str) -> String {
    if let Some((byte_idx, _)) = content.char_indices().nth(MAX_CHARS) {
        content.truncate(byte_idx);
        content.push_str(&format!(
            "[...File \"{}\" truncated at {} characters]",
            file_path, MAX_CHARS
        ));
    }
    content
}

/// Create or overwrite a file.
pub struct WriteFile;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WriteFileArgs {
    file_path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Writes content to a file, constrained to the working directory. Creates missing parent directories and overwrites existing files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to write, relative to the working directory."
                },
                "content": {
                    "type": "string",
                    "description": "The full content to write to the file."
                }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, args: Value, root: &WorkingRoot) -> Result<String, ToolError> {
        let args: WriteFileArgs = parse_args(self.name(), args)?;

        let target = root
            .resolve(&args.file_path)
            .map_err(|v| ToolError::outside("write to", v))?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &args.content).await?;

        tracing::debug!(path = %target.display(), bytes = args.content.len(), "Wrote file");

        Ok(format!(
            "Successfully wrote to \"{}\" ({} characters written)",
            args.file_path,
            args.content.chars().count()
        ))
    }
}
