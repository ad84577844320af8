//! Workspace tools exposed to the agent.
//!
//! Every benchmark run hands the model a small named tool set scoped to its
//! workspace directory: read/write/list files and run shell commands.
//! Scenarios with a reference answer additionally get an oracle tool.
//!
//! All file paths coming from the model are resolved inside the workspace
//! root; absolute paths and `..` traversal are rejected before any
//! filesystem access.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::AgentError;
use crate::llm::types::{ToolDefinition, ToolHandler, ToolHandlerMap};

/// Default timeout for agent-invoked shell commands.
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;

/// Ceiling for agent-requested command timeouts.
const MAX_COMMAND_TIMEOUT_SECS: u64 = 600;

/// Longest file content returned to the model, in characters.
const MAX_READ_CHARS: usize = 32_000;

/// Longest command output returned to the model, in characters.
const MAX_COMMAND_OUTPUT_CHARS: usize = 16_000;

/// Cap on entries returned by the listing tool.
const MAX_LISTED_ENTRIES: usize = 500;

/// Captured result of one shell command.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Runs `command` through `sh -c` in `cwd`, bounded by `timeout`.
///
/// A timeout is reported as a value (`timed_out` set, exit code -1) rather
/// than an error; `Err` is reserved for spawn failures. The child is killed
/// when the timeout fires.
pub async fn run_shell(
    command: &str,
    cwd: &Path,
    timeout: Duration,
) -> std::io::Result<ShellOutput> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Ok(ShellOutput {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("command timed out after {}s", timeout.as_secs()),
                timed_out: true,
            });
        }
    };

    Ok(ShellOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        timed_out: false,
    })
}

/// Truncates to `max_chars` on a char boundary, noting how much was cut.
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    let cut = text.chars().count() - max_chars;
    format!("{}\n[truncated {} chars]", kept, cut)
}

/// Resolves a model-supplied path inside the workspace root.
fn resolve_in_root(root: &Path, tool: &str, relative: &str) -> Result<PathBuf, AgentError> {
    let candidate = Path::new(relative);
    let escapes = candidate.is_absolute()
        || candidate
            .components()
            .any(|part| matches!(part, Component::ParentDir));
    if escapes {
        return Err(AgentError::InvalidToolInput {
            tool: tool.to_string(),
            reason: format!("path '{}' escapes the workspace", relative),
        });
    }
    Ok(root.join(candidate))
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, args: Value) -> Result<T, AgentError> {
    serde_json::from_value(args).map_err(|e| AgentError::InvalidToolInput {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

/// Reads a file from the workspace.
pub struct ReadFileTool {
    root: PathBuf,
}

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition::new(
            "read_file",
            "Read a file from the workspace. Returns the file content.",
            json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path relative to the workspace root"
                    }
                },
                "required": ["path"]
            }),
        )
    }
}

#[async_trait]
impl ToolHandler for ReadFileTool {
    async fn call(&self, args: Value) -> Result<String, AgentError> {
        let args: ReadFileArgs = parse_args("read_file", args)?;
        let path = resolve_in_root(&self.root, "read_file", &args.path)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AgentError::ToolFailed(format!("read '{}': {}", args.path, e)))?;
        Ok(truncate_output(&content, MAX_READ_CHARS))
    }
}

/// Writes a file into the workspace, creating parent directories.
pub struct WriteFileTool {
    root: PathBuf,
}

#[derive(Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

impl WriteFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition::new(
            "write_file",
            "Create or overwrite a file in the workspace.",
            json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path relative to the workspace root"
                    },
                    "content": {
                        "type": "string",
                        "description": "Full file content to write"
                    }
                },
                "required": ["path", "content"]
            }),
        )
    }
}

#[async_trait]
impl ToolHandler for WriteFileTool {
    async fn call(&self, args: Value) -> Result<String, AgentError> {
        let args: WriteFileArgs = parse_args("write_file", args)?;
        let path = resolve_in_root(&self.root, "write_file", &args.path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::ToolFailed(format!("mkdir for '{}': {}", args.path, e)))?;
        }
        tokio::fs::write(&path, &args.content)
            .await
            .map_err(|e| AgentError::ToolFailed(format!("write '{}': {}", args.path, e)))?;
        debug!(path = %args.path, bytes = args.content.len(), "agent wrote file");
        Ok(format!("Wrote {} bytes to {}", args.content.len(), args.path))
    }
}

/// Lists workspace files recursively.
pub struct ListFilesTool {
    root: PathBuf,
}

#[derive(Deserialize)]
struct ListFilesArgs {
    #[serde(default)]
    path: Option<String>,
}

impl ListFilesTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition::new(
            "list_files",
            "List files in the workspace recursively. Directories end with '/'.",
            json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Subdirectory to list; defaults to the workspace root"
                    }
                }
            }),
        )
    }
}

#[async_trait]
impl ToolHandler for ListFilesTool {
    async fn call(&self, args: Value) -> Result<String, AgentError> {
        let args: ListFilesArgs = parse_args("list_files", args)?;
        let base = match args.path.as_deref() {
            Some(sub) if !sub.is_empty() => resolve_in_root(&self.root, "list_files", sub)?,
            _ => self.root.clone(),
        };

        let mut entries = Vec::new();
        for entry in walkdir::WalkDir::new(&base)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                name != ".git" && name != "node_modules" && name != "target"
            })
        {
            let entry = entry.map_err(|e| AgentError::ToolFailed(format!("list: {}", e)))?;
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            if entry.file_type().is_dir() {
                entries.push(format!("{}/", relative));
            } else {
                entries.push(relative);
            }
            if entries.len() >= MAX_LISTED_ENTRIES {
                entries.push(format!("[listing capped at {} entries]", MAX_LISTED_ENTRIES));
                break;
            }
        }

        if entries.is_empty() {
            return Ok("(empty)".to_string());
        }
        Ok(entries.join("\n"))
    }
}

/// Runs a shell command inside the workspace.
pub struct RunCommandTool {
    root: PathBuf,
}

#[derive(Deserialize)]
struct RunCommandArgs {
    command: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

impl RunCommandTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition::new(
            "run_command",
            "Run a shell command in the workspace and return its exit code and output.",
            json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Shell command to execute"
                    },
                    "timeout_secs": {
                        "type": "integer",
                        "description": "Optional timeout in seconds (default 120, max 600)"
                    }
                },
                "required": ["command"]
            }),
        )
    }
}

#[async_trait]
impl ToolHandler for RunCommandTool {
    async fn call(&self, args: Value) -> Result<String, AgentError> {
        let args: RunCommandArgs = parse_args("run_command", args)?;
        let timeout = Duration::from_secs(
            args.timeout_secs
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS)
                .min(MAX_COMMAND_TIMEOUT_SECS),
        );

        debug!(command = %args.command, "agent running command");
        let output = run_shell(&args.command, &self.root, timeout)
            .await
            .map_err(|e| AgentError::ToolFailed(format!("spawn '{}': {}", args.command, e)))?;

        let mut report = format!("exit code: {}\n", output.exit_code);
        if output.timed_out {
            report.push_str("(timed out)\n");
        }
        if !output.stdout.is_empty() {
            report.push_str("stdout:\n");
            report.push_str(&output.stdout);
            report.push('\n');
        }
        if !output.stderr.is_empty() {
            report.push_str("stderr:\n");
            report.push_str(&output.stderr);
        }
        Ok(truncate_output(&report, MAX_COMMAND_OUTPUT_CHARS))
    }
}

/// Hands the agent the scenario's reference answer on request.
///
/// Stands in for "ask a human": scenarios that define an oracle answer let
/// the agent consult it, and the judge scores how the answer was used.
pub struct OracleTool {
    answer_path: PathBuf,
}

#[derive(Deserialize)]
struct OracleArgs {
    #[serde(default)]
    #[allow(dead_code)]
    question: Option<String>,
}

impl OracleTool {
    pub fn new(answer_path: impl Into<PathBuf>) -> Self {
        Self {
            answer_path: answer_path.into(),
        }
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition::new(
            "ask_oracle",
            "Ask the oracle for the reference answer to this task.",
            json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "Optional question for context; the oracle always returns the reference answer"
                    }
                }
            }),
        )
    }
}

#[async_trait]
impl ToolHandler for OracleTool {
    async fn call(&self, args: Value) -> Result<String, AgentError> {
        let _args: OracleArgs = parse_args("ask_oracle", args)?;
        tokio::fs::read_to_string(&self.answer_path)
            .await
            .map_err(|e| {
                AgentError::ToolFailed(format!(
                    "oracle answer '{}': {}",
                    self.answer_path.display(),
                    e
                ))
            })
    }
}

/// Builds the standard workspace tool set rooted at `root`.
pub fn workspace_tool_set(root: &Path) -> (Vec<ToolDefinition>, ToolHandlerMap) {
    let definitions = vec![
        ReadFileTool::definition(),
        WriteFileTool::definition(),
        ListFilesTool::definition(),
        RunCommandTool::definition(),
    ];

    let mut handlers: ToolHandlerMap = HashMap::new();
    handlers.insert("read_file".to_string(), Arc::new(ReadFileTool::new(root)));
    handlers.insert("write_file".to_string(), Arc::new(WriteFileTool::new(root)));
    handlers.insert("list_files".to_string(), Arc::new(ListFilesTool::new(root)));
    handlers.insert(
        "run_command".to_string(),
        Arc::new(RunCommandTool::new(root)),
    );

    (definitions, handlers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_read_write_round() {
        let dir = tempdir().unwrap();
        let write = WriteFileTool::new(dir.path());
        let read = ReadFileTool::new(dir.path());

        let report = write
            .call(json!({"path": "src/lib.rs", "content": "pub fn f() {}"}))
            .await
            .unwrap();
        assert!(report.contains("src/lib.rs"));

        let content = read.call(json!({"path": "src/lib.rs"})).await.unwrap();
        assert_eq!(content, "pub fn f() {}");
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let dir = tempdir().unwrap();
        let read = ReadFileTool::new(dir.path());

        let absolute = read.call(json!({"path": "/etc/passwd"})).await;
        assert!(matches!(
            absolute,
            Err(AgentError::InvalidToolInput { .. })
        ));

        let traversal = read.call(json!({"path": "../outside.txt"})).await;
        assert!(matches!(
            traversal,
            Err(AgentError::InvalidToolInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_reports_path() {
        let dir = tempdir().unwrap();
        let read = ReadFileTool::new(dir.path());

        let err = read.call(json!({"path": "ghost.txt"})).await.unwrap_err();
        assert!(err.to_string().contains("ghost.txt"));
    }

    #[tokio::test]
    async fn test_list_files_marks_directories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();

        let list = ListFilesTool::new(dir.path());
        let output = list.call(json!({})).await.unwrap();

        assert!(output.contains("README.md"));
        assert!(output.contains("src/"));
        assert!(output.contains("src/main.rs"));
    }

    #[tokio::test]
    async fn test_run_command_captures_exit_and_output() {
        let dir = tempdir().unwrap();
        let run = RunCommandTool::new(dir.path());

        let output = run
            .call(json!({"command": "echo hello && exit 3"}))
            .await
            .unwrap();
        assert!(output.contains("exit code: 3"));
        assert!(output.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_shell_timeout() {
        let dir = tempdir().unwrap();
        let output = run_shell("sleep 5", dir.path(), Duration::from_millis(100))
            .await
            .unwrap();

        assert!(output.timed_out);
        assert!(!output.success());
        assert_eq!(output.exit_code, -1);
    }

    #[tokio::test]
    async fn test_oracle_returns_answer() {
        let dir = tempdir().unwrap();
        let answer = dir.path().join("answer.md");
        std::fs::write(&answer, "Use a binary search tree.").unwrap();

        let oracle = OracleTool::new(&answer);
        let output = oracle.call(json!({"question": "how?"})).await.unwrap();
        assert_eq!(output, "Use a binary search tree.");
    }

    #[test]
    fn test_truncate_output_notes_cut() {
        let long = "x".repeat(50);
        let truncated = truncate_output(&long, 10);
        assert!(truncated.starts_with("xxxxxxxxxx"));
        assert!(truncated.contains("[truncated 40 chars]"));

        assert_eq!(truncate_output("short", 10), "short");
    }

    #[test]
    fn test_workspace_tool_set_is_complete() {
        let dir = tempdir().unwrap();
        let (definitions, handlers) = workspace_tool_set(dir.path());

        assert_eq!(definitions.len(), 4);
        for definition in &definitions {
            assert!(handlers.contains_key(&definition.name));
        }
    }
}
