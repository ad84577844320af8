//! Scenario warmup execution.
//!
//! Warmup prepares a scenario's working directory before any benchmarked
//! run touches it: installing dependencies, scaffolding a project, or
//! letting an agent build the starting state. It runs once per scenario,
//! not per combination, so batch runs share one warmed directory.
//!
//! Outcomes are reported as values rather than errors: a failed warmup is
//! a normal result the orchestrator records against every dependent run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{AgentError, WarmupError};
use crate::llm::{AgentAdapter, AgentRequest, ChatMessage};
use crate::scenario::{Scenario, WarmupSpec};
use crate::tools::{run_shell, truncate_output, workspace_tool_set};

/// Warmup shell commands get a generous timeout; dependency installs
/// routinely run for minutes.
const COMMAND_TIMEOUT_SECS: u64 = 600;

const OUTPUT_SNIPPET_CHARS: usize = 2_000;

/// Appended to agent warmup prompts. Text output alone is not a reliable
/// completion signal, so the agent must leave a filesystem marker we can
/// verify.
const CONTROL_INSTRUCTION: &str = "\n\nWhen the task is fully complete, create a directory named \
'control' in the working directory and write a file 'control/done.txt' containing a one-line \
summary of what you did. Only create it once everything is finished.";

/// Result of one warmup attempt.
#[derive(Debug, Clone)]
pub struct WarmupOutcome {
    pub success: bool,
    pub error: Option<String>,
    /// Path of the `control` marker directory checked after an agent
    /// warmup, present whether or not the check passed.
    pub control_path: Option<PathBuf>,
    /// File names found inside the control directory.
    pub control_contents: Vec<String>,
}

impl WarmupOutcome {
    fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
            control_path: None,
            control_contents: Vec::new(),
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            control_path: None,
            control_contents: Vec::new(),
        }
    }
}

/// Runs the scenario's configured warmup, if any.
///
/// `adapter_factory` builds an agent adapter for agent-type warmups; it
/// receives the warmup's model override when one is configured.
pub async fn execute_warmup<F>(scenario: &Scenario, adapter_factory: F) -> WarmupOutcome
where
    F: Fn(Option<&str>) -> Result<Arc<dyn AgentAdapter>, AgentError>,
{
    let Some(spec) = scenario.config.warmup.clone() else {
        debug!(
            suite = %scenario.suite,
            scenario = %scenario.name,
            "no warmup configured"
        );
        return WarmupOutcome::succeeded();
    };

    let warmup_dir = scenario.warmup_dir();
    if let Err(e) = recreate_dir(&warmup_dir).await {
        return WarmupOutcome::failed(
            WarmupError::DirectorySetup {
                path: warmup_dir.display().to_string(),
                reason: e.to_string(),
            }
            .to_string(),
        );
    }

    match spec {
        WarmupSpec::Scripted { commands } => {
            info!(
                suite = %scenario.suite,
                scenario = %scenario.name,
                commands = commands.len(),
                "running scripted warmup"
            );
            for command in &commands {
                let output = match run_shell(
                    command,
                    &warmup_dir,
                    Duration::from_secs(COMMAND_TIMEOUT_SECS),
                )
                .await
                {
                    Ok(output) => output,
                    Err(e) => {
                        return WarmupOutcome::failed(format!(
                            "failed to spawn warmup command '{}': {}",
                            command, e
                        ))
                    }
                };
                if !output.success() {
                    let detail = truncate_output(
                        &format!("{}\n{}", output.stdout, output.stderr),
                        OUTPUT_SNIPPET_CHARS,
                    );
                    return WarmupOutcome::failed(
                        WarmupError::CommandFailed {
                            command: command.clone(),
                            code: output.exit_code,
                            output: detail,
                        }
                        .to_string(),
                    );
                }
                debug!(command = %command, "warmup command succeeded");
            }
            WarmupOutcome::succeeded()
        }
        WarmupSpec::Agent { prompt, model } => {
            info!(
                suite = %scenario.suite,
                scenario = %scenario.name,
                model = model.as_deref().unwrap_or("default"),
                "running agent warmup"
            );
            let adapter = match adapter_factory(model.as_deref()) {
                Ok(adapter) => adapter,
                Err(e) => return WarmupOutcome::failed(format!("adapter setup failed: {}", e)),
            };

            let (tools, handlers) = workspace_tool_set(&warmup_dir);
            let request = AgentRequest::new(vec![ChatMessage::user(format!(
                "{}{}",
                prompt, CONTROL_INSTRUCTION
            ))])
            .with_tools(tools)
            .with_handlers(handlers)
            .with_workspace_dir(&warmup_dir);

            match adapter.send(request).await {
                Ok(response) => {
                    debug!(
                        tokens = response.input_tokens + response.output_tokens,
                        tool_calls = response.tool_calls,
                        "agent warmup finished"
                    );
                }
                Err(e) => {
                    return WarmupOutcome::failed(
                        WarmupError::Agent(e).to_string(),
                    )
                }
            }

            verify_control_marker(&warmup_dir).await
        }
    }
}

async fn recreate_dir(dir: &std::path::Path) -> std::io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).await?;
    }
    fs::create_dir_all(dir).await
}

/// Checks that the agent left a non-empty `control` marker directory.
async fn verify_control_marker(warmup_dir: &std::path::Path) -> WarmupOutcome {
    let control = warmup_dir.join("control");
    let failed = |error: String, contents: Vec<String>| WarmupOutcome {
        success: false,
        error: Some(error),
        control_path: Some(control.clone()),
        control_contents: contents,
    };

    if !control.is_dir() {
        warn!(path = %control.display(), "agent warmup produced no control directory");
        return failed(
            "agent did not create the 'control' marker directory".to_string(),
            Vec::new(),
        );
    }

    let mut contents = Vec::new();
    match fs::read_dir(&control).await {
        Ok(mut entries) => {
            while let Ok(Some(entry)) = entries.next_entry().await {
                contents.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        Err(e) => return failed(format!("failed to read control directory: {}", e), Vec::new()),
    }
    contents.sort();

    if contents.is_empty() {
        return failed("'control' marker directory is empty".to_string(), contents);
    }

    WarmupOutcome {
        success: true,
        error: None,
        control_path: Some(control),
        control_contents: contents,
    }
}
