//! Error types for benchforge operations.
//!
//! Defines error types for all major subsystems:
//! - Agent adapters and the tool-calling loop
//! - Specialist template loading and the prompt sub-pipeline
//! - Scenario configuration
//! - Warmup and workspace preparation
//! - MCP server connections
//! - Run/batch persistence

use thiserror::Error;

/// Errors that can occur during agent adapter operations.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Missing API key: OPENROUTER_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse model response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Response contained no message")]
    EmptyResponse,

    #[error("Tool '{tool}' rejected input: {reason}")]
    InvalidToolInput { tool: String, reason: String },

    #[error("Tool execution failed: {0}")]
    ToolFailed(String),

    #[error("Prompt composition failed: {0}")]
    PromptComposition(#[from] Box<SpecialistError>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::RequestFailed(err.to_string())
    }
}

/// Errors that can occur while loading specialist templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template file not found at '{0}'")]
    NotFound(String),

    #[error("Failed to parse template file '{path}': {message}")]
    ParseError { path: String, message: String },

    #[error("Circular inheritance detected: '{template}' reachable from itself via {chain}")]
    CircularInheritance { template: String, chain: String },

    #[error("Parent template '{parent}' referenced by '{child}' not found at '{path}'")]
    ParentNotFound {
        child: String,
        parent: String,
        path: String,
    },

    #[error("Template '{template}' failed validation: {reason}")]
    Validation { template: String, reason: String },

    #[error("Prompt id '{0}' is malformed")]
    MalformedPromptId(String),

    #[error("No prompt found for id '{0}' and no default variant exists")]
    PromptNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur in the specialist prompt sub-pipeline.
#[derive(Debug, Error)]
pub enum SpecialistError {
    #[error("Intent extraction failed: {0}")]
    IntentExtraction(String),

    #[error("Component selection failed: {0}")]
    ComponentSelection(String),

    #[error("Prompt substitution failed: {0}")]
    Substitution(String),

    #[error("Pipeline step timed out after {seconds}s")]
    StepTimeout { seconds: u64 },

    #[error("Specialist '{template}' (wrapping '{adapter}') failed: {source}")]
    Pipeline {
        template: String,
        adapter: String,
        #[source]
        source: Box<SpecialistError>,
    },

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while loading scenario configuration.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Scenario directory not found: {0}")]
    NotFound(String),

    #[error("Failed to parse scenario config '{path}': {message}")]
    ParseError { path: String, message: String },

    #[error("Scenario '{scenario}' failed validation: {reason}")]
    Validation { scenario: String, reason: String },

    #[error("Tier prompt file not found: {0}")]
    TierPromptNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur during warmup execution.
#[derive(Debug, Error)]
pub enum WarmupError {
    #[error("Failed to prepare warmup directory '{path}': {reason}")]
    DirectorySetup { path: String, reason: String },

    #[error("Warmup command '{command}' failed with exit code {code}: {output}")]
    CommandFailed {
        command: String,
        code: i32,
        output: String,
    },

    #[error("Agent error during warmup: {0}")]
    Agent(#[from] AgentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during workspace preparation.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Failed to create workspace directory: {0}")]
    CreateFailed(String),

    #[error("Failed to copy fixture '{from}' to workspace: {reason}")]
    CopyFailed { from: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while talking to MCP servers.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{server}' (command: {command}): {reason}")]
    SpawnFailed {
        server: String,
        command: String,
        reason: String,
    },

    #[error("MCP server '{server}' initialization failed: {reason}")]
    InitFailed { server: String, reason: String },

    #[error("MCP request '{method}' failed: {reason}")]
    RequestFailed { method: String, reason: String },

    #[error("MCP tool '{tool}' call failed: [{code}] {message}")]
    ToolCallFailed {
        tool: String,
        code: i64,
        message: String,
    },

    #[error("Timed out waiting for MCP server response")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during run/batch persistence.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Run '{0}' not found")]
    RunNotFound(String),

    #[error("Batch '{0}' not found")]
    BatchNotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::QueryFailed("row not found".to_string()),
            other => StorageError::QueryFailed(other.to_string()),
        }
    }
}

/// Errors that can occur during batch fan-out.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Models manifest not found at '{0}'")]
    ManifestNotFound(String),

    #[error("Failed to parse models manifest '{path}': {message}")]
    ManifestParse { path: String, message: String },

    #[error("Models manifest lists no models")]
    EmptyManifest,

    #[error("No combinations to run after applying filters")]
    NoCombinations,

    #[error("Scenario error: {0}")]
    Scenario(#[from] ScenarioError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
