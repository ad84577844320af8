//! benchforge: benchmarking harness for LLM agents.
//!
//! This library runs benchmark scenarios against tool-calling LLM agents,
//! scores the results with code checks and an LLM judge, and persists runs
//! for aggregate comparison.

// Core modules
pub mod batch;
pub mod cli;
pub mod error;
pub mod evaluation;
pub mod llm;
pub mod mcp;
pub mod orchestrator;
pub mod scenario;
pub mod scoring;
pub mod specialist;
pub mod storage;
pub mod tools;
pub mod warmup;
pub mod workspace;

// Re-export commonly used error types
pub use error::{
    AgentError, BatchError, McpError, ScenarioError, SpecialistError, StorageError,
    TemplateError, WarmupError, WorkspaceError,
};
