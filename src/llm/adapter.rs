//! The agent adapter trait.
//!
//! Everything that can run a benchmark interaction implements
//! [`AgentAdapter`]: vendor-backed adapters, the specialist decorator, and
//! test mocks. Composition is by construction — a specialist wraps an inner
//! adapter, the orchestrator only ever sees the trait.

use async_trait::async_trait;

use crate::error::AgentError;
use crate::llm::types::{AgentRequest, AgentResponse};

/// Where a model id came from, in resolution priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSource {
    /// Explicitly passed by the caller.
    Parameter,
    /// Read from an environment variable.
    Environment,
    /// Fell back to the adapter's built-in default.
    Default,
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSource::Parameter => write!(f, "parameter"),
            ModelSource::Environment => write!(f, "environment"),
            ModelSource::Default => write!(f, "default"),
        }
    }
}

/// Resolves a model id from parameter, environment variable, then default.
pub fn resolve_model(
    parameter: Option<&str>,
    env_var: &str,
    default: &str,
) -> (String, ModelSource) {
    if let Some(model) = parameter.filter(|m| !m.trim().is_empty()) {
        return (model.to_string(), ModelSource::Parameter);
    }
    if let Ok(model) = std::env::var(env_var) {
        if !model.trim().is_empty() {
            return (model, ModelSource::Environment);
        }
    }
    (default.to_string(), ModelSource::Default)
}

/// A uniform interface over a chat-completion backend.
///
/// `send` runs the full multi-turn tool-calling loop for vendor adapters;
/// decorators may rewrite the request before delegating. Errors from `send`
/// are not retried at this layer — retry policy belongs to the caller.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Adapter identity, used in run records and log lines.
    fn name(&self) -> String;

    /// Executes one full agent interaction.
    async fn send(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_prefers_parameter() {
        let (model, source) = resolve_model(
            Some("openai/gpt-4o"),
            "BENCHFORGE_TEST_MODEL_UNSET",
            "fallback/model",
        );
        assert_eq!(model, "openai/gpt-4o");
        assert_eq!(source, ModelSource::Parameter);
    }

    #[test]
    fn test_resolve_model_empty_parameter_falls_through() {
        let (model, source) =
            resolve_model(Some("   "), "BENCHFORGE_TEST_MODEL_UNSET", "fallback/model");
        assert_eq!(model, "fallback/model");
        assert_eq!(source, ModelSource::Default);
    }

    #[test]
    fn test_resolve_model_environment() {
        std::env::set_var("BENCHFORGE_TEST_MODEL_SET", "env/model");
        let (model, source) = resolve_model(None, "BENCHFORGE_TEST_MODEL_SET", "fallback/model");
        assert_eq!(model, "env/model");
        assert_eq!(source, ModelSource::Environment);
        std::env::remove_var("BENCHFORGE_TEST_MODEL_SET");
    }
}
