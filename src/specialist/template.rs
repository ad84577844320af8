//! Specialist template schema.
//!
//! A specialist is defined by a YAML template: a tree of spawner/task
//! prompts (with per-model overrides), documentation references the
//! composed prompt can require the agent to read, and dependency
//! declarations (named tools, MCP servers). Templates can extend a parent
//! template; the resolver flattens the chain at load time.
//!
//! Prompt variants are addressed externally by a dotted id
//! (`taskType.default.key` or `taskType.model_specific.modelKey.key`,
//! where `modelKey` may itself contain dots). The id is parsed once into a
//! [`PromptId`] at the boundary; lookups run against the structured tree,
//! never against the string.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::TemplateError;
use crate::mcp::McpServerConfig;

/// Prompt key for the agent-role ("spawner") half of a composed prompt.
pub const SPAWNER_KEY: &str = "spawner";

/// Prompt key for the task-instruction half of a composed prompt.
pub const TASK_KEY: &str = "task";

/// Task type used when selection does not pick a more specific one.
pub const GENERAL_TASK_TYPE: &str = "general";

/// One specialist template with inheritance already resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecialistTemplate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Parent template name; consumed by the resolver.
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub prompts: PromptTree,
    #[serde(default)]
    pub documentation: Vec<DocumentationRef>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub dependencies: Dependencies,
    #[serde(default)]
    pub llm_config: Option<LlmConfig>,
    #[serde(default)]
    pub metadata: Option<TemplateMetadata>,
}

impl SpecialistTemplate {
    /// Structural validation: a usable template names itself and carries at
    /// least one prompt.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.name.trim().is_empty() {
            return Err(TemplateError::Validation {
                template: "<unnamed>".to_string(),
                reason: "template name is empty".to_string(),
            });
        }
        if self.prompts.is_empty() {
            return Err(TemplateError::Validation {
                template: self.name.clone(),
                reason: "template defines no prompts".to_string(),
            });
        }
        for (task_type, task) in &self.prompts.0 {
            if task.default.is_empty() && task.model_specific.is_empty() {
                return Err(TemplateError::Validation {
                    template: self.name.clone(),
                    reason: format!("task type '{}' has no prompt variants", task_type),
                });
            }
        }
        Ok(())
    }

    /// Looks up a prompt, falling back from the model-specific variant to
    /// the task type's default for the same key.
    pub fn get_prompt(&self, task_type: &str, model: Option<&str>, key: &str) -> Option<&str> {
        let task = self.prompts.0.get(task_type)?;
        if let Some(model) = model {
            if let Some(text) = task
                .model_specific
                .get(model)
                .and_then(|prompts| prompts.get(key))
            {
                return Some(text.as_str());
            }
        }
        task.default.get(key).map(String::as_str)
    }

    /// Resolves a parsed prompt id, with the same model → default fallback
    /// as [`get_prompt`](Self::get_prompt).
    pub fn prompt_by_id(&self, id: &PromptId) -> Result<&str, TemplateError> {
        self.get_prompt(&id.task_type, id.model.as_deref(), &id.key)
            .ok_or_else(|| TemplateError::PromptNotFound(id.to_string()))
    }

    /// Task types this template defines prompts for, sorted.
    pub fn task_types(&self) -> Vec<&str> {
        self.prompts.0.keys().map(String::as_str).collect()
    }

    /// Overlays this template on top of `parent`: scalar fields keep the
    /// child's value when present, collections merge with the child
    /// winning on key conflicts.
    pub fn merged_over(self, parent: &SpecialistTemplate) -> SpecialistTemplate {
        let mut prompts = parent.prompts.clone();
        for (task_type, child_task) in self.prompts.0 {
            let merged = prompts.0.entry(task_type).or_default();
            for (key, text) in child_task.default {
                merged.default.insert(key, text);
            }
            for (model, child_prompts) in child_task.model_specific {
                let model_entry = merged.model_specific.entry(model).or_default();
                for (key, text) in child_prompts {
                    model_entry.insert(key, text);
                }
            }
        }

        let mut documentation = parent.documentation.clone();
        for doc in self.documentation {
            if let Some(existing) = documentation.iter_mut().find(|d| d.url == doc.url) {
                *existing = doc;
            } else {
                documentation.push(doc);
            }
        }

        let mut tags = parent.tags.clone();
        for tag in self.tags {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        let mut tech_stack = parent.tech_stack.clone();
        for entry in self.tech_stack {
            if !tech_stack.contains(&entry) {
                tech_stack.push(entry);
            }
        }

        let mut tools = parent.dependencies.tools.clone();
        for tool in self.dependencies.tools {
            if !tools.contains(&tool) {
                tools.push(tool);
            }
        }
        let mut mcp_servers = parent.dependencies.mcp_servers.clone();
        for server in self.dependencies.mcp_servers {
            if let Some(existing) = mcp_servers.iter_mut().find(|s| s.name == server.name) {
                *existing = server;
            } else {
                mcp_servers.push(server);
            }
        }

        SpecialistTemplate {
            name: self.name,
            version: self.version.or_else(|| parent.version.clone()),
            extends: self.extends,
            prompts,
            documentation,
            tags,
            tech_stack,
            dependencies: Dependencies { tools, mcp_servers },
            llm_config: self.llm_config.or_else(|| parent.llm_config.clone()),
            metadata: self.metadata.or_else(|| parent.metadata.clone()),
        }
    }
}

/// Prompt variants per task type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptTree(pub BTreeMap<String, TaskPrompts>);

impl PromptTree {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Prompts for a single task type: shared defaults plus per-model
/// overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPrompts {
    /// Prompt key → text, used for every model without an override.
    #[serde(default)]
    pub default: BTreeMap<String, String>,
    /// Model key → (prompt key → text). Model keys may contain dots.
    #[serde(default)]
    pub model_specific: BTreeMap<String, BTreeMap<String, String>>,
}

/// Parsed form of the dotted external prompt id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptId {
    pub task_type: String,
    /// `None` addresses the task type's `default` variant.
    pub model: Option<String>,
    pub key: String,
}

impl PromptId {
    pub fn default_variant(task_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            model: None,
            key: key.into(),
        }
    }

    /// Parses `taskType.default.key` or
    /// `taskType.model_specific.modelKey.key`.
    ///
    /// The model key may contain dots (model ids like `openai/gpt-4.1`
    /// do), so everything between the literal `model_specific` segment and
    /// the final dot is the model key.
    pub fn parse(id: &str) -> Result<Self, TemplateError> {
        let malformed = || TemplateError::MalformedPromptId(id.to_string());

        if let Some((task_type, rest)) = id.split_once(".model_specific.") {
            let (model, key) = rest.rsplit_once('.').ok_or_else(malformed)?;
            if task_type.is_empty() || model.is_empty() || key.is_empty() {
                return Err(malformed());
            }
            return Ok(Self {
                task_type: task_type.to_string(),
                model: Some(model.to_string()),
                key: key.to_string(),
            });
        }

        if let Some((task_type, key)) = id.split_once(".default.") {
            if task_type.is_empty() || key.is_empty() {
                return Err(malformed());
            }
            return Ok(Self {
                task_type: task_type.to_string(),
                model: None,
                key: key.to_string(),
            });
        }

        Err(malformed())
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(
                f,
                "{}.model_specific.{}.{}",
                self.task_type, model, self.key
            ),
            None => write!(f, "{}.default.{}", self.task_type, self.key),
        }
    }
}

/// External documentation the composed prompt points the agent at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentationRef {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub code_patterns: Vec<String>,
}

/// Tools and external servers a specialist needs at run time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependencies {
    /// Names of built-in tools the specialist expects to be available.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

/// Overrides for the specialist's LLM sub-pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub mode: Option<SpecialistMode>,
    /// Small/fast model used for intent extraction and selection.
    #[serde(default)]
    pub pipeline_model: Option<String>,
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
    #[serde(default)]
    pub fallback_enabled: Option<bool>,
}

/// How the specialist builds its system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialistMode {
    /// Three-step LLM pipeline (intent → selection → composition).
    Llm,
    /// Heuristic prompt resolution, no pipeline LLM calls.
    Static,
}

/// Version bookkeeping carried by some templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub breaking_changes: Vec<String>,
}
