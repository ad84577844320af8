//! LLM-powered prompt composition pipeline.
//!
//! Three steps turn a raw task prompt plus a specialist template into a
//! composed system prompt:
//!
//! 1. **Intent extraction** distills the task into an [`ExtractedIntent`]
//!    via a forced structured tool call against a small pipeline model.
//! 2. **Component selection** asks the same model which spawner/task prompt
//!    variants and documentation references fit that intent.
//! 3. **Composition** resolves the selected prompt ids, runs template
//!    substitution on each, and concatenates spawner, task, and a
//!    documentation section.
//!
//! Steps 1 and 2 are timeout-bounded; their results are cached upstream by
//! a hash of the raw prompt so repeated sends of the same task skip the
//! extra vendor calls.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tera::{Context, Tera};

use crate::error::SpecialistError;
use crate::llm::{ChatMessage, OpenRouterAdapter, ToolDefinition};
use crate::specialist::template::{DocumentationRef, PromptId, SpecialistTemplate};

/// Sentinel phrase embedded in composed prompts that reference external
/// documentation. Its presence marks a prompt as already-composed, which
/// the adapter uses to skip recomposition in validation mode.
pub const DOC_REQUIREMENT_MARKER: &str = "must read these URLs before proceeding";

/// Model used for the extraction/selection steps unless the template
/// overrides it. Kept small: these calls run on every uncached send.
pub const DEFAULT_PIPELINE_MODEL: &str = "openai/gpt-4o-mini";

/// Per-step timeout. The pipeline sits in front of every agent run, so a
/// hung extraction call must not stall the benchmark.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 10;

/// Structured result of intent extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedIntent {
    #[serde(default)]
    pub primary_goal: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub package_manager: Option<String>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

/// Structured result of component selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecialistSelection {
    #[serde(default)]
    pub spawner_prompt_id: String,
    #[serde(default)]
    pub task_prompt_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    /// Titles (or URLs) of documentation references the downstream agent
    /// should be pointed at.
    #[serde(default)]
    pub documentation: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// Cache key for a raw task prompt.
pub fn prompt_cache_key(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Runs the extraction and selection steps against a vendor model.
pub struct SpecialistPipeline {
    adapter: OpenRouterAdapter,
    model: String,
    step_timeout: Duration,
}

impl SpecialistPipeline {
    pub fn new(adapter: OpenRouterAdapter) -> Self {
        Self {
            adapter,
            model: DEFAULT_PIPELINE_MODEL.to_string(),
            step_timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Step 1: distill the raw task prompt into a structured intent.
    pub async fn extract_intent(&self, prompt: &str) -> Result<ExtractedIntent, SpecialistError> {
        let messages = vec![
            ChatMessage::system(
                "You analyze software development task descriptions. \
                 Extract the intent of the task and record it with the provided tool. \
                 Be literal: only report frameworks, package managers, and components \
                 the task actually mentions or clearly implies.",
            ),
            ChatMessage::user(prompt),
        ];
        let tool = intent_tool();

        let call = tokio::time::timeout(
            self.step_timeout,
            self.adapter
                .complete_with_forced_tool(&self.model, messages, &tool),
        )
        .await
        .map_err(|_| SpecialistError::StepTimeout {
            seconds: self.step_timeout.as_secs(),
        })?
        .map_err(|e| SpecialistError::IntentExtraction(e.to_string()))?;

        serde_json::from_str(&call.arguments)
            .map_err(|e| SpecialistError::IntentExtraction(format!("malformed arguments: {}", e)))
    }

    /// Step 2: pick the prompt variants and documentation that fit the intent.
    pub async fn select_components(
        &self,
        intent: &ExtractedIntent,
        template: &SpecialistTemplate,
        target_model: Option<&str>,
    ) -> Result<SpecialistSelection, SpecialistError> {
        let summary = template_summary(template);
        let intent_json = serde_json::to_string_pretty(intent)?;
        let model_note = match target_model {
            Some(model) => format!(
                "The downstream agent runs on '{}'; prefer model_specific \
                 variants for that model when the template has them.",
                model
            ),
            None => "No downstream model is pinned; use default variants.".to_string(),
        };

        let messages = vec![
            ChatMessage::system(
                "You match a development task to the prompt components of a \
                 specialist template. Prompt ids use the forms \
                 'taskType.default.key' and 'taskType.model_specific.modelKey.key'. \
                 Pick exactly one spawner prompt id and one task prompt id from \
                 the ids listed in the template summary.",
            ),
            ChatMessage::user(format!(
                "Task intent:\n{}\n\nTemplate summary:\n{}\n\n{}",
                intent_json, summary, model_note
            )),
        ];
        let tool = selection_tool();

        let call = tokio::time::timeout(
            self.step_timeout,
            self.adapter
                .complete_with_forced_tool(&self.model, messages, &tool),
        )
        .await
        .map_err(|_| SpecialistError::StepTimeout {
            seconds: self.step_timeout.as_secs(),
        })?
        .map_err(|e| SpecialistError::ComponentSelection(e.to_string()))?;

        serde_json::from_str(&call.arguments)
            .map_err(|e| SpecialistError::ComponentSelection(format!("malformed arguments: {}", e)))
    }
}

/// Step 3: resolve the selected prompt ids, substitute variables, and
/// concatenate spawner + task + documentation section.
pub fn compose_system_prompt(
    template: &SpecialistTemplate,
    intent: &ExtractedIntent,
    selection: &SpecialistSelection,
) -> Result<String, SpecialistError> {
    let spawner_id = PromptId::parse(&selection.spawner_prompt_id)?;
    let task_id = PromptId::parse(&selection.task_prompt_id)?;

    // Lookup falls back from a model-specific variant to the task type's
    // default variant before failing.
    let spawner_text = template.prompt_by_id(&spawner_id).map_err(SpecialistError::from)?;
    let task_text = template.prompt_by_id(&task_id).map_err(SpecialistError::from)?;

    let context = substitution_context(template, intent, selection);
    let spawner = substitute(spawner_text, &context)?;
    let task = substitute(task_text, &context)?;

    let docs = selected_documentation(template, selection);
    let doc_section = compose_documentation_section(&docs);

    let mut prompt = format!("{}\n\n{}", spawner.trim_end(), task.trim_end());
    if !doc_section.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&doc_section);
    }
    Ok(prompt)
}

/// Builds the substitution context shared by the spawner and task prompts.
pub fn substitution_context(
    template: &SpecialistTemplate,
    intent: &ExtractedIntent,
    selection: &SpecialistSelection,
) -> Context {
    let mut context = Context::new();
    context.insert("primary_goal", &intent.primary_goal);
    context.insert("category", &intent.category);
    context.insert("keywords", &intent.keywords.join(", "));
    context.insert("framework", intent.framework.as_deref().unwrap_or(""));
    context.insert(
        "package_manager",
        intent.package_manager.as_deref().unwrap_or(""),
    );
    context.insert("components", &intent.components.join(", "));
    context.insert("features", &intent.features.join(", "));
    context.insert("tags", &selection.tags.join(", "));
    context.insert("tech_stack", &selection.tech_stack.join(", "));
    context.insert("template_name", &template.name);
    context.insert(
        "template_version",
        template.version.as_deref().unwrap_or(""),
    );
    context
}

/// Renders one prompt body with Tera.
pub fn substitute(text: &str, context: &Context) -> Result<String, SpecialistError> {
    Tera::one_off(text, context, false).map_err(|e| SpecialistError::Substitution(e.to_string()))
}

/// Filters the template's documentation down to the references the
/// selection asked for. Matching is by title or URL, case-insensitive.
pub fn selected_documentation<'a>(
    template: &'a SpecialistTemplate,
    selection: &SpecialistSelection,
) -> Vec<&'a DocumentationRef> {
    if selection.documentation.is_empty() {
        return Vec::new();
    }
    let wanted: Vec<String> = selection
        .documentation
        .iter()
        .map(|d| d.to_lowercase())
        .collect();
    template
        .documentation
        .iter()
        .filter(|doc| {
            wanted.contains(&doc.title.to_lowercase()) || wanted.contains(&doc.url.to_lowercase())
        })
        .collect()
}

/// Renders the mandatory-reading section appended to composed prompts.
/// Empty input yields an empty string so callers can skip the section.
pub fn compose_documentation_section(docs: &[&DocumentationRef]) -> String {
    if docs.is_empty() {
        return String::new();
    }

    let mut section = format!("MANDATORY: you {}.\n", DOC_REQUIREMENT_MARKER);
    for doc in docs {
        section.push_str(&format!("\n- {}: {}\n", doc.title, doc.url));
        if let Some(summary) = &doc.summary {
            section.push_str(&format!("  Summary: {}\n", summary));
        }
        if !doc.key_concepts.is_empty() {
            section.push_str(&format!(
                "  Key concepts: {}\n",
                doc.key_concepts.join(", ")
            ));
        }
        for pattern in &doc.code_patterns {
            section.push_str(&format!("  Pattern: {}\n", pattern));
        }
    }
    section.trim_end().to_string()
}

/// Compact textual summary of a template fed to the selection step.
fn template_summary(template: &SpecialistTemplate) -> String {
    let mut lines = vec![format!("Template: {}", template.name)];
    if !template.tags.is_empty() {
        lines.push(format!("Tags: {}", template.tags.join(", ")));
    }
    if !template.tech_stack.is_empty() {
        lines.push(format!("Tech stack: {}", template.tech_stack.join(", ")));
    }

    lines.push("Prompt ids:".to_string());
    for (task_type, prompts) in &template.prompts.0 {
        for key in prompts.default.keys() {
            lines.push(format!("  {}.default.{}", task_type, key));
        }
        for (model_key, variants) in &prompts.model_specific {
            for key in variants.keys() {
                lines.push(format!("  {}.model_specific.{}.{}", task_type, model_key, key));
            }
        }
    }

    if !template.documentation.is_empty() {
        lines.push("Documentation:".to_string());
        for doc in &template.documentation {
            lines.push(format!("  {} ({})", doc.title, doc.url));
        }
    }
    lines.join("\n")
}

fn intent_tool() -> ToolDefinition {
    ToolDefinition::new(
        "record_intent",
        "Record the structured intent extracted from a development task.",
        json!({
            "type": "object",
            "properties": {
                "primary_goal": {
                    "type": "string",
                    "description": "One sentence stating what the task asks for"
                },
                "category": {
                    "type": "string",
                    "description": "Free-form category such as feature, bugfix, refactor, scaffold"
                },
                "keywords": {
                    "type": "array",
                    "items": {"type": "string"}
                },
                "framework": {
                    "type": "string",
                    "description": "Framework the task targets, if identifiable"
                },
                "package_manager": {"type": "string"},
                "components": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Concrete components or files the task touches"
                },
                "features": {
                    "type": "array",
                    "items": {"type": "string"}
                }
            },
            "required": ["primary_goal", "category", "keywords"]
        }),
    )
}

fn selection_tool() -> ToolDefinition {
    ToolDefinition::new(
        "select_components",
        "Record which template components match the task intent.",
        json!({
            "type": "object",
            "properties": {
                "spawner_prompt_id": {
                    "type": "string",
                    "description": "Prompt id for the spawner prompt, from the listed ids"
                },
                "task_prompt_id": {
                    "type": "string",
                    "description": "Prompt id for the task prompt, from the listed ids"
                },
                "tags": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Template tags relevant to this task"
                },
                "tech_stack": {
                    "type": "array",
                    "items": {"type": "string"}
                },
                "documentation": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Titles of documentation references the agent should read"
                },
                "reasoning": {"type": "string"}
            },
            "required": ["spawner_prompt_id", "task_prompt_id", "reasoning"]
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateError;
    use crate::specialist::template::{PromptTree, TaskPrompts};
    use std::collections::BTreeMap;

    fn sample_template() -> SpecialistTemplate {
        let mut default = BTreeMap::new();
        default.insert(
            "spawner".to_string(),
            "You are a {{ framework }} specialist working on {{ primary_goal }}.".to_string(),
        );
        default.insert(
            "task".to_string(),
            "Complete the task using {{ package_manager }}. Keywords: {{ keywords }}.".to_string(),
        );

        let mut model_specific = BTreeMap::new();
        let mut kimi = BTreeMap::new();
        kimi.insert(
            "task".to_string(),
            "Kimi-tuned task for {{ template_name }}.".to_string(),
        );
        model_specific.insert("moonshotai/kimi-k2.5".to_string(), kimi);

        let mut tree = BTreeMap::new();
        tree.insert(
            "general".to_string(),
            TaskPrompts {
                default,
                model_specific,
            },
        );

        SpecialistTemplate {
            name: "react-specialist".to_string(),
            version: Some("2.1.0".to_string()),
            prompts: PromptTree(tree),
            documentation: vec![DocumentationRef {
                title: "React Router".to_string(),
                url: "https://reactrouter.com/docs".to_string(),
                summary: Some("Client-side routing".to_string()),
                key_concepts: vec!["loaders".to_string(), "actions".to_string()],
                code_patterns: vec!["createBrowserRouter([...])".to_string()],
            }],
            tags: vec!["react".to_string()],
            tech_stack: vec!["typescript".to_string()],
            ..Default::default()
        }
    }

    fn sample_intent() -> ExtractedIntent {
        ExtractedIntent {
            primary_goal: "add a settings page".to_string(),
            category: "feature".to_string(),
            keywords: vec!["routing".to_string(), "forms".to_string()],
            framework: Some("react".to_string()),
            package_manager: Some("npm".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_prompt_cache_key_is_stable() {
        let a = prompt_cache_key("build a todo app");
        let b = prompt_cache_key("build a todo app");
        let c = prompt_cache_key("build a different app");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_compose_substitutes_and_concatenates() {
        let template = sample_template();
        let selection = SpecialistSelection {
            spawner_prompt_id: "general.default.spawner".to_string(),
            task_prompt_id: "general.default.task".to_string(),
            documentation: vec!["React Router".to_string()],
            ..Default::default()
        };

        let prompt = compose_system_prompt(&template, &sample_intent(), &selection).unwrap();
        assert!(prompt.contains("react specialist working on add a settings page"));
        assert!(prompt.contains("using npm"));
        assert!(prompt.contains("Keywords: routing, forms"));
        assert!(prompt.contains(DOC_REQUIREMENT_MARKER));
        assert!(prompt.contains("https://reactrouter.com/docs"));
        assert!(prompt.contains("Key concepts: loaders, actions"));
    }

    #[test]
    fn test_compose_without_documentation_omits_marker() {
        let template = sample_template();
        let selection = SpecialistSelection {
            spawner_prompt_id: "general.default.spawner".to_string(),
            task_prompt_id: "general.default.task".to_string(),
            ..Default::default()
        };

        let prompt = compose_system_prompt(&template, &sample_intent(), &selection).unwrap();
        assert!(!prompt.contains(DOC_REQUIREMENT_MARKER));
    }

    #[test]
    fn test_compose_uses_model_specific_variant() {
        let template = sample_template();
        let selection = SpecialistSelection {
            spawner_prompt_id: "general.model_specific.moonshotai/kimi-k2.5.spawner".to_string(),
            task_prompt_id: "general.model_specific.moonshotai/kimi-k2.5.task".to_string(),
            ..Default::default()
        };

        let prompt = compose_system_prompt(&template, &sample_intent(), &selection).unwrap();
        // The task prompt has a model-specific variant; the spawner does not
        // and falls back to the default variant.
        assert!(prompt.contains("Kimi-tuned task for react-specialist."));
        assert!(prompt.contains("react specialist working on add a settings page"));
    }

    #[test]
    fn test_compose_unknown_key_fails() {
        let template = sample_template();
        let selection = SpecialistSelection {
            spawner_prompt_id: "general.default.spawner".to_string(),
            task_prompt_id: "general.model_specific.moonshotai/kimi-k2.5.missing".to_string(),
            ..Default::default()
        };

        let result = compose_system_prompt(&template, &sample_intent(), &selection);
        assert!(matches!(
            result,
            Err(SpecialistError::Template(TemplateError::PromptNotFound(_)))
        ));
    }

    #[test]
    fn test_compose_rejects_malformed_id() {
        let template = sample_template();
        let selection = SpecialistSelection {
            spawner_prompt_id: "not-a-prompt-id".to_string(),
            task_prompt_id: "general.default.task".to_string(),
            ..Default::default()
        };

        let result = compose_system_prompt(&template, &sample_intent(), &selection);
        assert!(matches!(
            result,
            Err(SpecialistError::Template(
                TemplateError::MalformedPromptId(_)
            ))
        ));
    }

    #[test]
    fn test_selected_documentation_matches_title_or_url() {
        let template = sample_template();

        let by_title = SpecialistSelection {
            documentation: vec!["react router".to_string()],
            ..Default::default()
        };
        assert_eq!(selected_documentation(&template, &by_title).len(), 1);

        let by_url = SpecialistSelection {
            documentation: vec!["https://reactrouter.com/docs".to_string()],
            ..Default::default()
        };
        assert_eq!(selected_documentation(&template, &by_url).len(), 1);

        let nothing = SpecialistSelection::default();
        assert!(selected_documentation(&template, &nothing).is_empty());
    }

    #[test]
    fn test_template_summary_lists_prompt_ids() {
        let summary = template_summary(&sample_template());
        assert!(summary.contains("general.default.spawner"));
        assert!(summary.contains("general.model_specific.moonshotai/kimi-k2.5.task"));
        assert!(summary.contains("React Router (https://reactrouter.com/docs)"));
    }

    #[test]
    fn test_intent_deserializes_with_missing_fields() {
        let intent: ExtractedIntent =
            serde_json::from_str(r#"{"primary_goal": "fix the build", "category": "bugfix"}"#)
                .unwrap();
        assert_eq!(intent.primary_goal, "fix the build");
        assert!(intent.keywords.is_empty());
        assert!(intent.framework.is_none());
    }
}
