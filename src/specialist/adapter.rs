//! Decorator that turns any agent adapter into a specialist.
//!
//! [`SpecialistAdapter`] wraps an inner [`AgentAdapter`]. Before delegating
//! a request it composes a system prompt from its template — via the LLM
//! pipeline or a static heuristic path — and injects it. The user message
//! content passes through byte-for-byte; only the system message changes,
//! so baseline and specialist runs stay comparable.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{AgentError, SpecialistError};
use crate::llm::{AgentAdapter, AgentRequest, AgentResponse, OpenRouterAdapter};
use crate::specialist::pipeline::{
    compose_documentation_section, prompt_cache_key, substitute, substitution_context,
    ExtractedIntent, SpecialistPipeline, SpecialistSelection, DOC_REQUIREMENT_MARKER,
};
use crate::specialist::template::{
    SpecialistMode, SpecialistTemplate, GENERAL_TASK_TYPE, SPAWNER_KEY, TASK_KEY,
};

/// Wraps an agent adapter with template-driven prompt composition.
pub struct SpecialistAdapter {
    template: SpecialistTemplate,
    inner: Arc<dyn AgentAdapter>,
    pipeline: Option<SpecialistPipeline>,
    mode: SpecialistMode,
    fallback_enabled: bool,
    validation_mode: bool,
    /// Model id the wrapped adapter runs on, used to pick model-specific
    /// prompt variants.
    target_model: Option<String>,
    cache: Mutex<HashMap<String, (ExtractedIntent, SpecialistSelection)>>,
}

impl SpecialistAdapter {
    /// Creates an adapter in the mode the template's `llm_config` asks for
    /// (LLM pipeline by default). The pipeline itself is attached separately
    /// via [`with_pipeline_adapter`](Self::with_pipeline_adapter).
    pub fn new(template: SpecialistTemplate, inner: Arc<dyn AgentAdapter>) -> Self {
        let config = template.llm_config.clone().unwrap_or_default();
        Self {
            mode: config.mode.unwrap_or(SpecialistMode::Llm),
            fallback_enabled: config.fallback_enabled.unwrap_or(true),
            validation_mode: false,
            target_model: None,
            cache: Mutex::new(HashMap::new()),
            template,
            inner,
            pipeline: None,
        }
    }

    /// Attaches the vendor adapter used for the extraction/selection steps,
    /// applying the template's pipeline model and timeout overrides.
    pub fn with_pipeline_adapter(mut self, adapter: OpenRouterAdapter) -> Self {
        let config = self.template.llm_config.clone().unwrap_or_default();
        let mut pipeline = SpecialistPipeline::new(adapter);
        if let Some(model) = config.pipeline_model {
            pipeline = pipeline.with_model(model);
        }
        if let Some(secs) = config.step_timeout_secs {
            pipeline = pipeline.with_step_timeout(Duration::from_secs(secs));
        }
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_mode(mut self, mode: SpecialistMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    /// In validation mode, requests whose system message already carries the
    /// documentation marker pass through unchanged. Used to replay exported
    /// prompts without recomposing them.
    pub fn with_validation_mode(mut self, enabled: bool) -> Self {
        self.validation_mode = enabled;
        self
    }

    pub fn with_target_model(mut self, model: impl Into<String>) -> Self {
        self.target_model = Some(model.into());
        self
    }

    pub fn template(&self) -> &SpecialistTemplate {
        &self.template
    }

    async fn llm_system_prompt(&self, user_prompt: &str) -> Result<String, SpecialistError> {
        let pipeline = self.pipeline.as_ref().ok_or_else(|| {
            SpecialistError::IntentExtraction("no pipeline adapter configured".to_string())
        })?;

        let key = prompt_cache_key(user_prompt);
        let cached = { self.cache.lock().await.get(&key).cloned() };

        let (intent, selection) = match cached {
            Some(pair) => {
                debug!(template = %self.template.name, "reusing cached intent and selection");
                pair
            }
            None => {
                let intent = pipeline.extract_intent(user_prompt).await?;
                debug!(
                    template = %self.template.name,
                    category = %intent.category,
                    "extracted task intent"
                );
                let selection = pipeline
                    .select_components(&intent, &self.template, self.target_model.as_deref())
                    .await?;
                debug!(
                    template = %self.template.name,
                    spawner = %selection.spawner_prompt_id,
                    task = %selection.task_prompt_id,
                    "selected prompt components"
                );
                let mut cache = self.cache.lock().await;
                cache.insert(key, (intent.clone(), selection.clone()));
                (intent, selection)
            }
        };

        crate::specialist::pipeline::compose_system_prompt(&self.template, &intent, &selection)
    }

    /// Static path: no pipeline calls. Picks a task type by simple keyword
    /// matching, substitutes the conventional spawner/task prompts with
    /// locally derived context, and appends every documentation reference.
    fn static_system_prompt(&self, user_prompt: &str) -> Result<String, SpecialistError> {
        let task_type = self.static_task_type(user_prompt);
        let intent = self.static_intent(user_prompt);
        let selection = SpecialistSelection {
            tags: self.template.tags.clone(),
            tech_stack: self.template.tech_stack.clone(),
            reasoning: "static resolution".to_string(),
            ..Default::default()
        };
        let context = substitution_context(&self.template, &intent, &selection);

        let mut parts = Vec::new();
        for key in [SPAWNER_KEY, TASK_KEY] {
            if let Some(text) =
                self.template
                    .get_prompt(&task_type, self.target_model.as_deref(), key)
            {
                parts.push(substitute(text, &context)?);
            }
        }
        if parts.is_empty() {
            // Template uses unconventional keys; take the first default variant.
            if let Some(text) = self
                .template
                .prompts
                .0
                .get(&task_type)
                .and_then(|p| p.default.values().next())
            {
                parts.push(substitute(text, &context)?);
            }
        }
        if parts.is_empty() {
            return Err(SpecialistError::Substitution(format!(
                "template '{}' has no usable prompt for task type '{}'",
                self.template.name, task_type
            )));
        }

        let docs: Vec<_> = self.template.documentation.iter().collect();
        let doc_section = compose_documentation_section(&docs);

        let mut prompt = parts.join("\n\n");
        if !doc_section.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&doc_section);
        }
        Ok(prompt)
    }

    fn static_task_type(&self, prompt: &str) -> String {
        let lowered = prompt.to_lowercase();
        let task_types = self.template.task_types();
        task_types
            .iter()
            .copied()
            .find(|t| *t != GENERAL_TASK_TYPE && lowered.contains(&t.to_lowercase()))
            .or_else(|| task_types.iter().copied().find(|t| *t == GENERAL_TASK_TYPE))
            .or_else(|| task_types.first().copied())
            .unwrap_or(GENERAL_TASK_TYPE)
            .to_string()
    }

    fn static_intent(&self, prompt: &str) -> ExtractedIntent {
        let lowered = prompt.to_lowercase();
        let primary_goal: String = prompt.lines().next().unwrap_or("").chars().take(160).collect();
        let keywords = self
            .template
            .tags
            .iter()
            .filter(|tag| lowered.contains(&tag.to_lowercase()))
            .cloned()
            .collect();
        let framework = self
            .template
            .tech_stack
            .iter()
            .find(|entry| lowered.contains(&entry.to_lowercase()))
            .cloned();
        ExtractedIntent {
            primary_goal,
            category: GENERAL_TASK_TYPE.to_string(),
            keywords,
            framework,
            ..Default::default()
        }
    }

    fn pipeline_error(&self, source: SpecialistError) -> AgentError {
        AgentError::PromptComposition(Box::new(SpecialistError::Pipeline {
            template: self.template.name.clone(),
            adapter: self.inner.name(),
            source: Box::new(source),
        }))
    }
}

#[async_trait]
impl AgentAdapter for SpecialistAdapter {
    fn name(&self) -> String {
        format!("{}+{}", self.template.name, self.inner.name())
    }

    async fn send(&self, mut request: AgentRequest) -> Result<AgentResponse, AgentError> {
        if self.validation_mode {
            if let Some(system) = request.system_content() {
                if system.contains(DOC_REQUIREMENT_MARKER) {
                    debug!(
                        template = %self.template.name,
                        "system prompt already composed; passing through"
                    );
                    return self.inner.send(request).await;
                }
            }
        }

        let user_prompt = request.last_user_content().unwrap_or_default().to_string();

        let system_prompt = match self.mode {
            SpecialistMode::Static => self.static_system_prompt(&user_prompt),
            SpecialistMode::Llm => match self.llm_system_prompt(&user_prompt).await {
                Ok(prompt) => Ok(prompt),
                Err(e) if self.fallback_enabled => {
                    warn!(
                        template = %self.template.name,
                        error = %e,
                        "prompt pipeline failed; using static fallback"
                    );
                    self.static_system_prompt(&user_prompt)
                }
                Err(e) => Err(e),
            },
        }
        .map_err(|e| self.pipeline_error(e))?;

        request.replace_system_message(system_prompt);
        self.inner.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use crate::specialist::template::{PromptTree, TaskPrompts};
    use std::collections::BTreeMap;

    struct CapturingAdapter {
        requests: Mutex<Vec<AgentRequest>>,
    }

    impl CapturingAdapter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
            })
        }

        async fn last_request(&self) -> AgentRequest {
            self.requests
                .lock()
                .await
                .last()
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl AgentAdapter for CapturingAdapter {
        fn name(&self) -> String {
            "capture".to_string()
        }

        async fn send(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
            self.requests.lock().await.push(request);
            Ok(AgentResponse {
                content: "done".to_string(),
                input_tokens: 1,
                output_tokens: 1,
                cost_usd: 0.0,
                tool_calls: 0,
            })
        }
    }

    fn test_template() -> SpecialistTemplate {
        let mut default = BTreeMap::new();
        default.insert(
            SPAWNER_KEY.to_string(),
            "You are a {{ template_name }} specialist.".to_string(),
        );
        default.insert(
            TASK_KEY.to_string(),
            "Work on: {{ primary_goal }}".to_string(),
        );

        let mut tree = BTreeMap::new();
        tree.insert(
            GENERAL_TASK_TYPE.to_string(),
            TaskPrompts {
                default,
                model_specific: BTreeMap::new(),
            },
        );

        SpecialistTemplate {
            name: "vue-specialist".to_string(),
            prompts: PromptTree(tree),
            tags: vec!["vue".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_static_mode_injects_system_prompt() {
        let inner = CapturingAdapter::new();
        let adapter = SpecialistAdapter::new(test_template(), inner.clone())
            .with_mode(SpecialistMode::Static);

        let request = AgentRequest::new(vec![ChatMessage::user("Add a vue component")]);
        let response = adapter.send(request).await.unwrap();
        assert_eq!(response.content, "done");

        let seen = inner.last_request().await;
        let system = seen.system_content().unwrap();
        assert!(system.contains("vue-specialist specialist"));
        assert!(system.contains("Work on: Add a vue component"));
        assert_eq!(seen.last_user_content(), Some("Add a vue component"));
    }

    #[tokio::test]
    async fn test_llm_mode_without_pipeline_falls_back_to_static() {
        let inner = CapturingAdapter::new();
        // LLM mode but no pipeline attached: the pipeline step fails and the
        // fallback path must still produce a composed prompt.
        let adapter = SpecialistAdapter::new(test_template(), inner.clone());

        let request = AgentRequest::new(vec![ChatMessage::user("Fix the router")]);
        adapter.send(request).await.unwrap();

        let seen = inner.last_request().await;
        assert!(seen.system_content().unwrap().contains("Fix the router"));
    }

    #[tokio::test]
    async fn test_llm_mode_without_fallback_propagates_error() {
        let inner = CapturingAdapter::new();
        let adapter =
            SpecialistAdapter::new(test_template(), inner.clone()).with_fallback(false);

        let request = AgentRequest::new(vec![ChatMessage::user("Fix the router")]);
        let result = adapter.send(request).await;

        match result {
            Err(AgentError::PromptComposition(boxed)) => {
                let text = boxed.to_string();
                assert!(text.contains("vue-specialist"));
                assert!(text.contains("capture"));
            }
            other => panic!("unexpected result: {:?}", other.map(|r| r.content)),
        }
        assert!(inner.requests.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_validation_mode_passes_composed_prompts_through() {
        let inner = CapturingAdapter::new();
        let adapter = SpecialistAdapter::new(test_template(), inner.clone())
            .with_mode(SpecialistMode::Static)
            .with_validation_mode(true);

        let composed = format!("Existing prompt. You {}.", DOC_REQUIREMENT_MARKER);
        let request = AgentRequest::new(vec![
            ChatMessage::system(&composed),
            ChatMessage::user("replay this"),
        ]);
        adapter.send(request).await.unwrap();

        let seen = inner.last_request().await;
        assert_eq!(seen.system_content(), Some(composed.as_str()));
    }

    #[tokio::test]
    async fn test_composite_name() {
        let inner = CapturingAdapter::new();
        let adapter = SpecialistAdapter::new(test_template(), inner);
        assert_eq!(adapter.name(), "vue-specialist+capture");
    }

    #[test]
    fn test_static_task_type_prefers_mentioned_type() {
        let mut template = test_template();
        let mut default = BTreeMap::new();
        default.insert(TASK_KEY.to_string(), "Debug it.".to_string());
        template.prompts.0.insert(
            "debugging".to_string(),
            TaskPrompts {
                default,
                model_specific: BTreeMap::new(),
            },
        );

        let inner = CapturingAdapter::new();
        let adapter = SpecialistAdapter::new(template, inner);
        assert_eq!(
            adapter.static_task_type("Help with debugging the build"),
            "debugging"
        );
        assert_eq!(adapter.static_task_type("Add a page"), GENERAL_TASK_TYPE);
    }
}
