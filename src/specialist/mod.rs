//! Specialist templates and template-driven prompt composition.
//!
//! A specialist is a reusable persona for a family of tasks (say, React
//! frontend work): a YAML template carrying prompt variants, documentation
//! references, and tool dependencies. At run time the template wraps a
//! plain agent adapter and composes the system prompt the wrapped model
//! sees, either through a small LLM pipeline or a static heuristic path.
//!
//! - [`template`] — the template schema, prompt tree, and inheritance merge.
//! - [`resolver`] — loading: enriched-variant substitution and `extends`
//!   chain flattening.
//! - [`pipeline`] — the intent → selection → composition steps.
//! - [`adapter`] — the [`AgentAdapter`](crate::llm::AgentAdapter) decorator
//!   that injects the composed prompt.

pub mod adapter;
pub mod pipeline;
pub mod resolver;
pub mod template;

pub use adapter::SpecialistAdapter;
pub use pipeline::{
    compose_system_prompt, prompt_cache_key, ExtractedIntent, SpecialistPipeline,
    SpecialistSelection, DEFAULT_PIPELINE_MODEL, DOC_REQUIREMENT_MARKER,
};
pub use resolver::{find_template, load};
pub use template::{
    DocumentationRef, PromptId, PromptTree, SpecialistMode, SpecialistTemplate, TaskPrompts,
};
