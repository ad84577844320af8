//! LLM integration for benchforge.
//!
//! This module provides the agent-adapter abstraction benchmark runs are
//! built on: a vendor-backed adapter executes the multi-turn tool-calling
//! loop, and everything above it (orchestrator, specialist wrapper, batch
//! runner) talks to the [`AgentAdapter`] trait only.
//!
//! ```ignore
//! use benchforge::llm::{AgentAdapter, AgentRequest, ChatMessage, OpenRouterAdapter};
//!
//! let adapter = OpenRouterAdapter::from_env(Some("openai/gpt-4o-mini"))?;
//! let request = AgentRequest::new(vec![ChatMessage::user("Summarize this repo")]);
//! let response = adapter.send(request).await?;
//! println!("{} (${:.4})", response.content, response.cost_usd);
//! ```
//!
//! # Tool-call fallback
//!
//! Backends without native tool calling often emit the call as JSON in the
//! message content; [`parser::parse_tool_calls`] recovers those so the loop
//! behaves identically either way.
//!
//! # Pricing
//!
//! Cost estimation goes through a shared [`PricingCache`]: cache hit, then a
//! background refresh from the vendor model listing, then a static per-family
//! fallback table. A missing price never blocks or fails a run.

pub mod adapter;
pub mod openrouter;
pub mod parser;
pub mod pricing;
pub mod types;

pub use adapter::{resolve_model, AgentAdapter, ModelSource};
pub use openrouter::{OpenRouterAdapter, DEFAULT_MODEL, MAX_TOOL_ITERATIONS, OPENROUTER_BASE_URL};
pub use parser::parse_tool_calls;
pub use pricing::{ModelPricing, PricingCache};
pub use types::{
    AgentRequest, AgentResponse, ChatMessage, MessageRole, TokenUsage, ToolCall, ToolDefinition,
    ToolHandler, ToolHandlerMap,
};
