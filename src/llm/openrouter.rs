//! OpenRouter agent adapter.
//!
//! OpenRouter fronts many upstream model providers behind one
//! chat-completion endpoint, which is what makes it suitable as the
//! default benchmark backend: one adapter, any model id.
//!
//! The adapter owns the multi-turn tool-calling loop: it sends the
//! conversation, executes whatever tool calls come back through the
//! caller-supplied handler map, appends the results, and repeats until
//! the model answers without tools or the iteration bound is hit.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::llm::adapter::{resolve_model, AgentAdapter, ModelSource};
use crate::llm::parser::parse_tool_calls;
use crate::llm::pricing::PricingCache;
use crate::llm::types::{
    AgentRequest, AgentResponse, ChatMessage, MessageRole, TokenUsage, ToolCall, ToolDefinition,
    ToolHandlerMap,
};

/// Default OpenRouter API endpoint.
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Model used when neither the caller nor the environment names one.
pub const DEFAULT_MODEL: &str = "moonshotai/kimi-k2.5";

/// Environment variable consulted when no model parameter is given.
pub const MODEL_ENV_VAR: &str = "BENCH_AGENT_MODEL";

/// Upper bound on tool-calling turns within a single `send`.
pub const MAX_TOOL_ITERATIONS: u32 = 50;

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Agent adapter backed by the OpenRouter chat-completion API.
pub struct OpenRouterAdapter {
    /// HTTP client for making API requests.
    client: Client,
    /// API key for OpenRouter authentication.
    api_key: String,
    /// Base URL for the OpenRouter API.
    base_url: String,
    /// Resolved model id for this adapter instance.
    model: String,
    /// Where the model id came from (parameter, environment, default).
    model_source: ModelSource,
    /// Hard bound on tool-calling turns.
    max_iterations: u32,
    /// Sampling temperature forwarded verbatim when set.
    temperature: Option<f64>,
    /// Completion token cap forwarded verbatim when set.
    max_tokens: Option<u32>,
    /// Shared pricing cache for cost estimation.
    pricing: PricingCache,
    /// Model-id prefix → upstream provider the request must be pinned to.
    provider_pins: Vec<(String, String)>,
}

impl OpenRouterAdapter {
    /// Create an adapter, resolving the model from the `requested` parameter,
    /// then [`MODEL_ENV_VAR`], then [`DEFAULT_MODEL`].
    pub fn new(api_key: String, requested_model: Option<&str>) -> Self {
        let (model, model_source) = resolve_model(requested_model, MODEL_ENV_VAR, DEFAULT_MODEL);
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            api_key,
            base_url: OPENROUTER_BASE_URL.to_string(),
            model,
            model_source,
            max_iterations: MAX_TOOL_ITERATIONS,
            temperature: None,
            max_tokens: None,
            pricing: PricingCache::default(),
            // Kimi models route through third-party hosts with degraded tool
            // calling unless pinned to the first-party provider.
            provider_pins: vec![("moonshotai/".to_string(), "moonshotai".to_string())],
        }
    }

    /// Create an adapter from `OPENROUTER_API_KEY`.
    pub fn from_env(requested_model: Option<&str>) -> Result<Self, AgentError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(AgentError::MissingApiKey)?;
        Ok(Self::new(api_key, requested_model))
    }

    /// Override the base URL (testing, OpenRouter-compatible proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the tool-calling iteration bound.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the completion token cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Share a pricing cache across adapters (batch runs reuse one cache).
    pub fn with_pricing_cache(mut self, pricing: PricingCache) -> Self {
        self.pricing = pricing;
        self
    }

    /// Pin models whose id starts with `prefix` to a specific upstream
    /// provider, in addition to the built-in pins.
    pub fn with_provider_pin(
        mut self,
        prefix: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        self.provider_pins.push((prefix.into(), provider.into()));
        self
    }

    /// Resolved model id.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Where the model id came from.
    pub fn model_source(&self) -> ModelSource {
        self.model_source
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the API key (for debugging, returns masked value).
    pub fn api_key_masked(&self) -> String {
        if self.api_key.len() <= 8 {
            "*".repeat(self.api_key.len())
        } else {
            format!(
                "{}...{}",
                &self.api_key[..4],
                &self.api_key[self.api_key.len() - 4..]
            )
        }
    }

    /// Single-shot completion that forces the model to call `tool`.
    ///
    /// Used by the specialist pipeline, where each step must come back as
    /// one structured call rather than free text. Falls back to parsing the
    /// content when the backend ignores `tool_choice` and answers in JSON.
    pub async fn complete_with_forced_tool(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tool: &ToolDefinition,
    ) -> Result<ToolCall, AgentError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ApiRequest {
            model: model.to_string(),
            messages: messages.iter().map(ApiMessage::from_chat).collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: Some(vec![tool.to_openai_schema()]),
            tool_choice: Some(json!({
                "type": "function",
                "function": { "name": tool.name },
            })),
            provider: self.provider_routing(model),
        };

        let response = self.execute_request(&url, &request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(AgentError::EmptyResponse)?;

        let content = choice.message.content.clone().unwrap_or_default();
        let mut calls = convert_tool_calls(choice.message.tool_calls);
        if calls.is_empty() {
            calls = parse_tool_calls(&content);
        }

        calls
            .into_iter()
            .find(|call| call.name == tool.name)
            .ok_or_else(|| {
                AgentError::ParseError(format!(
                    "model '{}' did not produce the required '{}' call",
                    model, tool.name
                ))
            })
    }

    /// Provider-routing hint for `model`, if a pin matches its prefix.
    fn provider_routing(&self, model: &str) -> Option<ProviderRouting> {
        self.provider_pins
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix.as_str()))
            .map(|(_, provider)| ProviderRouting {
                order: vec![provider.clone()],
                allow_fallbacks: false,
            })
    }

    fn build_request(&self, messages: Vec<ApiMessage>, tools: Option<&[Value]>) -> ApiRequest {
        ApiRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: tools.map(|defs| defs.to_vec()),
            tool_choice: None,
            provider: self.provider_routing(&self.model),
        }
    }

    /// Execute a single request (no retry logic; retry is the caller's call).
    async fn execute_request(
        &self,
        url: &str,
        request: &ApiRequest,
    ) -> Result<ApiResponse, AgentError> {
        let http_response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", "https://benchforge.local")
            .header("X-Title", "benchforge")
            .json(request)
            .send()
            .await?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                if status_code == 429 {
                    return Err(AgentError::RateLimited(error_response.error.message));
                }
                return Err(AgentError::ApiError {
                    code: status_code,
                    message: error_response.error.message,
                });
            }

            return Err(AgentError::ApiError {
                code: status_code,
                message: error_text,
            });
        }

        http_response
            .json()
            .await
            .map_err(|e| AgentError::ParseError(format!("Failed to parse API response: {}", e)))
    }

    /// Estimate run cost from accumulated usage, kicking off a background
    /// pricing refresh on a cache miss so the next run resolves exactly.
    async fn estimate_cost(&self, usage: &TokenUsage) -> f64 {
        if self.pricing.lookup(&self.model).await.is_none() {
            self.pricing.spawn_refresh(
                self.client.clone(),
                self.base_url.clone(),
                self.api_key.clone(),
            );
        }
        self.pricing.resolve(&self.model).await.estimate_cost(usage)
    }
}

#[async_trait]
impl AgentAdapter for OpenRouterAdapter {
    fn name(&self) -> String {
        "openrouter".to_string()
    }

    async fn send(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut messages: Vec<ApiMessage> =
            request.messages.iter().map(ApiMessage::from_chat).collect();
        let tool_schemas: Option<Vec<Value>> = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(ToolDefinition::to_openai_schema)
                    .collect(),
            )
        };

        let mut usage = TokenUsage::default();
        let mut executed_calls: u32 = 0;

        for iteration in 0..self.max_iterations {
            // Tool definitions ride along on every turn; some backends drop
            // them from the session state between turns.
            let body = self.build_request(messages.clone(), tool_schemas.as_deref());
            let response = match self.execute_request(&url, &body).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(
                        model = %self.model,
                        iteration,
                        error = %err,
                        hint = vendor_failure_hint(&err),
                        "OpenRouter request failed"
                    );
                    return Err(err);
                }
            };

            if let Some(turn_usage) = &response.usage {
                usage.prompt_tokens += turn_usage.prompt_tokens;
                usage.completion_tokens += turn_usage.completion_tokens;
                usage.total_tokens += turn_usage.total_tokens;
            }

            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or(AgentError::EmptyResponse)?;
            let content = choice.message.content.unwrap_or_default();

            let mut calls = convert_tool_calls(choice.message.tool_calls);
            if calls.is_empty() {
                // Some models skip structured tool calls and answer with
                // JSON in the content instead.
                calls = parse_tool_calls(&content);
                if !calls.is_empty() {
                    debug!(
                        model = %self.model,
                        count = calls.len(),
                        "synthesized tool calls from response content"
                    );
                }
            }

            if calls.is_empty() {
                return Ok(AgentResponse {
                    content,
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                    cost_usd: self.estimate_cost(&usage).await,
                    tool_calls: executed_calls,
                });
            }

            debug!(
                model = %self.model,
                iteration,
                count = calls.len(),
                "executing tool calls"
            );

            messages.push(ApiMessage::assistant_with_calls(&content, &calls));
            for call in &calls {
                let output = execute_tool(call, &request.handlers).await;
                executed_calls += 1;
                messages.push(ApiMessage::tool_result(&call.id, output));
            }
        }

        warn!(
            model = %self.model,
            max_iterations = self.max_iterations,
            "tool-calling iteration bound reached"
        );
        Ok(AgentResponse {
            content: "Max tool calling iterations reached".to_string(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cost_usd: self.estimate_cost(&usage).await,
            tool_calls: executed_calls,
        })
    }
}

/// Run one tool call through the handler map.
///
/// Failures never abort the turn loop: a missing handler or a handler error
/// becomes the tool's textual output, so the model can read it and react.
async fn execute_tool(call: &ToolCall, handlers: &ToolHandlerMap) -> String {
    let Some(handler) = handlers.get(&call.name) else {
        return format!("Tool '{}' is not available", call.name);
    };
    let args = match call.parsed_arguments() {
        Ok(args) => args,
        Err(err) => return format!("Error: invalid arguments for '{}': {}", call.name, err),
    };
    match handler.call(args).await {
        Ok(output) => output,
        Err(err) => format!("Error: {}", err),
    }
}

/// Operator-facing hint attached to vendor failure logs.
fn vendor_failure_hint(error: &AgentError) -> &'static str {
    match error {
        AgentError::RateLimited(_) => "rate limited; lower batch concurrency or wait",
        AgentError::ApiError { code, .. } if *code >= 500 => {
            "provider unavailable; the model may be down or overloaded"
        }
        AgentError::ApiError { code, .. } if *code == 404 => {
            "model not found; check the id against the vendor listing"
        }
        AgentError::RequestFailed(message)
            if message.contains("timed out") || message.contains("timeout") =>
        {
            "request timed out; try a smaller prompt or a faster model"
        }
        AgentError::RequestFailed(_) => "network failure reaching the vendor API",
        _ => "vendor call failed",
    }
}

fn convert_tool_calls(calls: Vec<ApiToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(index, call)| {
            let id = if call.id.is_empty() {
                format!("call-{}", index)
            } else {
                call.id
            };
            ToolCall::new(id, call.function.name, call.function.arguments)
        })
        .collect()
}

/// Internal request structure for the OpenRouter API.
#[derive(Debug, Clone, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<ProviderRouting>,
}

/// Provider-routing hint pinning a request to specific upstream hosts.
#[derive(Debug, Clone, Serialize)]
struct ProviderRouting {
    order: Vec<String>,
    allow_fallbacks: bool,
}

/// Wire-format message for the OpenRouter API.
#[derive(Debug, Clone, Serialize)]
struct ApiMessage {
    role: MessageRole,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn from_chat(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            tool_calls: message.tool_calls.iter().map(ApiToolCall::from_call).collect(),
            tool_call_id: message.tool_call_id.clone(),
        }
    }

    fn assistant_with_calls(content: &str, calls: &[ToolCall]) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: if content.is_empty() {
                None
            } else {
                Some(content.to_string())
            },
            tool_calls: calls.iter().map(ApiToolCall::from_call).collect(),
            tool_call_id: None,
        }
    }

    fn tool_result(call_id: &str, output: String) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(output),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.to_string()),
        }
    }
}

/// OpenAI-style function-call wrapping used on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: ApiFunctionCall,
}

impl ApiToolCall {
    fn from_call(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            call_type: "function".to_string(),
            function: ApiFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

/// Function payload inside a wire tool call. Arguments stay a raw JSON
/// string end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Internal response structure from the OpenRouter API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ResponseMessage,
}

/// Assistant message as returned by the completion endpoint.
#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

/// Error detail from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ToolHandler;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn call(&self, args: Value) -> Result<String, AgentError> {
            Ok(format!("echo: {}", args))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolHandler for FailingTool {
        async fn call(&self, _args: Value) -> Result<String, AgentError> {
            Err(AgentError::ToolFailed("disk full".to_string()))
        }
    }

    fn handlers() -> ToolHandlerMap {
        let mut map: ToolHandlerMap = HashMap::new();
        map.insert("echo".to_string(), Arc::new(EchoTool));
        map.insert("broken".to_string(), Arc::new(FailingTool));
        map
    }

    #[test]
    fn test_new_uses_default_model() {
        let adapter = OpenRouterAdapter::new("test-api-key".to_string(), None);

        assert_eq!(adapter.base_url(), OPENROUTER_BASE_URL);
        assert_eq!(adapter.model(), DEFAULT_MODEL);
        assert_eq!(adapter.api_key_masked(), "test...-key");
    }

    #[test]
    fn test_new_with_model_parameter() {
        let adapter =
            OpenRouterAdapter::new("test-key".to_string(), Some("anthropic/claude-sonnet-4"));

        assert_eq!(adapter.model(), "anthropic/claude-sonnet-4");
        assert_eq!(adapter.model_source(), ModelSource::Parameter);
    }

    #[test]
    fn test_api_key_masked_short() {
        let adapter = OpenRouterAdapter::new("abc".to_string(), None);
        assert_eq!(adapter.api_key_masked(), "***");
    }

    #[test]
    fn test_provider_pin_applies_by_prefix() {
        let adapter = OpenRouterAdapter::new("key".to_string(), None);

        let pinned = adapter.provider_routing("moonshotai/kimi-k2.5");
        assert!(pinned.is_some());
        let routing = pinned.unwrap();
        assert_eq!(routing.order, vec!["moonshotai".to_string()]);
        assert!(!routing.allow_fallbacks);

        assert!(adapter.provider_routing("openai/gpt-4o").is_none());
    }

    #[test]
    fn test_request_body_includes_tools_and_pin() {
        let adapter = OpenRouterAdapter::new("key".to_string(), Some("moonshotai/kimi-k2.5"))
            .with_temperature(0.2);
        let tools = vec![ToolDefinition::new(
            "read_file",
            "Read a file",
            json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        )
        .to_openai_schema()];
        let messages = vec![ApiMessage::from_chat(&ChatMessage::user("hello"))];

        let request = adapter.build_request(messages, Some(&tools));
        let body = serde_json::to_string(&request).unwrap();

        assert!(body.contains("\"tools\""));
        assert!(body.contains("\"read_file\""));
        assert!(body.contains("\"temperature\":0.2"));
        assert!(body.contains("\"allow_fallbacks\":false"));
        assert!(!body.contains("tool_choice"));
    }

    #[test]
    fn test_request_body_omits_empty_sections() {
        let adapter = OpenRouterAdapter::new("key".to_string(), Some("openai/gpt-4o"));
        let messages = vec![ApiMessage::from_chat(&ChatMessage::user("hi"))];

        let request = adapter.build_request(messages, None);
        let body = serde_json::to_string(&request).unwrap();

        assert!(!body.contains("\"tools\""));
        assert!(!body.contains("\"provider\""));
        assert!(!body.contains("\"temperature\""));
    }

    #[test]
    fn test_tool_result_message_shape() {
        let message = ApiMessage::tool_result("call-7", "ok".to_string());
        let body = serde_json::to_string(&message).unwrap();

        assert!(body.contains("\"role\":\"tool\""));
        assert!(body.contains("\"tool_call_id\":\"call-7\""));
        assert!(!body.contains("tool_calls"));
    }

    #[test]
    fn test_response_message_with_tool_calls_parses() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "read_file", "arguments": "{\"path\":\"a.txt\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;

        let response: ApiResponse = serde_json::from_str(raw).unwrap();
        let calls = convert_tool_calls(response.choices[0].message.tool_calls.clone());

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments, "{\"path\":\"a.txt\"}");
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_convert_tool_calls_fills_missing_ids() {
        let calls = convert_tool_calls(vec![ApiToolCall {
            id: String::new(),
            call_type: "function".to_string(),
            function: ApiFunctionCall {
                name: "list_files".to_string(),
                arguments: "{}".to_string(),
            },
        }]);

        assert_eq!(calls[0].id, "call-0");
    }

    #[tokio::test]
    async fn test_execute_tool_missing_handler() {
        let call = ToolCall::new("1", "unknown_tool", "{}");
        let output = execute_tool(&call, &handlers()).await;
        assert_eq!(output, "Tool 'unknown_tool' is not available");
    }

    #[tokio::test]
    async fn test_execute_tool_handler_error_becomes_text() {
        let call = ToolCall::new("1", "broken", "{}");
        let output = execute_tool(&call, &handlers()).await;
        assert!(output.starts_with("Error: "));
        assert!(output.contains("disk full"));
    }

    #[tokio::test]
    async fn test_execute_tool_success() {
        let call = ToolCall::new("1", "echo", r#"{"value": 3}"#);
        let output = execute_tool(&call, &handlers()).await;
        assert_eq!(output, r#"echo: {"value":3}"#);
    }

    #[tokio::test]
    async fn test_execute_tool_malformed_arguments() {
        let call = ToolCall::new("1", "echo", "{not json");
        let output = execute_tool(&call, &handlers()).await;
        assert!(output.starts_with("Error: invalid arguments for 'echo'"));
    }

    #[tokio::test]
    async fn test_send_connection_error() {
        let adapter = OpenRouterAdapter::new("test-key".to_string(), Some("test-model"))
            .with_base_url("http://localhost:65535");

        let request = AgentRequest::new(vec![ChatMessage::user("test")]);
        let result = adapter.send(request).await;

        assert!(matches!(result, Err(AgentError::RequestFailed(_))));
    }

    #[test]
    fn test_vendor_failure_hint_categories() {
        assert!(vendor_failure_hint(&AgentError::RateLimited("slow down".into()))
            .contains("rate limited"));
        assert!(vendor_failure_hint(&AgentError::ApiError {
            code: 503,
            message: "overloaded".into(),
        })
        .contains("unavailable"));
        assert!(
            vendor_failure_hint(&AgentError::RequestFailed("operation timed out".into()))
                .contains("timed out")
        );
    }
}
