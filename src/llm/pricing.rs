//! Model pricing lookup with an injectable, TTL-bounded cache.
//!
//! Pricing must never block or fail a benchmark run. Resolution order:
//! cache hit → static fallback table keyed by model family substring → zero.
//! A cache miss additionally triggers a best-effort background refresh from
//! the vendor's model-listing endpoint so the next run sees real prices.
//!
//! The cache is owned by whoever constructs the adapter, so tests can
//! pre-seed it and assert on deterministic costs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::llm::types::TokenUsage;

/// Default cache entry lifetime.
const DEFAULT_TTL_SECS: u64 = 3600;

/// Per-token USD prices for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub prompt_usd_per_token: f64,
    pub completion_usd_per_token: f64,
}

impl ModelPricing {
    pub const ZERO: ModelPricing = ModelPricing {
        prompt_usd_per_token: 0.0,
        completion_usd_per_token: 0.0,
    };

    /// Builds pricing from USD-per-million-token rates.
    pub fn per_million(prompt: f64, completion: f64) -> Self {
        Self {
            prompt_usd_per_token: prompt / 1_000_000.0,
            completion_usd_per_token: completion / 1_000_000.0,
        }
    }

    /// Estimated USD cost for the given usage.
    pub fn estimate_cost(&self, usage: &TokenUsage) -> f64 {
        f64::from(usage.prompt_tokens) * self.prompt_usd_per_token
            + f64::from(usage.completion_tokens) * self.completion_usd_per_token
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    pricing: ModelPricing,
    supports_tools: Option<bool>,
    fetched_at: Instant,
}

/// TTL-bounded pricing cache shared by clones.
#[derive(Clone)]
pub struct PricingCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

impl Default for PricingCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TTL_SECS))
    }
}

impl PricingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Returns cached pricing for the model if present and fresh.
    pub async fn lookup(&self, model: &str) -> Option<ModelPricing> {
        let entries = self.entries.read().await;
        entries
            .get(model)
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.pricing)
    }

    /// Returns whether the model declared tool-calling support, if known.
    pub async fn supports_tools(&self, model: &str) -> Option<bool> {
        let entries = self.entries.read().await;
        entries
            .get(model)
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .and_then(|e| e.supports_tools)
    }

    pub async fn insert(&self, model: &str, pricing: ModelPricing, supports_tools: Option<bool>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            model.to_string(),
            CacheEntry {
                pricing,
                supports_tools,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Resolves pricing without ever blocking on the network: cache, then
    /// the static family table, then zero.
    pub async fn resolve(&self, model: &str) -> ModelPricing {
        if let Some(pricing) = self.lookup(model).await {
            return pricing;
        }
        static_fallback(model).unwrap_or(ModelPricing::ZERO)
    }

    /// Kicks off a background refresh from the vendor model listing.
    ///
    /// Fire-and-forget: failures are logged and the current call proceeds
    /// with whatever `resolve` returned.
    pub fn spawn_refresh(&self, client: reqwest::Client, base_url: String, api_key: String) {
        let cache = self.clone();
        tokio::spawn(async move {
            match fetch_model_listing(&client, &base_url, &api_key).await {
                Ok(models) => {
                    let count = models.len();
                    for listed in models {
                        cache
                            .insert(&listed.id, listed.pricing, listed.supports_tools)
                            .await;
                    }
                    debug!(models = count, "pricing cache refreshed");
                }
                Err(err) => {
                    warn!(error = %err, "pricing refresh failed; static fallback stays in effect");
                }
            }
        });
    }
}

/// Static price table keyed by model family substring.
///
/// Rates are deliberately coarse; they only stand in until a listing fetch
/// succeeds.
pub fn static_fallback(model: &str) -> Option<ModelPricing> {
    let lower = model.to_lowercase();
    if lower.contains("gpt-4o") {
        Some(ModelPricing::per_million(2.50, 10.00))
    } else if lower.contains("claude") {
        Some(ModelPricing::per_million(3.00, 15.00))
    } else if lower.contains("llama") {
        Some(ModelPricing::per_million(0.60, 0.60))
    } else if lower.contains("gemma") {
        Some(ModelPricing::per_million(0.10, 0.10))
    } else {
        None
    }
}

#[derive(Debug, Deserialize)]
struct ListingResponse {
    #[serde(default)]
    data: Vec<ListedModelRaw>,
}

#[derive(Debug, Deserialize)]
struct ListedModelRaw {
    id: String,
    #[serde(default)]
    pricing: Option<ListedPricing>,
    #[serde(default)]
    supported_parameters: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ListedPricing {
    // The listing endpoint reports per-token USD prices as strings.
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    completion: Option<String>,
}

/// One model entry from the vendor listing.
#[derive(Debug, Clone)]
pub struct ListedModel {
    pub id: String,
    pub pricing: ModelPricing,
    pub supports_tools: Option<bool>,
}

/// Parses the model-listing payload into cacheable entries.
pub fn parse_model_listing(body: &str) -> Result<Vec<ListedModel>, serde_json::Error> {
    let response: ListingResponse = serde_json::from_str(body)?;
    Ok(response
        .data
        .into_iter()
        .map(|raw| {
            let pricing = raw
                .pricing
                .map(|p| ModelPricing {
                    prompt_usd_per_token: parse_price(p.prompt.as_deref()),
                    completion_usd_per_token: parse_price(p.completion.as_deref()),
                })
                .unwrap_or(ModelPricing::ZERO);
            let supports_tools = raw
                .supported_parameters
                .map(|params| params.iter().any(|p| p == "tools"));
            ListedModel {
                id: raw.id,
                pricing,
                supports_tools,
            }
        })
        .collect())
}

fn parse_price(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0)
}

async fn fetch_model_listing(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
) -> Result<Vec<ListedModel>, crate::error::AgentError> {
    let url = format!("{}/models", base_url.trim_end_matches('/'));
    let response = client.get(&url).bearer_auth(api_key).send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(crate::error::AgentError::ApiError {
            code: status.as_u16(),
            message: format!("model listing returned: {}", truncate_body(&body)),
        });
    }
    parse_model_listing(&body).map_err(crate::error::AgentError::Json)
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
