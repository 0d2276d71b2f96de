use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::core::cost::pricing::ModelPricing;
use crate::core::models::usage::PRODUCT_FILTER;

/// Public model price list (LiteLLM).
pub const DEFAULT_PRICING_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// Where the pricing document comes from. The resolver only sees this trait,
/// so tests can hand it a canned document or a failure.
pub trait PricingSource: Send + Sync {
    fn fetch(&self) -> FetchFuture<'_>;
}

/// Fetches the pricing document over HTTPS.
pub struct RemotePricingSource {
    url: String,
    client: reqwest::Client,
}

impl RemotePricingSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        validate_endpoint(&url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { url, client })
    }
}

impl PricingSource for RemotePricingSource {
    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.url)
                .header("Accept", "application/json")
                .send()
                .await
                .context("Failed to fetch pricing document")?;

            let status = response.status();
            if !status.is_success() {
                anyhow::bail!("Pricing document returned HTTP {}", status.as_u16());
            }

            response
                .json::<Value>()
                .await
                .context("Failed to parse pricing document")
        })
    }
}

/// Reject anything but HTTPS for the pricing endpoint.
pub fn validate_endpoint(url: &str) -> Result<()> {
    if !url.starts_with("https://") {
        anyhow::bail!("pricing endpoint must use HTTPS, got: {}", url);
    }
    Ok(())
}

/// Strip a `<vendor>/` prefix: `anthropic/claude-3-opus` -> `claude-3-opus`.
fn normalize_key(key: &str) -> &str {
    match key.rfind('/') {
        Some(idx) => &key[idx + 1..],
        None => key,
    }
}

fn parse_entry(value: &Value) -> Option<ModelPricing> {
    let input = value.get("input_cost_per_token")?.as_f64()?;
    let output = value.get("output_cost_per_token")?.as_f64()?;
    let mut pricing = ModelPricing::new(input, output);
    pricing.cache_read_input_token_cost = value
        .get("cache_read_input_token_cost")
        .and_then(Value::as_f64);
    pricing.cache_creation_input_token_cost = value
        .get("cache_creation_input_token_cost")
        .and_then(Value::as_f64);
    pricing.max_input_tokens = value.get("max_input_tokens").and_then(Value::as_u64);
    pricing.max_output_tokens = value.get("max_output_tokens").and_then(Value::as_u64);
    Some(pricing)
}

/// Extract tracked models from the pricing document.
///
/// Entries without both per-token rates are skipped. When a bare key and a
/// vendor-prefixed key normalize to the same id, the bare key wins.
pub fn parse_pricing_document(document: &Value) -> Result<BTreeMap<String, ModelPricing>> {
    let object = document
        .as_object()
        .context("Pricing document is not a JSON object")?;

    let mut models: BTreeMap<String, ModelPricing> = BTreeMap::new();
    for (key, value) in object {
        if !key.to_lowercase().contains(PRODUCT_FILTER) {
            continue;
        }
        let Some(pricing) = parse_entry(value) else {
            continue;
        };
        let normalized = normalize_key(key);
        if normalized.len() == key.len() {
            models.insert(normalized.to_string(), pricing);
        } else {
            models.entry(normalized.to_string()).or_insert(pricing);
        }
    }

    if models.is_empty() {
        anyhow::bail!("Pricing document contains no {} models", PRODUCT_FILTER);
    }
    Ok(models)
}
