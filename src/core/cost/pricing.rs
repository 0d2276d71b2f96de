use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::models::usage::{TokenUsage, UsageEntry};

/// A pricing table older than this is refreshed before being trusted.
pub const STALE_AFTER: Duration = Duration::hours(24);

/// Cache-creation rate as a multiple of the input rate when the model has none.
const CACHE_CREATION_MULTIPLIER: f64 = 1.25;
/// Cache-read rate as a multiple of the input rate when the model has none.
const CACHE_READ_MULTIPLIER: f64 = 0.1;

/// Per-model token pricing in dollars per token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPricing {
    pub input_cost_per_token: f64,
    pub output_cost_per_token: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_token_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_token_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
}

impl ModelPricing {
    pub fn new(input_cost_per_token: f64, output_cost_per_token: f64) -> Self {
        Self {
            input_cost_per_token,
            output_cost_per_token,
            cache_read_input_token_cost: None,
            cache_creation_input_token_cost: None,
            max_input_tokens: None,
            max_output_tokens: None,
        }
    }

    pub fn cache_creation_rate(&self) -> f64 {
        self.cache_creation_input_token_cost
            .unwrap_or(self.input_cost_per_token * CACHE_CREATION_MULTIPLIER)
    }

    pub fn cache_read_rate(&self) -> f64 {
        self.cache_read_input_token_cost
            .unwrap_or(self.input_cost_per_token * CACHE_READ_MULTIPLIER)
    }

    /// Dollar cost of `usage` at these rates.
    pub fn cost_for(&self, usage: &TokenUsage) -> f64 {
        usage.input_tokens as f64 * self.input_cost_per_token
            + usage.output_tokens as f64 * self.output_cost_per_token
            + usage.cache_creation_input_tokens as f64 * self.cache_creation_rate()
            + usage.cache_read_input_tokens as f64 * self.cache_read_rate()
    }
}

/// Model id -> pricing, plus when it was fetched.
///
/// Keys are kept in a `BTreeMap` so substring resolution is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingTable {
    pub models: BTreeMap<String, ModelPricing>,
    pub fetched_at: DateTime<Utc>,
}

impl PricingTable {
    pub fn new(models: BTreeMap<String, ModelPricing>, fetched_at: DateTime<Utc>) -> Self {
        Self { models, fetched_at }
    }

    pub fn empty() -> Self {
        Self::new(BTreeMap::new(), DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.fetched_at) > STALE_AFTER
    }

    /// Resolve pricing for a model id.
    ///
    /// Tries an exact key, then the id without its `-YYYYMMDD` suffix, then a
    /// substring match. Keys contained in the query are preferred (longest
    /// first) over keys that contain the query (shortest first); remaining
    /// ties go to the lexicographically smaller key.
    pub fn get_pricing(&self, model: &str) -> Option<&ModelPricing> {
        if let Some(p) = self.models.get(model) {
            return Some(p);
        }

        let normalized = strip_date_suffix(model);
        if let Some(p) = self.models.get(normalized) {
            return Some(p);
        }

        let contained = self
            .models
            .iter()
            .filter(|(key, _)| !key.is_empty() && model.contains(key.as_str()))
            .max_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| b.cmp(a)));
        if let Some((_, p)) = contained {
            return Some(p);
        }

        if normalized.is_empty() {
            return None;
        }
        self.models
            .iter()
            .filter(|(key, _)| key.contains(normalized))
            .min_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
            .map(|(_, p)| p)
    }

    /// Cost of one entry. Falls back to the entry's own `costUSD` (or 0) when
    /// no pricing resolves for its model.
    pub fn calculate_cost(&self, entry: &UsageEntry) -> f64 {
        let fallback = entry.cost_usd.unwrap_or(0.0);
        let Some(model) = entry.model.as_deref() else {
            return fallback;
        };
        let Some(pricing) = self.get_pricing(model) else {
            return fallback;
        };
        pricing.cost_for(&entry.usage.unwrap_or_default())
    }
}

/// Strip a trailing `-YYYYMMDD` segment, if present.
pub fn strip_date_suffix(model: &str) -> &str {
    if model.len() > 9 && model.is_char_boundary(model.len() - 9) {
        let tail = &model[model.len() - 9..];
        if tail.starts_with('-') && tail[1..].chars().all(|c| c.is_ascii_digit()) {
            return &model[..model.len() - 9];
        }
    }
    model
}

/// Name shown to users: the model id without its release date.
pub fn display_name(model: &str) -> String {
    strip_date_suffix(model).to_string()
}
