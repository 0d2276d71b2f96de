use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Only models whose id contains this (case-insensitive) are tracked.
pub const PRODUCT_FILTER: &str = "claude";

/// Token usage reported on a single assistant message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

/// One normalized log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub message_id: Option<String>,
    pub request_id: Option<String>,
    /// Pre-computed cost written by the CLI, used when no pricing resolves.
    pub cost_usd: Option<f64>,
    pub usage: Option<TokenUsage>,
}

impl UsageEntry {
    /// Identity used for cross-file deduplication: timestamp + request id + message id.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.timestamp.to_rfc3339(),
            self.request_id.as_deref().unwrap_or(""),
            self.message_id.as_deref().unwrap_or("")
        )
    }

    /// Whether this entry takes part in aggregation: it must carry usage with
    /// output tokens and a tracked model.
    pub fn is_billable(&self) -> bool {
        let has_output = self.usage.map(|u| u.output_tokens > 0).unwrap_or(false);
        let tracked = self
            .model
            .as_deref()
            .map(|m| m.to_lowercase().contains(PRODUCT_FILTER))
            .unwrap_or(false);
        has_output && tracked
    }
}

/// Accumulated input/output/cache token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub cache_creation: u64,
    pub cache_read: u64,
}

impl TokenCounts {
    /// Sum of all four counts, saturating at `u64::MAX`.
    pub fn total(&self) -> u64 {
        self.input
            .saturating_add(self.output)
            .saturating_add(self.cache_creation)
            .saturating_add(self.cache_read)
    }

    pub fn add(&mut self, other: &TokenCounts) {
        self.input = self.input.saturating_add(other.input);
        self.output = self.output.saturating_add(other.output);
        self.cache_creation = self.cache_creation.saturating_add(other.cache_creation);
        self.cache_read = self.cache_read.saturating_add(other.cache_read);
    }

    pub fn add_entry(&mut self, entry: &UsageEntry) {
        if let Some(usage) = entry.usage {
            self.add(&TokenCounts::from(usage));
        }
    }
}

impl From<TokenUsage> for TokenCounts {
    fn from(usage: TokenUsage) -> Self {
        Self {
            input: usage.input_tokens,
            output: usage.output_tokens,
            cache_creation: usage.cache_creation_input_tokens,
            cache_read: usage.cache_read_input_tokens,
        }
    }
}

impl AddAssign<&TokenCounts> for TokenCounts {
    fn add_assign(&mut self, rhs: &TokenCounts) {
        self.add(rhs);
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Build a billable entry at `ts` (RFC 3339) for `model`.
    pub fn entry(ts: &str, model: &str, output: u64) -> UsageEntry {
        UsageEntry {
            timestamp: ts.parse().unwrap(),
            session_id: None,
            model: Some(model.to_string()),
            message_id: None,
            request_id: None,
            cost_usd: None,
            usage: Some(TokenUsage {
                input_tokens: 0,
                output_tokens: output,
                cache_creation_input_tokens: 0,
                cache_read_input_tokens: 0,
            }),
        }
    }
}
