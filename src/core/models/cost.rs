use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::models::usage::TokenCounts;

/// Tokens and cost attributed to one model inside a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBreakdown {
    pub model: String,
    pub tokens: TokenCounts,
    pub cost: f64,
    pub entry_count: u32,
}

/// Totals for a set of entries, with models ordered by cost descending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub tokens: TokenCounts,
    pub total_cost: f64,
    pub entry_count: u32,
    pub models: Vec<ModelBreakdown>,
}

/// One local calendar day (`YYYY-MM-DD`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub id: String,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub summary: UsageSummary,
}

/// One local calendar month (`YYYY-MM`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyUsage {
    pub id: String,
    pub year: i32,
    pub month: u32,
    #[serde(flatten)]
    pub summary: UsageSummary,
}
