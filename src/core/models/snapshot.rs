use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::cost::block::SessionBlock;
use crate::core::models::cost::{DailyUsage, MonthlyUsage, UsageSummary};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum RefreshState {
    #[default]
    Idle,
    Refreshing,
    Error(String),
}

/// The aggregate set produced by one refresh pass. Published as a unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageAggregates {
    pub today: UsageSummary,
    pub current_block: Option<SessionBlock>,
    pub last_14_days: Vec<DailyUsage>,
    pub monthly: Vec<MonthlyUsage>,
    pub this_month: Option<MonthlyUsage>,
}

/// Everything a presentation layer reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    #[serde(flatten)]
    pub data: UsageAggregates,
    pub is_loading: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub state: RefreshState,
}

impl UsageSnapshot {
    pub fn daily_budget_fraction(&self, budget: Option<f64>) -> Option<f64> {
        budget_fraction(self.data.today.total_cost, budget)
    }

    pub fn monthly_budget_fraction(&self, budget: Option<f64>) -> Option<f64> {
        let spent = self
            .data
            .this_month
            .as_ref()
            .map(|m| m.summary.total_cost)
            .unwrap_or(0.0);
        budget_fraction(spent, budget)
    }
}

/// `spent / budget`, unclamped so overspend shows above 1. `None` without a
/// positive budget.
pub fn budget_fraction(spent: f64, budget: Option<f64>) -> Option<f64> {
    budget.filter(|b| *b > 0.0).map(|b| spent / b)
}
