use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::cost::pricing::PricingTable;
use crate::core::models::usage::{TokenCounts, UsageEntry};

/// Length of a billing session block.
pub const SESSION_BLOCK_DURATION: Duration = Duration::hours(5);

/// Spend rate over the active part of a block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BurnRate {
    pub cost_per_hour: f64,
    pub tokens_per_minute: f64,
}

/// The current floating 5-hour window, anchored at its oldest entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionBlock {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_active: bool,
    pub tokens: TokenCounts,
    pub cost: f64,
    pub entry_count: u32,
    pub models: BTreeSet<String>,
}

impl SessionBlock {
    /// Fraction of the window elapsed at `now`, clamped to `[0, 1]`.
    pub fn elapsed_progress(&self, now: DateTime<Utc>) -> f64 {
        let span = (self.end - self.start).num_milliseconds() as f64;
        if span <= 0.0 {
            return 1.0;
        }
        let elapsed = (now - self.start).num_milliseconds() as f64;
        (elapsed / span).clamp(0.0, 1.0)
    }

    /// Time left in the window, only while it is active.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let remaining = self.end - now;
        (self.is_active && remaining > Duration::zero()).then_some(remaining)
    }

    /// Cost per hour and tokens per minute since the block started. `None`
    /// until a full minute has passed.
    pub fn burn_rate(&self, now: DateTime<Utc>) -> Option<BurnRate> {
        let until = now.min(self.end);
        let minutes = (until - self.start).num_seconds() as f64 / 60.0;
        if minutes < 1.0 {
            return None;
        }
        Some(BurnRate {
            cost_per_hour: self.cost / minutes * 60.0,
            tokens_per_minute: self.tokens.total() as f64 / minutes,
        })
    }

    /// Cost at the end of the window if the current burn rate holds.
    pub fn projected_cost(&self, now: DateTime<Utc>) -> Option<f64> {
        let remaining = self.time_remaining(now)?;
        let rate = self.burn_rate(now)?;
        Some(self.cost + rate.cost_per_hour * remaining.num_seconds() as f64 / 3600.0)
    }
}

pub fn calculate_current_block(entries: &[UsageEntry], pricing: &PricingTable) -> Option<SessionBlock> {
    calculate_current_block_at(entries, pricing, Utc::now())
}

/// Build the block from entries in `[now - 5h, ∞)`. `None` when there are none.
pub fn calculate_current_block_at(
    entries: &[UsageEntry],
    pricing: &PricingTable,
    now: DateTime<Utc>,
) -> Option<SessionBlock> {
    let cutoff = now - SESSION_BLOCK_DURATION;
    let recent: Vec<&UsageEntry> = entries.iter().filter(|e| e.timestamp >= cutoff).collect();

    let start = recent.iter().map(|e| e.timestamp).min()?;
    let end = start + SESSION_BLOCK_DURATION;

    let mut tokens = TokenCounts::default();
    let mut cost = 0.0;
    let mut models = BTreeSet::new();
    for entry in &recent {
        tokens.add_entry(entry);
        cost += pricing.calculate_cost(entry);
        if let Some(model) = &entry.model {
            models.insert(model.clone());
        }
    }

    Some(SessionBlock {
        start,
        end,
        is_active: now < end,
        tokens,
        cost,
        entry_count: recent.len() as u32,
        models,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cost::pricing::ModelPricing;
    use crate::core::models::usage::fixtures::entry;
    use std::collections::BTreeMap;

    fn pricing() -> PricingTable {
        let mut models = BTreeMap::new();
        models.insert("claude-opus-4".to_string(), ModelPricing::new(1.5e-5, 7.5e-5));
        PricingTable::new(models, Utc::now())
    }

    fn at(now: DateTime<Utc>, ago: Duration, model: &str, output: u64) -> UsageEntry {
        entry(&(now - ago).to_rfc3339(), model, output)
    }

    fn now() -> DateTime<Utc> {
        "2024-01-15T18:00:00Z".parse().unwrap()
    }

    #[test]
    fn no_recent_entries_means_no_block() {
        let entries = vec![
            at(now(), Duration::hours(6), "claude-opus-4", 10),
            at(now(), Duration::hours(5) + Duration::seconds(1), "claude-opus-4", 10),
        ];
        assert!(calculate_current_block_at(&entries, &pricing(), now()).is_none());
        assert!(calculate_current_block_at(&[], &pricing(), now()).is_none());
    }

    #[test]
    fn entry_exactly_five_hours_old_is_included() {
        let entries = vec![at(now(), Duration::hours(5), "claude-opus-4", 10)];
        let block = calculate_current_block_at(&entries, &pricing(), now()).unwrap();
        assert_eq!(block.start, now() - Duration::hours(5));
        assert_eq!(block.end, now());
        // now == end, so the block has just closed.
        assert!(!block.is_active);
        assert_eq!(block.time_remaining(now()), None);
        assert_eq!(block.elapsed_progress(now()), 1.0);
    }

    #[test]
    fn block_floats_with_oldest_recent_entry() {
        let entries = vec![
            at(now(), Duration::minutes(10), "claude-opus-4", 100),
            at(now(), Duration::minutes(90), "claude-sonnet-4-20250514", 50),
            at(now(), Duration::hours(7), "claude-opus-4", 999),
        ];
        let block = calculate_current_block_at(&entries, &pricing(), now()).unwrap();
        assert_eq!(block.start, now() - Duration::minutes(90));
        assert_eq!(block.end, block.start + SESSION_BLOCK_DURATION);
        assert!(block.is_active);
        assert_eq!(block.tokens.output, 150);
        assert_eq!(block.entry_count, 2);
        assert_eq!(block.models.len(), 2);
        assert!((block.cost - 100.0 * 7.5e-5).abs() < 1e-12);

        assert_eq!(block.time_remaining(now()), Some(Duration::minutes(210)));
        assert!((block.elapsed_progress(now()) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn progress_is_clamped() {
        let entries = vec![at(now(), Duration::hours(1), "claude-opus-4", 1)];
        let block = calculate_current_block_at(&entries, &pricing(), now()).unwrap();
        assert_eq!(block.elapsed_progress(now() - Duration::hours(3)), 0.0);
        assert_eq!(block.elapsed_progress(now() + Duration::hours(9)), 1.0);
    }

    #[test]
    fn burn_rate_and_projection() {
        let entries = vec![at(now(), Duration::hours(1), "claude-opus-4", 1000)];
        let block = calculate_current_block_at(&entries, &pricing(), now()).unwrap();

        let rate = block.burn_rate(now()).unwrap();
        assert!((rate.cost_per_hour - 0.075).abs() < 1e-12);
        assert!((rate.tokens_per_minute - 1000.0 / 60.0).abs() < 1e-9);

        // Four more hours at the same rate.
        let projected = block.projected_cost(now()).unwrap();
        assert!((projected - 0.375).abs() < 1e-9);

        assert!(block.burn_rate(block.start + Duration::seconds(30)).is_none());
    }
}
