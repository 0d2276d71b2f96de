use chrono::{Datelike, Duration, Local, NaiveDate, TimeZone};
use std::collections::BTreeMap;

use crate::core::cost::pricing::PricingTable;
use crate::core::models::cost::{DailyUsage, ModelBreakdown, MonthlyUsage, UsageSummary};
use crate::core::models::usage::{TokenCounts, UsageEntry};

const UNKNOWN_MODEL: &str = "unknown";

/// Sum tokens and cost over `entries`, with a per-model breakdown ordered by
/// cost (descending, then by model id).
pub fn summarize<'a, I>(entries: I, pricing: &PricingTable) -> UsageSummary
where
    I: IntoIterator<Item = &'a UsageEntry>,
{
    let mut summary = UsageSummary::default();
    let mut by_model: BTreeMap<&str, ModelBreakdown> = BTreeMap::new();

    for entry in entries {
        let cost = pricing.calculate_cost(entry);
        let model = entry.model.as_deref().unwrap_or(UNKNOWN_MODEL);

        summary.tokens.add_entry(entry);
        summary.total_cost += cost;
        summary.entry_count += 1;

        let breakdown = by_model.entry(model).or_insert_with(|| ModelBreakdown {
            model: model.to_string(),
            tokens: TokenCounts::default(),
            cost: 0.0,
            entry_count: 0,
        });
        breakdown.tokens.add_entry(entry);
        breakdown.cost += cost;
        breakdown.entry_count += 1;
    }

    let mut models: Vec<ModelBreakdown> = by_model.into_values().collect();
    models.sort_by(|a, b| {
        b.cost
            .partial_cmp(&a.cost)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.model.cmp(&b.model))
    });
    summary.models = models;
    summary
}

/// Group by calendar day in `tz`, newest day first.
pub fn aggregate_by_day_in<Tz: TimeZone>(
    entries: &[UsageEntry],
    pricing: &PricingTable,
    tz: &Tz,
) -> Vec<DailyUsage> {
    let mut days: BTreeMap<NaiveDate, Vec<&UsageEntry>> = BTreeMap::new();
    for entry in entries {
        let date = entry.timestamp.with_timezone(tz).date_naive();
        days.entry(date).or_default().push(entry);
    }

    days.into_iter()
        .rev()
        .map(|(date, group)| DailyUsage {
            id: date.format("%Y-%m-%d").to_string(),
            date,
            summary: summarize(group, pricing),
        })
        .collect()
}

/// Group by calendar month in `tz`, newest month first.
pub fn aggregate_by_month_in<Tz: TimeZone>(
    entries: &[UsageEntry],
    pricing: &PricingTable,
    tz: &Tz,
) -> Vec<MonthlyUsage> {
    let mut months: BTreeMap<(i32, u32), Vec<&UsageEntry>> = BTreeMap::new();
    for entry in entries {
        let date = entry.timestamp.with_timezone(tz).date_naive();
        months
            .entry((date.year(), date.month()))
            .or_default()
            .push(entry);
    }

    months
        .into_iter()
        .rev()
        .map(|((year, month), group)| MonthlyUsage {
            id: format!("{:04}-{:02}", year, month),
            year,
            month,
            summary: summarize(group, pricing),
        })
        .collect()
}

/// Summary of the entries that fall on `today` in `tz`.
pub fn today_summary_in<Tz: TimeZone>(
    entries: &[UsageEntry],
    pricing: &PricingTable,
    tz: &Tz,
    today: NaiveDate,
) -> UsageSummary {
    summarize(
        entries
            .iter()
            .filter(|e| e.timestamp.with_timezone(tz).date_naive() == today),
        pricing,
    )
}

pub fn aggregate_by_day(entries: &[UsageEntry], pricing: &PricingTable) -> Vec<DailyUsage> {
    aggregate_by_day_in(entries, pricing, &Local)
}

pub fn aggregate_by_month(entries: &[UsageEntry], pricing: &PricingTable) -> Vec<MonthlyUsage> {
    aggregate_by_month_in(entries, pricing, &Local)
}

pub fn today_summary(entries: &[UsageEntry], pricing: &PricingTable) -> UsageSummary {
    today_summary_in(entries, pricing, &Local, Local::now().date_naive())
}

/// Daily buckets within the `days` calendar days ending at `today`.
pub fn last_n_days(daily: &[DailyUsage], today: NaiveDate, days: u32) -> Vec<DailyUsage> {
    let cutoff = today - Duration::days(i64::from(days.saturating_sub(1)));
    daily
        .iter()
        .filter(|d| d.date >= cutoff && d.date <= today)
        .cloned()
        .collect()
}

/// The bucket for the month containing `today`, if there was any usage.
pub fn this_month(monthly: &[MonthlyUsage], today: NaiveDate) -> Option<MonthlyUsage> {
    monthly
        .iter()
        .find(|m| m.year == today.year() && m.month == today.month())
        .cloned()
}
