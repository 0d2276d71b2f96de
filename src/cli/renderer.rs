use chrono::{DateTime, Local, Utc};
use colored::{control, ColoredString, Colorize};

use crate::core::config::AppConfig;
use crate::core::cost::block::SessionBlock;
use crate::core::cost::pricing::display_name;
use crate::core::formatter::{
    format_block_end, format_budget, format_cost, format_progress_bar, format_time_remaining,
    format_tokens,
};
use crate::core::models::cost::UsageSummary;
use crate::core::models::snapshot::{RefreshState, UsageSnapshot};

const BAR_WIDTH: usize = 12;
const RECENT_DAYS_SHOWN: usize = 14;

/// Render the published state as a colored (or plain) string.
///
/// Layout:
/// ```text
///  Claude usage
///   Today     $4.21  (1.2M tokens, 38 requests)
///             42% of $10.00 budget
///   Block     $1.10 [████░░░░░░░░] 3h 12m left, ends 5:30 PM
///             $0.62/h, 3.1K tok/min, projected $3.10
///   Month     $61.40  (2024-03)
///   By Model (today):
///     claude-opus-4            $3.90    (1.1M in / 24.0K out)
///   Last 14 Days:
///     Mar 10       $4.21
///   Updated 12:00:01
/// ```
pub fn render_snapshot(
    snapshot: &UsageSnapshot,
    config: &AppConfig,
    now: DateTime<Utc>,
    use_color: bool,
) -> String {
    control::set_override(use_color);
    let places = config.decimal_places;
    let data = &snapshot.data;

    let mut lines: Vec<String> = Vec::new();
    lines.push(" Claude usage".bold().to_string());

    // Today
    if data.today.entry_count == 0 {
        lines.push(format!("  {}     {}", "Today".cyan(), "No usage yet".dimmed()));
    } else {
        lines.push(format!(
            "  {}     {}  ({})",
            "Today".cyan(),
            format_cost(data.today.total_cost, places).bold(),
            summary_detail(&data.today)
        ));
    }
    if let Some(fraction) = snapshot.daily_budget_fraction(config.daily_budget) {
        let budget = config.daily_budget.unwrap_or_default();
        let text = format_budget(fraction, budget, places);
        lines.push(format!("            {}", color_by_budget(fraction, &text)));
    }

    // Current block
    match &data.current_block {
        Some(block) => render_block(&mut lines, block, now, places),
        None => lines.push(format!("  {}     {}", "Block".cyan(), "No recent activity".dimmed())),
    }

    // This month
    match &data.this_month {
        Some(month) => lines.push(format!(
            "  {}     {}  ({})",
            "Month".cyan(),
            format_cost(month.summary.total_cost, places).bold(),
            month.id
        )),
        None => lines.push(format!("  {}     {}", "Month".cyan(), format_cost(0.0, places))),
    }
    if let Some(fraction) = snapshot.monthly_budget_fraction(config.monthly_budget) {
        let budget = config.monthly_budget.unwrap_or_default();
        let text = format_budget(fraction, budget, places);
        lines.push(format!("            {}", color_by_budget(fraction, &text)));
    }

    if !data.today.models.is_empty() {
        lines.push(format!("  {}:", "By Model (today)".cyan()));
        for model in &data.today.models {
            lines.push(format!(
                "    {:<24} {:<8} ({} in / {} out)",
                display_name(&model.model),
                format_cost(model.cost, places),
                format_tokens(model.tokens.input),
                format_tokens(model.tokens.output)
            ));
        }
    }

    if !data.last_14_days.is_empty() {
        lines.push(format!("  {}:", "Last 14 Days".cyan()));
        for day in data.last_14_days.iter().take(RECENT_DAYS_SHOWN) {
            lines.push(format!(
                "    {:<12} {}",
                day.date.format("%b %d"),
                format_cost(day.summary.total_cost, places)
            ));
        }
    }

    // Status
    match &snapshot.state {
        RefreshState::Refreshing => lines.push(format!("  {}", "Refreshing...".dimmed())),
        RefreshState::Error(message) => {
            lines.push(format!("  {} {}", "Error".red().bold(), message.red()))
        }
        RefreshState::Idle => {}
    }
    if let Some(updated) = snapshot.last_updated {
        let local = updated.with_timezone(&Local);
        lines.push(format!(
            "  {}",
            format!("Updated {}", local.format("%H:%M:%S")).dimmed()
        ));
    }

    lines.join("\n")
}

fn summary_detail(summary: &UsageSummary) -> String {
    format!(
        "{} tokens, {} request{}",
        format_tokens(summary.tokens.total()),
        summary.entry_count,
        if summary.entry_count == 1 { "" } else { "s" }
    )
}

fn render_block(lines: &mut Vec<String>, block: &SessionBlock, now: DateTime<Utc>, places: u8) {
    let bar = format_progress_bar(block.elapsed_progress(now), BAR_WIDTH).magenta();
    let timing = match block.time_remaining(now) {
        Some(remaining) => format!(
            "{}, {}",
            format_time_remaining(remaining),
            format_block_end(&block.end)
        ),
        None => "ended".to_string(),
    };
    lines.push(format!(
        "  {}     {} {} {}",
        "Block".cyan(),
        format_cost(block.cost, places).bold(),
        bar,
        timing.dimmed()
    ));

    if let Some(rate) = block.burn_rate(now) {
        let mut detail = format!(
            "{}/h, {} tok/min",
            format_cost(rate.cost_per_hour, places),
            format_tokens(rate.tokens_per_minute.round() as u64)
        );
        if let Some(projected) = block.projected_cost(now) {
            detail.push_str(&format!(", projected {}", format_cost(projected, places)));
        }
        lines.push(format!("            {}", detail.dimmed()));
    }
}

/// Green under 75% of budget, yellow under 100%, red beyond.
fn color_by_budget(fraction: f64, text: &str) -> ColoredString {
    if fraction < 0.75 {
        text.green()
    } else if fraction < 1.0 {
        text.yellow()
    } else {
        text.red()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cost::block::calculate_current_block_at;
    use crate::core::cost::pricing::{ModelPricing, PricingTable};
    use crate::core::models::usage::fixtures::entry;
    use crate::core::refresh::build_aggregates;
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        "2024-03-10T12:00:00Z".parse().unwrap()
    }

    fn make_snapshot() -> UsageSnapshot {
        let mut models = BTreeMap::new();
        models.insert("claude-opus-4".to_string(), ModelPricing::new(1.5e-5, 7.5e-5));
        let pricing = PricingTable::new(models, now());
        let entries = vec![
            entry("2024-03-10T11:00:00Z", "claude-opus-4-20250514", 20_000),
            entry("2024-03-09T11:00:00Z", "claude-opus-4-20250514", 10_000),
        ];
        UsageSnapshot {
            data: build_aggregates(&entries, &pricing, &Utc, now()),
            last_updated: Some(now()),
            ..UsageSnapshot::default()
        }
    }

    #[test]
    fn render_contains_sections() {
        let output = render_snapshot(&make_snapshot(), &AppConfig::default(), now(), false);
        assert!(output.contains("Today"));
        assert!(output.contains("$1.50"));
        assert!(output.contains("Block"));
        assert!(output.contains("4h 0m left"));
        assert!(output.contains("Month"));
        assert!(output.contains("$2.25"));
        assert!(output.contains("Last 14 Days"));
        assert!(output.contains("Updated"));
    }

    #[test]
    fn render_uses_display_names() {
        let output = render_snapshot(&make_snapshot(), &AppConfig::default(), now(), false);
        assert!(output.contains("claude-opus-4 "));
        assert!(!output.contains("20250514"));
    }

    #[test]
    fn render_respects_decimal_places() {
        let mut config = AppConfig::default();
        config.decimal_places = 4;
        let output = render_snapshot(&make_snapshot(), &config, now(), false);
        assert!(output.contains("$1.5000"));
    }

    #[test]
    fn render_budget_lines() {
        let mut config = AppConfig::default();
        config.daily_budget = Some(3.0);
        config.monthly_budget = Some(100.0);
        let output = render_snapshot(&make_snapshot(), &config, now(), false);
        assert!(output.contains("50% of $3.00 budget"));
        assert!(output.contains("2% of $100.00 budget"));
    }

    #[test]
    fn render_empty_snapshot() {
        let output = render_snapshot(&UsageSnapshot::default(), &AppConfig::default(), now(), false);
        assert!(output.contains("No usage yet"));
        assert!(output.contains("No recent activity"));
        assert!(!output.contains("Updated"));
    }

    #[test]
    fn render_error_keeps_data() {
        let mut snapshot = make_snapshot();
        snapshot.state = RefreshState::Error("network down".into());
        snapshot.last_error = Some("network down".into());
        let output = render_snapshot(&snapshot, &AppConfig::default(), now(), false);
        assert!(output.contains("network down"));
        assert!(output.contains("$1.50"));
    }

    #[test]
    fn render_ended_block() {
        let mut models = BTreeMap::new();
        models.insert("claude-opus-4".to_string(), ModelPricing::new(1.5e-5, 7.5e-5));
        let pricing = PricingTable::new(models, now());
        let entries = vec![entry("2024-03-10T07:00:00Z", "claude-opus-4", 10)];
        let mut snapshot = UsageSnapshot::default();
        snapshot.data.current_block = calculate_current_block_at(&entries, &pricing, now());
        let output = render_snapshot(&snapshot, &AppConfig::default(), now(), false);
        assert!(output.contains("ended"));
    }

    #[test]
    fn render_no_ansi_when_color_false() {
        let output = render_snapshot(&make_snapshot(), &AppConfig::default(), now(), false);
        assert!(!output.contains('\x1b'), "output should not contain ANSI codes");
    }
}
