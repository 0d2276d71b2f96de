use chrono::{DateTime, Duration, Local, Timelike, Utc};

/// Returns "$1.23" with `decimals` places after the point.
pub fn format_cost(value: f64, decimals: u8) -> String {
    format!("${:.*}", usize::from(decimals), value)
}

/// Returns "950", "12.3K" or "4.56M".
pub fn format_tokens(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{:.2}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        count.to_string()
    }
}

/// Returns "Xh Ym left", "Ym left" or "ending" once nothing is left.
pub fn format_time_remaining(remaining: Duration) -> String {
    let total_minutes = remaining.num_minutes();
    if remaining <= Duration::zero() {
        return "ending".to_string();
    }
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours > 0 {
        format!("{}h {}m left", hours, minutes)
    } else {
        format!("{}m left", total_minutes.max(1))
    }
}

/// Returns "ends 5:30 PM" in local time.
pub fn format_block_end(end: &DateTime<Utc>) -> String {
    let local = end.with_timezone(&Local);
    let hour = local.hour();
    let am_pm = if hour < 12 { "AM" } else { "PM" };
    let hour_12 = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("ends {}:{:02} {}", hour_12, local.minute(), am_pm)
}

/// Returns "[████░░░░]" with █ for the elapsed share of `fraction`.
pub fn format_progress_bar(fraction: f64, width: usize) -> String {
    let fraction = fraction.clamp(0.0, 1.0);
    let filled = (fraction * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Returns "42% of $10.00 budget".
pub fn format_budget(fraction: f64, budget: f64, decimals: u8) -> String {
    format!(
        "{}% of {} budget",
        (fraction * 100.0).round() as i64,
        format_cost(budget, decimals)
    )
}
