use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::cli::output::{to_json, OutputFormat, OutputOptions};
use crate::cli::renderer;
use crate::core::config::AppConfig;
use crate::core::models::snapshot::UsageSnapshot;
use crate::core::refresh::RefreshOrchestrator;

#[derive(Serialize)]
pub(crate) struct ReportPayload<'a> {
    #[serde(flatten)]
    snapshot: &'a UsageSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    daily_budget_fraction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    monthly_budget_fraction: Option<f64>,
}

impl<'a> ReportPayload<'a> {
    pub(crate) fn new(snapshot: &'a UsageSnapshot, config: &AppConfig) -> Self {
        Self {
            snapshot,
            daily_budget_fraction: snapshot.daily_budget_fraction(config.daily_budget),
            monthly_budget_fraction: snapshot.monthly_budget_fraction(config.monthly_budget),
        }
    }
}

/// One refresh pass, then print the result.
pub async fn run(config: &AppConfig, opts: &OutputOptions) -> Result<()> {
    let orchestrator = RefreshOrchestrator::from_config(config)?;

    // Show spinner on stderr (text mode only)
    let spinner = if matches!(opts.format, OutputFormat::Text) {
        Some(tokio::spawn(async move {
            let frames = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
            let mut i = 0usize;
            loop {
                eprint!("\r {} Reading usage logs...", frames[i % frames.len()]);
                i = i.wrapping_add(1);
                tokio::time::sleep(std::time::Duration::from_millis(80)).await;
            }
        }))
    } else {
        None
    };

    let result = orchestrator.refresh().await;

    if let Some(s) = spinner {
        s.abort();
        eprint!("\r\x1b[2K");
    }
    result.context("Usage refresh failed")?;

    let snapshot = orchestrator.snapshot();
    match opts.format {
        OutputFormat::Text => {
            println!(
                "{}",
                renderer::render_snapshot(&snapshot, config, Utc::now(), opts.use_color)
            );
        }
        OutputFormat::Json => {
            println!("{}", to_json(&ReportPayload::new(&snapshot, config), opts.pretty)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_omits_unset_budgets() {
        let snapshot = UsageSnapshot::default();
        let config = AppConfig::default();
        let json = serde_json::to_value(ReportPayload::new(&snapshot, &config)).unwrap();
        assert!(json.get("daily_budget_fraction").is_none());
        assert!(json.get("today").is_some());
        assert_eq!(json["state"]["status"], "idle");
    }

    #[test]
    fn payload_includes_configured_budgets() {
        let mut snapshot = UsageSnapshot::default();
        snapshot.data.today.total_cost = 2.0;
        let config = AppConfig {
            daily_budget: Some(8.0),
            ..AppConfig::default()
        };
        let json = serde_json::to_value(ReportPayload::new(&snapshot, &config)).unwrap();
        assert_eq!(json["daily_budget_fraction"], 0.25);
    }
}
