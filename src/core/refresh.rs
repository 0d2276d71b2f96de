use anyhow::Result;
use chrono::{DateTime, Local, TimeZone, Utc};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::config::AppConfig;
use crate::core::cost::aggregate::{
    aggregate_by_day_in, aggregate_by_month_in, last_n_days, this_month, today_summary_in,
};
use crate::core::cost::block::calculate_current_block_at;
use crate::core::cost::cache::{default_cache_path, PricingCache};
use crate::core::cost::fetch::RemotePricingSource;
use crate::core::cost::pricing::PricingTable;
use crate::core::cost::resolver::PricingResolver;
use crate::core::cost::scanner::EntryLoader;
use crate::core::models::snapshot::{RefreshState, UsageAggregates, UsageSnapshot};
use crate::core::models::usage::UsageEntry;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
const RECENT_DAYS: u32 = 14;

/// Compute every published view from one entry list and one pricing table.
pub fn build_aggregates<Tz: TimeZone>(
    entries: &[UsageEntry],
    pricing: &PricingTable,
    tz: &Tz,
    now: DateTime<Utc>,
) -> UsageAggregates {
    let today = now.with_timezone(tz).date_naive();
    let daily = aggregate_by_day_in(entries, pricing, tz);
    let monthly = aggregate_by_month_in(entries, pricing, tz);

    UsageAggregates {
        today: today_summary_in(entries, pricing, tz, today),
        current_block: calculate_current_block_at(entries, pricing, now),
        last_14_days: last_n_days(&daily, today, RECENT_DAYS),
        this_month: this_month(&monthly, today),
        monthly,
    }
}

/// Owns the published [`UsageSnapshot`] and is its only writer.
///
/// Refreshes are serialized: a trigger that arrives while one is running
/// waits for it to finish, then runs its own pass.
pub struct RefreshOrchestrator {
    resolver: PricingResolver,
    loader: EntryLoader,
    state: watch::Sender<UsageSnapshot>,
    running: Mutex<()>,
    debounce: Duration,
}

impl RefreshOrchestrator {
    pub fn new(resolver: PricingResolver, loader: EntryLoader) -> Self {
        let (state, _) = watch::channel(UsageSnapshot::default());
        Self {
            resolver,
            loader,
            state,
            running: Mutex::new(()),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    /// Wire up the remote pricing source, the default cache file and the
    /// discovered log roots.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let source = RemotePricingSource::new(config.pricing_url())?;
        let resolver = PricingResolver::new(
            Box::new(source),
            PricingCache::new(default_cache_path()),
        );
        Ok(Self::new(resolver, EntryLoader::discover()))
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn loader(&self) -> &EntryLoader {
        &self.loader
    }

    pub fn subscribe(&self) -> watch::Receiver<UsageSnapshot> {
        self.state.subscribe()
    }

    /// Copy of the currently published state.
    pub fn snapshot(&self) -> UsageSnapshot {
        self.state.borrow().clone()
    }

    /// Run one full pass: pricing, entries, aggregates, publish.
    ///
    /// On failure the previous aggregates stay published and the error is
    /// recorded alongside them.
    pub async fn refresh(&self) -> Result<()> {
        let _running = self.running.lock().await;

        self.state.send_modify(|s| {
            s.is_loading = true;
            s.state = RefreshState::Refreshing;
        });

        let now = Utc::now();
        match self.compute(now).await {
            Ok(data) => {
                tracing::debug!(
                    today_cost = data.today.total_cost,
                    days = data.last_14_days.len(),
                    months = data.monthly.len(),
                    active_block = data.current_block.as_ref().is_some_and(|b| b.is_active),
                    "refresh complete"
                );
                self.state.send_modify(|s| {
                    s.data = data;
                    s.is_loading = false;
                    s.last_updated = Some(now);
                    s.last_error = None;
                    s.state = RefreshState::Idle;
                });
                Ok(())
            }
            Err(e) => {
                let message = format!("{e:#}");
                tracing::error!("refresh failed: {message}");
                self.state.send_modify(|s| {
                    s.is_loading = false;
                    s.last_error = Some(message.clone());
                    s.state = RefreshState::Error(message);
                });
                Err(e)
            }
        }
    }

    async fn compute(&self, now: DateTime<Utc>) -> Result<UsageAggregates> {
        let pricing = self.resolver.load_pricing_at(now).await?;
        let report = self.loader.load_all_entries().await?;
        Ok(build_aggregates(&report.entries, &pricing, &Local, now))
    }

    /// Drive refreshes until `shutdown` fires.
    ///
    /// Runs an initial pass, then one per `interval` tick (if any) and one per
    /// burst on `changes`. Each change event pushes the pending deadline out
    /// by the debounce window; a refresh already running is never interrupted.
    pub async fn run(
        &self,
        mut changes: mpsc::Receiver<()>,
        interval: Option<Duration>,
        shutdown: CancellationToken,
    ) {
        let _ = self.refresh().await;

        let mut ticker = interval.map(|period| {
            let mut t = tokio::time::interval_at(Instant::now() + period, period);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            t
        });
        let mut pending: Option<Instant> = None;
        let mut changes_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = next_tick(&mut ticker) => {
                    tracing::debug!("timer refresh");
                    let _ = self.refresh().await;
                }
                event = changes.recv(), if changes_open => match event {
                    Some(()) => pending = Some(Instant::now() + self.debounce),
                    None => {
                        tracing::debug!("change feed closed");
                        changes_open = false;
                    }
                },
                _ = deadline(pending) => {
                    pending = None;
                    tracing::debug!("file change refresh");
                    let _ = self.refresh().await;
                }
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cost::resolver::fakes::{sonnet_document, FakeSource};
    use crate::core::models::cost::UsageSummary;
    use crate::core::models::usage::fixtures::entry;
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn write_log(root: &Path, name: &str, at: DateTime<Utc>, output: u64) {
        std::fs::create_dir_all(root).unwrap();
        let mut f = std::fs::File::create(root.join(name)).unwrap();
        writeln!(
            f,
            r#"{{"timestamp":"{}","requestId":"r-{name}","message":{{"id":"m-{name}","model":"claude-sonnet-4-20250514","usage":{{"input_tokens":0,"output_tokens":{output}}}}}}}"#,
            at.to_rfc3339()
        )
        .unwrap();
    }

    fn orchestrator(dir: &Path, source: FakeSource) -> RefreshOrchestrator {
        let resolver = PricingResolver::new(
            Box::new(source),
            PricingCache::new(dir.join("cache").join("pricing.json")),
        );
        let loader = EntryLoader::new(vec![dir.join("projects")]);
        RefreshOrchestrator::new(resolver, loader).with_debounce(Duration::from_millis(50))
    }

    fn failing(dir: &Path) -> (RefreshOrchestrator, Arc<AtomicUsize>) {
        let source = FakeSource::failing();
        let calls = source.calls.clone();
        (orchestrator(dir, source), calls)
    }

    #[test]
    fn build_aggregates_fills_every_view() {
        let now: DateTime<Utc> = "2024-03-10T12:00:00Z".parse().unwrap();
        let entries = vec![
            entry("2024-03-10T11:00:00Z", "claude-sonnet-4", 10),
            entry("2024-03-01T11:00:00Z", "claude-sonnet-4", 20),
            entry("2024-02-01T11:00:00Z", "claude-sonnet-4", 40),
        ];
        let data = build_aggregates(&entries, &PricingTable::empty(), &Utc, now);

        assert_eq!(data.today.tokens.output, 10);
        assert_eq!(data.current_block.as_ref().unwrap().tokens.output, 10);
        assert_eq!(data.last_14_days.len(), 2);
        assert_eq!(data.monthly.len(), 2);
        assert_eq!(data.this_month.unwrap().summary.tokens.output, 30);
    }

    #[tokio::test]
    async fn refresh_publishes_all_views_together() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        write_log(&dir.path().join("projects").join("p"), "a.jsonl", now - chrono::Duration::minutes(5), 1000);

        let orch = orchestrator(dir.path(), FakeSource::ok(sonnet_document(3e-6)));
        let mut rx = orch.subscribe();
        orch.refresh().await.unwrap();

        assert!(rx.has_changed().unwrap());
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.state, RefreshState::Idle);
        assert!(!snap.is_loading);
        assert!(snap.last_updated.is_some());
        assert!(snap.last_error.is_none());

        let block = snap.data.current_block.unwrap();
        assert!(block.is_active);
        assert_eq!(block.tokens.output, 1000);
        assert!((block.cost - 1000.0 * 1.5e-5).abs() < 1e-12);
        assert_eq!(snap.data.monthly.iter().map(|m| m.summary.entry_count).sum::<u32>(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_data() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, _) = failing(dir.path());

        let previous = UsageSummary {
            total_cost: 4.2,
            entry_count: 3,
            ..UsageSummary::default()
        };
        orch.state.send_modify(|s| s.data.today = previous.clone());

        let err = orch.refresh().await.unwrap_err();
        assert!(err.to_string().contains("Pricing unavailable"));

        let snap = orch.snapshot();
        assert_eq!(snap.data.today, previous);
        assert!(!snap.is_loading);
        assert!(matches!(snap.state, RefreshState::Error(_)));
        assert!(snap.last_error.unwrap().contains("Pricing unavailable"));
        assert!(snap.last_updated.is_none());
    }

    #[tokio::test]
    async fn success_clears_previous_error() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), FakeSource::ok(sonnet_document(3e-6)));
        orch.state.send_modify(|s| {
            s.last_error = Some("old".into());
            s.state = RefreshState::Error("old".into());
        });
        orch.refresh().await.unwrap();
        let snap = orch.snapshot();
        assert_eq!(snap.state, RefreshState::Idle);
        assert!(snap.last_error.is_none());
    }

    #[tokio::test]
    async fn burst_of_changes_triggers_one_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, calls) = failing(dir.path());
        let orch = Arc::new(orch);
        let (tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();

        let task = {
            let orch = Arc::clone(&orch);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { orch.run(rx, None, shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        for _ in 0..5 {
            tx.send(()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn timer_triggers_refreshes() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, calls) = failing(dir.path());
        let orch = Arc::new(orch);
        let (_tx, rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();

        let task = {
            let orch = Arc::clone(&orch);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                orch.run(rx, Some(Duration::from_millis(60)), shutdown).await
            })
        };

        tokio::time::sleep(Duration::from_millis(400)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn closed_change_feed_without_timer_idles_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, calls) = failing(dir.path());
        let orch = Arc::new(orch);
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let shutdown = CancellationToken::new();

        let task = {
            let orch = Arc::clone(&orch);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { orch.run(rx, None, shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
