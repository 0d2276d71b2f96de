use anyhow::Result;
use chrono::Utc;
use crossterm::{
    cursor,
    terminal::{self, ClearType},
    QueueableCommand,
};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cli::output::{to_json, OutputFormat, OutputOptions};
use crate::cli::renderer;
use crate::cli::report_cmd::ReportPayload;
use crate::core::config::AppConfig;
use crate::core::models::snapshot::UsageSnapshot;
use crate::core::refresh::RefreshOrchestrator;
use crate::core::watcher::{watch_roots, DirectoryWatcher};

/// Keep the published state live and redraw it on every change until Ctrl-C.
///
/// Text mode redraws the screen in place; JSON mode prints one line per
/// published snapshot.
pub async fn run(config: &AppConfig, opts: &OutputOptions) -> Result<()> {
    let orchestrator = Arc::new(RefreshOrchestrator::from_config(config)?);
    let shutdown = CancellationToken::new();

    let interval = config.refresh_interval();
    let (change_tx, change_rx) = mpsc::channel(1);
    let mut watcher = watch_roots(orchestrator.loader().roots(), change_tx.clone());
    if watcher.is_none() {
        if interval.is_none() {
            tracing::warn!("refresh timer is disabled and no log directory can be watched; usage will not update");
        } else {
            tracing::info!("no log directories to watch; relying on the refresh timer");
        }
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("interrupt received");
            }
            shutdown.cancel();
        });
    }

    let mut updates = orchestrator.subscribe();
    let refresher = {
        let orchestrator = Arc::clone(&orchestrator);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { orchestrator.run(change_rx, interval, shutdown).await })
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                draw(&snapshot, config, opts)?;

                if watcher.as_ref().is_some_and(DirectoryWatcher::is_outdated) {
                    tracing::info!("log directories appeared or moved; watching again");
                    watcher = watch_roots(orchestrator.loader().roots(), change_tx.clone());
                    let _ = change_tx.try_send(());
                }
            }
        }
    }

    refresher.await?;
    drop(watcher);
    Ok(())
}

fn draw(snapshot: &UsageSnapshot, config: &AppConfig, opts: &OutputOptions) -> Result<()> {
    match opts.format {
        OutputFormat::Json => {
            // Only finished passes.
            if !snapshot.is_loading {
                println!("{}", to_json(&ReportPayload::new(snapshot, config), false)?);
            }
        }
        OutputFormat::Text => {
            let text = renderer::render_snapshot(snapshot, config, Utc::now(), opts.use_color);
            let mut stdout = io::stdout();
            stdout
                .queue(cursor::MoveTo(0, 0))?
                .queue(terminal::Clear(ClearType::All))?;
            writeln!(stdout, "{}", text)?;
            writeln!(stdout, "\n  Watching for changes, Ctrl-C to quit")?;
            stdout.flush()?;
        }
    }
    Ok(())
}
