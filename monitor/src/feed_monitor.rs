use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

use lib_stream::loggers::{cleanup_old_logs, init_tracing};
use lib_stream::{
    ApiClient, CommandDispatcher, CommandOutcome, ConnectionManager, DocumentUploader, FeedReconciler, HttpFeedSource,
    OverviewPoller, SseTransport, SubscriptionRouter,
};

mod monitor_logic;
use monitor_logic::{config, panels};

const APP_NAME: &str = "feed_monitor";

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    let _log_guard = init_tracing(config.log_dir(), APP_NAME, config.log_level())?;
    if let Err(e) = cleanup_old_logs(config.log_dir(), APP_NAME, 7) {
        tracing::warn!(error = %e, "Log cleanup failed");
    }

    let stream_config = config.stream_config()?;
    tracing::info!(base_url = %stream_config.base_url, "Starting feed monitor");

    let router = Arc::new(SubscriptionRouter::new());
    let panels = panels::Panels::register(Arc::clone(&router));

    let client = ApiClient::from_config(&stream_config).context("Failed to build HTTP client")?;
    let source = Arc::new(HttpFeedSource::new(client.clone(), &stream_config));
    let reconciler = Arc::new(FeedReconciler::attach(
        Arc::clone(&router),
        source.clone(),
        stream_config.feed_window,
        stream_config.page_size,
    ));

    let manager = ConnectionManager::new(stream_config.clone(), Arc::clone(&router), Arc::new(SseTransport::new()))
        .with_lifecycle_callback(|from, to| tracing::info!(%from, %to, "Stream state"));
    let handle = manager.open(stream_config.stream_endpoint()?);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let poller = OverviewPoller::new(client.clone(), handle.fallback_publisher(), &stream_config);
    let mut poller_shutdown = shutdown_tx.subscribe();
    let poller_handle = tokio::spawn(async move {
        tokio::select! {
            _ = poller.run_until_stream() => {}
            _ = poller_shutdown.recv() => {}
        }
    });

    let feed_handle = tokio::spawn(watch_feed(Arc::clone(&reconciler), shutdown_tx.subscribe()));

    if let Err(e) = reconciler.refresh().await {
        tracing::warn!(error = %e, "Initial ledger history fetch failed");
    }

    if let Some(action) = config.command.as_deref() {
        let dispatcher = CommandDispatcher::new(client.clone(), &stream_config);
        match dispatcher.send(action, None).await {
            CommandOutcome::Accepted { status } => tracing::info!(action, status, "Command sent"),
            CommandOutcome::Failed { reason } => tracing::error!(action, %reason, "Command failed"),
        }
    }

    if let Some(path) = config.upload.as_deref() {
        let uploader = DocumentUploader::new(client.clone(), &stream_config);
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());

        match uploader.upload(&file_name, bytes).await {
            Ok(receipt) => {
                tracing::info!(cid = %receipt.cid, "Document anchored");
                match source.document_ledger().await {
                    Ok(ledger) => {
                        for entry in ledger.iter().take(5) {
                            tracing::info!(panel = "documents", "{}", entry);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Document ledger refresh failed"),
                }
            }
            Err(e) => tracing::error!(error = %e, "Document upload failed"),
        }
    }

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        tracing::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "SIGTERM handler unavailable");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {}
    }

    let _ = shutdown_tx.send(());
    handle.close().await;
    let _ = tokio::try_join!(poller_handle, feed_handle);

    reconciler.detach();
    panels.unregister();

    let state = panels.state();
    tracing::info!(updates = state.updates, workers = %panels::worker_summary(&state.workers), "Shutdown complete.");
    Ok(())
}

/// Logs the head of the ledger feed whenever it changes.
async fn watch_feed(reconciler: Arc<FeedReconciler>, mut shutdown: broadcast::Receiver<()>) {
    let mut changes = reconciler.watch_changes();
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let feed = reconciler.snapshot();
                let head = feed.entries().first().map(|e| e.to_string()).unwrap_or_default();
                tracing::info!(
                    panel = "ledger",
                    len = feed.len(),
                    total = ?feed.known_total(),
                    can_load_more = feed.can_load_more(),
                    %head,
                    "Ledger feed updated"
                );
            }
        }
    }
}
