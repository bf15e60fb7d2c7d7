use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rollcall_watcher::notify::{LogNotifier, NotificationDispatcher, WebhookNotifier};
use rollcall_watcher::portal::{Portal, PortalClient};
use rollcall_watcher::{refresh, ServiceContext, WatcherConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = WatcherConfig::from_env()?;

    let default_filter = if config.debug {
        "rollcall_watcher=debug"
    } else {
        "rollcall_watcher=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting rollcall watcher for {}", config.login);

    let portal: Arc<dyn Portal> = Arc::new(
        PortalClient::new(&config.base_url, config.http_timeout)
            .context("Failed to build portal HTTP client")?,
    );
    let notifier: Arc<dyn NotificationDispatcher> = match &config.notify_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(url.as_str(), config.http_timeout)
                .context("Failed to build notification client")?,
        ),
        None => {
            tracing::warn!("NOTIFY_URL not set, notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let ctx = ServiceContext::new(config, portal, notifier);

    if let Err(e) = refresh::bootstrap(&ctx).await {
        tracing::error!("Startup failed: {:#}", e);
    }

    if !ctx.is_halted() {
        tracing::info!("Rollcall watcher running. Press Ctrl+C to stop.");
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                tracing::info!("Shutdown signal received, stopping...");
            }
            _ = ctx.wait_for_halt() => {}
        }
    }

    ctx.scheduler.stop();

    if ctx.is_halted() {
        bail!("Rollcall watcher stopped: portal rejected the credentials");
    }
    tracing::info!("Rollcall watcher stopped");
    Ok(())
}
