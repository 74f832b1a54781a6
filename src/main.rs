use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use signal_mirror::config::Config;
use signal_mirror::monitor::SignalMonitor;
use signal_mirror::remote::HttpPageClient;
use signal_mirror::session::WebDriverAutomation;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let automation = Arc::new(WebDriverAutomation::from_config(&cfg)?);
    let transport = Arc::new(HttpPageClient::new()?);
    let mut monitor = SignalMonitor::new(&cfg, automation, transport)?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down");
            trigger.cancel();
        }
    });

    if let Err(e) = monitor.start(&shutdown).await {
        error!("{}", e);
        return Err(e.into());
    }
    info!("Monitor is now running. Press Ctrl+C to stop.");
    monitor.run(shutdown).await?;

    Ok(())
}
