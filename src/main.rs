//! netpulse daemon entry point.

use netpulse::config::MonitorConfig;
use netpulse::devices::FileDeviceSource;
use netpulse::probe::PingProber;
use netpulse::scheduler::Scheduler;
use netpulse::store::Store;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("netpulse=info".parse()?))
        .init();

    // Load configuration
    let cfg = MonitorConfig::load();
    tracing::info!("Using data directory {}", cfg.data_dir.display());

    // The only failure allowed to stop the process
    let store = Arc::new(Store::open(&cfg.data_dir)?);

    let prober = PingProber::from_config(&cfg);
    let devices = FileDeviceSource::new(store.clone(), &cfg.default_devices);
    let scheduler = Scheduler::new(cfg, store, prober, devices);

    scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    tracing::info!("Monitor stopped");
    Ok(())
}
