mod worker;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transit_store::app_config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "transit_worker=debug,transit_inventory=debug,transit_store=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting transit worker with {:?} seat backend", config.inventory.backend);

    let services = worker::build_services(&config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = vec![tokio::spawn(worker::log_inventory_events(
        services.workflow.inventory().subscribe(),
        shutdown_rx.clone(),
    ))];
    if let Some(sweeper) = services.sweeper {
        let interval = services.sweep_interval;
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { sweeper.run(interval, rx).await }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Background task ended abnormally: {}", e);
        }
    }

    tracing::info!("Transit worker stopped");
    Ok(())
}
