use std::time::Duration;
use tracing::{error, info};
use twap_engine::runner::ShutdownHandle;
use twap_server::config::ServiceConfig;
use twap_server::service::Service;
use twap_server::telemetry;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> eyre::Result<()> {
    telemetry::init();

    let config = ServiceConfig::from_env().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;
    info!(
        windows = config.windows.len(),
        confirmed = config.enable_confirmed,
        unconfirmed = config.enable_unconfirmed,
        catch_up_only = config.catch_up_only,
        "Starting TWAP service"
    );

    let shutdown = ShutdownHandle::new();
    let service = Service::start(&config, &shutdown).await?;

    if config.catch_up_only {
        // Runners return on their own once caught up.
        tokio::select! {
            _ = wait_until_finished(&service) => info!("Catch-up complete"),
            _ = tokio::signal::ctrl_c() => info!("Interrupted during catch-up"),
        }
    } else {
        tokio::signal::ctrl_c().await?;
        info!("Shutdown requested");
    }

    shutdown.shutdown();
    service.stop(SHUTDOWN_GRACE).await;
    Ok(())
}

async fn wait_until_finished(service: &Service) {
    while !service.is_finished() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
