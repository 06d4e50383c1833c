use anyhow::Context;
use paperdrop_api::setup;
use paperdrop_core::Config;
use paperdrop_infra::{init_telemetry, shutdown_telemetry};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env().context("Failed to load configuration")?;

    init_telemetry(
        config.service_name(),
        config.environment(),
        config.is_production(),
    )
    .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    let (_state, router, background) = setup::initialize_app(config.clone()).await?;

    setup::server::start_server(&config, router).await?;

    background.shutdown().await;
    shutdown_telemetry().await;
    Ok(())
}
