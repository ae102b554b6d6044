//! Modbus Monitor
//!
//! Polls a Modbus gateway and serves the dashboard API.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use modbus_monitor::config;
use modbus_monitor::dashboard::Dashboard;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default level
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting Modbus Monitor v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config()?;
    info!(
        "Configuration loaded: gateway {}, API on {}:{}",
        config.gateway.base_url, config.server.host, config.server.port
    );

    let dashboard = Dashboard::new(config)?;
    dashboard.run().await?;

    Ok(())
}
