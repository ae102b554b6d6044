//! Main dashboard orchestration

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::api::{self, ApiState};
use crate::config::Config;
use crate::metrics;
use crate::modbus::{
    AddressRange, Coils, DataChannel, DataDomain, DiscreteInputs, Gateway, HoldingRegisters,
    HttpGateway, PollingScheduler, WriteCommandExecutor,
};

/// Wires the gateway client, the three read channels and the writer together
pub struct Dashboard {
    config: Config,
    gateway: Arc<dyn Gateway>,
}

impl Dashboard {
    /// Create a dashboard talking to the configured gateway
    pub fn new(config: Config) -> Result<Self> {
        let gateway = HttpGateway::new(&config.gateway).context("Failed to build HTTP client")?;
        info!("Gateway at {}", gateway.base_url());

        Ok(Self::with_gateway(config, Arc::new(gateway)))
    }

    /// Create a dashboard over any gateway implementation
    pub fn with_gateway(config: Config, gateway: Arc<dyn Gateway>) -> Self {
        Self { config, gateway }
    }

    fn scheduler<D: DataDomain>(&self) -> Result<Arc<PollingScheduler<D>>> {
        let settings = self.config.polling.for_domain(D::DOMAIN);
        let range = AddressRange {
            start: settings.start_address,
            count: settings.count,
        };

        let channel = DataChannel::<D>::new(self.gateway.clone(), range)
            .with_context(|| format!("Invalid initial range for {}", D::DOMAIN))?;

        Ok(Arc::new(PollingScheduler::new(
            Arc::new(channel),
            Duration::from_millis(settings.interval_ms),
        )))
    }

    /// Build channels, schedulers and writer without starting anything
    pub fn build_state(&self, metrics: Option<PrometheusHandle>) -> Result<ApiState> {
        Ok(ApiState {
            registers: self.scheduler::<HoldingRegisters>()?,
            coils: self.scheduler::<Coils>()?,
            discrete_inputs: self.scheduler::<DiscreteInputs>()?,
            writer: Arc::new(WriteCommandExecutor::new(
                self.gateway.clone(),
                &self.config.write,
            )),
            metrics,
        })
    }

    /// Start polling every channel configured for auto-refresh
    pub async fn start_polling(&self, state: &ApiState) {
        if self.config.polling.registers.auto_refresh {
            state.registers.start().await;
        } else {
            state.registers.stop().await;
        }
        if self.config.polling.coils.auto_refresh {
            state.coils.start().await;
        } else {
            state.coils.stop().await;
        }
        if self.config.polling.discrete_inputs.auto_refresh {
            state.discrete_inputs.start().await;
        } else {
            state.discrete_inputs.stop().await;
        }
    }

    /// Run the dashboard until Ctrl-C
    pub async fn run(self) -> Result<()> {
        let metrics_handle = if self.config.server.metrics_enabled {
            let handle = metrics::init_metrics()?;
            info!("Prometheus metrics enabled at /metrics");
            Some(handle)
        } else {
            None
        };

        let state = self.build_state(metrics_handle)?;
        self.start_polling(&state).await;

        let app = api::create_router(state.clone(), self.config.server.static_dir.as_deref());

        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .context("Invalid server address")?;

        info!("Starting API server on http://{}", addr);
        info!("  - Health check: http://{}/health", addr);
        info!("  - Registers:    http://{}/api/registers", addr);
        info!("  - Coils:        http://{}/api/coils", addr);
        info!("  - Inputs:       http://{}/api/discrete-inputs", addr);
        info!("  - Write:        http://{}/api/write", addr);
        if self.config.server.metrics_enabled {
            info!("  - Metrics:      http://{}/metrics", addr);
        }

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Shutting down, stopping pollers");
        state.registers.stop().await;
        state.coils.stop().await;
        state.discrete_inputs.stop().await;

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
