pub mod router;
pub mod shutdown;

use crate::config::Config;
use crate::metrics::MetricsRegistry;
use crate::scheduler::RefreshScheduler;
use crate::upstream::SonarClient;
use anyhow::{Context, Result};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use router::{build_router, AppState, ExporterInfo};
pub use shutdown::ShutdownCoordinator;

/// The exporter process: refresh loop plus the scrape endpoints.
pub struct Server {
    config: Arc<Config>,
    registry: Arc<MetricsRegistry>,
    scheduler: RefreshScheduler<SonarClient>,
    shutdown_coordinator: Arc<ShutdownCoordinator>,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let client = SonarClient::new(&config.sonar).context("Failed to create SonarQube client")?;
        let registry = Arc::new(
            MetricsRegistry::new(&config.exporter.metrics).context("Failed to create metrics registry")?,
        );
        let scheduler = RefreshScheduler::new(Arc::new(client), Arc::clone(&registry), &config)?;

        Ok(Self {
            config: Arc::new(config),
            registry,
            scheduler,
            shutdown_coordinator: Arc::new(ShutdownCoordinator::new()),
        })
    }

    pub fn shutdown_coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.shutdown_coordinator)
    }

    /// Bind the listener, start the refresh loop and serve until shutdown.
    pub async fn serve(self) -> Result<()> {
        let addr_str = self.config.server.listen_addr();

        // Resolve hostname to socket address (supports both IP addresses and hostnames like "localhost")
        let addr: SocketAddr = addr_str
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve address: '{}'", addr_str))?
            .next()
            .with_context(|| format!("No addresses resolved for: '{}'", addr_str))?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to address: {}", addr))?;

        self.serve_on(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!("Exporter listening on http://{}", local_addr);

        // Subscribe before anything can initiate shutdown, so the refresh loop
        // cannot miss the broadcast.
        let refresh_shutdown = self.shutdown_coordinator.subscribe();

        // Spawn signal handler for graceful shutdown
        let signal_coordinator = Arc::clone(&self.shutdown_coordinator);
        tokio::spawn(async move {
            if let Err(e) = shutdown::setup_signal_handler(signal_coordinator).await {
                warn!("Signal handler error: {:#}", e);
            }
        });

        let refresh_handle = if self.shutdown_coordinator.is_shutting_down() {
            info!("Shutdown requested before start; skipping refresh loop");
            None
        } else {
            Some(self.scheduler.spawn(refresh_shutdown))
        };

        let state = Arc::new(AppState {
            registry: Arc::clone(&self.registry),
            info: ExporterInfo::from_config(&self.config),
        });
        let app = build_router(state);

        let coordinator = Arc::clone(&self.shutdown_coordinator);
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { coordinator.wait().await })
            .await
            .context("HTTP server error");

        // Stop the refresh loop too if the server ended on its own.
        self.shutdown_coordinator.shutdown();
        if let Some(handle) = refresh_handle {
            if let Err(e) = handle.await {
                warn!("Refresh loop ended abnormally: {}", e);
            }
        }

        info!("Exporter stopped");
        served
    }
}
