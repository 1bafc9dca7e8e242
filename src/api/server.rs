//! API Server
//!
//! Wraps the router in the tower-http stack and serves it until shutdown.

use super::{handlers::AppState, middleware::create_cors_layer, routes::create_router};
use crate::config::ServerConfig;
use crate::errors::{ConfigurationError, RgsError};
use std::future::Future;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

pub struct ApiServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Router with the full middleware stack
    pub fn create_app(&self) -> axum::Router {
        create_router(self.state.clone())
            // CORS before timeout so preflight is answered directly
            .layer(create_cors_layer())
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigurationError> {
        let ip = self
            .config
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| ConfigurationError::InvalidValue {
                field: "server.host".to_string(),
                value: self.config.host.clone(),
                reason: e.to_string(),
            })?;
        Ok(SocketAddr::from((ip, self.config.port)))
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<(), RgsError> {
        self.run_until(shutdown_signal()).await
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<(), RgsError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.socket_addr()?;
        let app = self.create_app();
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!(%addr, timeout_secs = self.config.request_timeout_secs, "RGS API listening");
        info!("Routes: POST /bets, POST /players, GET /rounds/:id, GET /webhooks, GET /outbox, GET /audit, GET /stream");

        axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

        info!("API server stopped");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
