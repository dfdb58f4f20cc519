use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::errors::{CertsError, Result};

pub async fn start_api_server(config: &ServerConfig, router: Router) -> Result<()> {
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .map_err(|e| CertsError::config(format!("Invalid API address: {}", e)))?;

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        CertsError::config_with_source(format!("Failed to bind API server to {}", addr), Box::new(e))
    })?;

    info!(address = %addr, "Starting HTTP API server");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "API server shutdown listener failed");
            }
        })
        .await
        .map_err(|e| CertsError::config_with_source("API server error", Box::new(e)))?;

    info!("API server shutdown completed");
    Ok(())
}
