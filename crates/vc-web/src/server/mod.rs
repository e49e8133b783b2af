//! HTTP server exposing the socket bridge

mod handler;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use crate::state::WebState;

pub use handler::{ConfigResponse, ConsoleQuery};

/// Routes served by the web console
pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/ws", get(handler::console_socket))
        .route("/api/config", get(handler::config))
        .with_state(state)
}

/// Web console server
pub struct WebServer {
    address: String,
    state: WebState,
}

impl WebServer {
    pub fn new(address: impl Into<String>, state: WebState) -> Self {
        Self {
            address: address.into(),
            state,
        }
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind to {}", self.address))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until the state's shutdown token
    /// is cancelled
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            "Serving web console at http://{}/ (mode={})",
            local_addr,
            self.state.settings.mode()
        );

        let shutdown = self.state.shutdown.clone();
        let app = router(self.state);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Web server failed")?;

        tracing::info!("Web server shut down");
        Ok(())
    }
}
