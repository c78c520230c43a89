//! HTTP server

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState};
use crate::provision::Provisioner;

/// Largest request body accepted, 1 MiB.
pub const MAX_BODY_BYTES: usize = 1 << 20;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/conjur", post(handlers::create_environment))
        .route("/conjur/:id", get(handlers::show_environment))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP API Server
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    pub fn new(provisioner: Provisioner, addr: SocketAddr) -> Self {
        let state: AppState = Arc::new(provisioner);
        Self {
            router: router(state),
            addr,
        }
    }

    /// Serve until Ctrl-C.
    pub async fn run(self) -> Result<(), std::io::Error> {
        tracing::info!("Listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
