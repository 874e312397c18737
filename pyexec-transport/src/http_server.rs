//! Single-endpoint HTTP transport
//!
//! `POST /mcp` takes one JSON-RPC message and answers with one JSON-RPC
//! response; notifications are acknowledged with `202 Accepted`.

use crate::handler::McpHandler;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Create the HTTP router
pub fn create_router(handler: Arc<McpHandler>) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp_request))
        .route("/health", get(health))
        .with_state(handler)
}

/// Serve on `listener` until Ctrl-C
pub async fn start_server(listener: tokio::net::TcpListener, handler: Arc<McpHandler>) -> Result<()> {
    let bind_addr = listener
        .local_addr()
        .context("Failed to obtain HTTP server bind address")?;
    info!("Serving JSON-RPC on http://{}/mcp", bind_addr);

    axum::serve(listener, create_router(handler))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

async fn handle_mcp_request(State(handler): State<Arc<McpHandler>>, body: String) -> Response {
    debug!(bytes = body.len(), "Received HTTP POST request");
    match handler.handle_line(&body).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
