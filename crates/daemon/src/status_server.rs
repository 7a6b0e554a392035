//! Read-only HTTP status endpoint.
//!
//! Exposes the upload registry and toon enablement as JSON for dashboards
//! and scripts.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use thiserror::Error;

use crate::accounts::ToonEnablement;
use crate::registry::{UploadRecord, UploadRegistry};

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address {0:?}")]
    InvalidAddress(String),

    #[error("status server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared with the handlers.
#[derive(Debug, Clone)]
pub struct StatusState {
    pub registry: UploadRegistry,
    pub enablement: ToonEnablement,
}

/// Handler for GET /uploads
async fn list_uploads(State(state): State<StatusState>) -> Json<Vec<UploadRecord>> {
    Json(state.registry.snapshot().await)
}

/// Handler for GET /uploads/:index
async fn get_upload(
    State(state): State<StatusState>,
    Path(index): Path<usize>,
) -> Result<Json<UploadRecord>, StatusCode> {
    state
        .registry
        .get(index)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Handler for GET /toons
async fn list_toons(State(state): State<StatusState>) -> Json<BTreeMap<String, bool>> {
    Json(state.enablement.snapshot())
}

pub fn create_status_router(state: StatusState) -> Router {
    Router::new()
        .route("/uploads", get(list_uploads))
        .route("/uploads/:index", get(get_upload))
        .route("/toons", get(list_toons))
        .with_state(state)
}

/// Serve the status endpoint on `bind` until `shutdown` resolves.
///
/// # Returns
/// * `Ok(())` after a graceful shutdown
/// * `Err(ServerError)` if the address is invalid or cannot be bound
pub async fn run_status_server<F>(
    bind: &str,
    state: StatusState,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| ServerError::InvalidAddress(bind.to_string()))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "status server listening");

    axum::serve(listener, create_status_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
