//! Read-only management API.
//!
//! Small HTTP surface for operators: node health, peer/token state,
//! and the current cell contents. Everything here is best-effort
//! observation; nothing acquires tokens.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{extract::State, response::Json, routing::get, Router};
use replicell_common::{CellValue, NodeId};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ManagementConfig;
use crate::replica::ReplicaNode;

#[derive(Clone)]
struct ManagementState {
    node: Arc<ReplicaNode>,
    started_at: Instant,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    node_id: NodeId,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    node_id: NodeId,
    peers: Vec<NodeId>,
    read_holders: Vec<NodeId>,
    write_holder: Option<NodeId>,
    value: CellValue,
}

#[derive(Debug, Serialize)]
struct ValueResponse {
    value: CellValue,
}

async fn health(State(state): State<ManagementState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        node_id: state.node.id().clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

async fn status(State(state): State<ManagementState>) -> Json<StatusResponse> {
    let tokens = state.node.token_snapshot().await;
    Json(StatusResponse {
        node_id: state.node.id().clone(),
        peers: state.node.peers().ids().await,
        read_holders: tokens.readers,
        write_holder: tokens.writer,
        value: state.node.current_value(),
    })
}

async fn value(State(state): State<ManagementState>) -> Json<ValueResponse> {
    Json(ValueResponse {
        value: state.node.current_value(),
    })
}

/// Serve the management API until shutdown.
pub async fn start_management_api(
    config: ManagementConfig,
    node: Arc<ReplicaNode>,
    shutdown: CancellationToken,
) -> Result<()> {
    let state = ManagementState {
        node,
        started_at: Instant::now(),
    };

    let app = Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/value", get(value))
        .with_state(state);

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind management API to {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "management API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("management API server failed")?;

    Ok(())
}
