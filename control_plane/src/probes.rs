use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use canopy_core::sync::signal::Receiver;
use canopy_core::task::Builder as TaskBuilder;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProbesError {
    #[error("Failed to bind probe endpoint: {0}")]
    NetworkBind(#[from] std::io::Error),
}

/// Liveness signals of the watches the control plane depends on, keyed by kind.
#[derive(Clone, Default)]
pub struct ProbeState {
    watches: Arc<Vec<(String, Receiver<bool>)>>,
}

impl ProbeState {
    pub fn new(watches: Vec<(String, Receiver<bool>)>) -> Self {
        Self {
            watches: Arc::new(watches),
        }
    }

    /// Kinds whose watch is currently reported down.
    pub fn failing(&self) -> Vec<&str> {
        self.watches
            .iter()
            .filter(|(_, live)| !*live.current())
            .map(|(kind, _)| kind.as_str())
            .collect()
    }
}

async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "UP" })))
}

async fn readiness_check(State(state): State<ProbeState>) -> impl IntoResponse {
    let failing = state.failing();
    if failing.is_empty() {
        (StatusCode::OK, Json(json!({ "status": "UP" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "DOWN", "failingWatches": failing })),
        )
    }
}

fn router(state: ProbeState) -> Router {
    Router::new()
        .route("/healthz/liveness", get(liveness_check))
        .route("/healthz/readiness", get(readiness_check))
        .with_state(state)
}

pub async fn spawn_probes(
    task_builder: &TaskBuilder,
    port: u16,
    state: ProbeState,
) -> Result<(), ProbesError> {
    let endpoint = SocketAddr::from(([0, 0, 0, 0], port));
    let tcp_listener = TcpListener::bind(endpoint).await?;
    info!("Serving probes on {}", endpoint);

    let token = task_builder.cancellation_token();
    task_builder.new_task("probes").spawn(async move {
        if let Err(err) = axum::serve(tcp_listener, router(state))
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            warn!("Probe endpoint failed: {}", err);
        }
    });

    Ok(())
}
