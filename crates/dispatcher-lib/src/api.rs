//! HTTP endpoints for Kubernetes health checks and Prometheus scraping
//!
//! Liveness only fails when one of the dispatcher's own loops is stuck.
//! Datahub and queue outages show up in the body and in readiness, since
//! restarting the pod cannot bring a dependency back.

use crate::health::{components, ComponentHealth, HealthRegistry, HealthResponse};
use crate::observability::DispatcherMetrics;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Components owned by the process; an unhealthy one fails liveness
pub const LIVENESS_COMPONENTS: [&str; 2] = [components::SCHEDULER, components::COMPLETION_LISTENER];

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: DispatcherMetrics,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: DispatcherMetrics) -> Self {
        Self {
            health_registry,
            metrics,
        }
    }
}

/// Liveness verdict for a health snapshot
pub fn liveness_status(health: &HealthResponse) -> StatusCode {
    let stuck = LIVENESS_COMPONENTS.iter().any(|name| {
        health
            .components
            .get(*name)
            .is_some_and(|component| !component.status.is_operational())
    });
    if stuck {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    let health = state.health_registry.health().await;
    (liveness_status(&health), Json(health)).into_response()
}

#[derive(Serialize)]
struct NamedComponent {
    name: String,
    #[serde(flatten)]
    health: ComponentHealth,
}

/// State of one dispatcher component, 503 when it is unhealthy
async fn component_health(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    if !components::ALL.contains(&name.as_str()) {
        return (
            StatusCode::NOT_FOUND,
            format!("unknown component {}, expected one of {}", name, components::ALL.join(", ")),
        )
            .into_response();
    }

    match state.health_registry.component(&name).await {
        Some(health) => {
            let code = if health.status.is_operational() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (code, Json(NamedComponent { name, health })).into_response()
        }
        // Completion listener is not started when model jobs are disabled
        None => (StatusCode::NOT_FOUND, format!("component {} not running", name)).into_response(),
    }
}

async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    let readiness = state.health_registry.readiness().await;
    let code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(readiness)).into_response()
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode() {
        Ok(buffer) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], buffer).into_response(),
        Err(err) => {
            error!(error = %err, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/healthz/:component", get(component_health))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve on all interfaces until shutdown is signalled
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Serving health and metrics");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    info!("API server stopped");
    Ok(())
}
