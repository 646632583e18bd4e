//! HTTP admission listener.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use kubetrail::{AdmissionResponseReview, AdmissionReview, AuditContext, AuditEvent, EventQueue, ProcessorState};

#[derive(Clone)]
pub struct AppState {
    pub context: Arc<AuditContext>,
    pub queue: Arc<EventQueue>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub sync_complete: bool,
    pub processor_state: ProcessorState,
    pub queued: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/audit", post(audit))
        .route("/health", get(health))
        .with_state(state)
}

/// Queues the event and allows the request. Admission is never denied,
/// not even for bodies that cannot be parsed.
async fn audit(State(state): State<AppState>, body: Bytes) -> Json<AdmissionResponseReview> {
    let review = match AdmissionReview::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            log::warn!("Ignoring admission request: {}", e);
            return Json(AdmissionResponseReview::allow("", None));
        }
    };

    let uid = review.uid().to_string();
    let api_version = review.api_version.clone();

    match AuditEvent::from_review(review, &state.context.config.audit_service_account) {
        Ok(event) => {
            log::debug!("Queued {} event {}", event.operation, uid);
            if let Err(e) = state.queue.submit(event) {
                log::error!("Failed to queue admission request {}: {}", uid, e);
            }
        }
        Err(e) => log::warn!("Skipping admission request {}: {}", uid, e),
    }

    Json(AdmissionResponseReview::allow(&uid, api_version.as_deref()))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.context.is_ready() { "healthy" } else { "starting" },
        timestamp: chrono::Utc::now().to_rfc3339(),
        sync_complete: state.context.is_sync_complete(),
        processor_state: state.queue.state(),
        queued: state.queue.len(),
    })
}

/// Serves until SIGINT or SIGTERM.
pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("Admission webhook listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("Shutdown signal received");
}
