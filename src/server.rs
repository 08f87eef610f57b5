//! Worker HTTP surface: health, provider listing, metrics and the fulfillment
//! trigger used by the queue consumer.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tracing::{error, info};

use crate::dispatch::OcrDispatcher;
use crate::fulfillment::{FulfillOutcome, OcrFulfillment};
use crate::metrics::{MetricsSnapshot, OcrMetrics};
use crate::ocr::ProviderDescriptor;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub fulfillment: Arc<OcrFulfillment>,
    pub dispatcher: Arc<OcrDispatcher>,
    pub metrics: Arc<OcrMetrics>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/providers", get(list_providers))
        .route("/metrics", get(metrics_snapshot))
        .route(
            "/collections/:collection_id/documents/:document_id/ocr",
            post(fulfill_document),
        )
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderDescriptor>> {
    Json(state.dispatcher.registry().descriptors())
}

async fn metrics_snapshot(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Run OCR for one collection member.
async fn fulfill_document(
    State(state): State<AppState>,
    Path((collection_id, document_id)): Path<(String, String)>,
) -> Result<Json<FulfillOutcome>, (StatusCode, String)> {
    info!("OCR requested for {}/{}", collection_id, document_id);

    state
        .fulfillment
        .fulfill(&collection_id, &document_id)
        .await
        .map(Json)
        .map_err(|e| {
            if e.is_not_found() {
                (StatusCode::NOT_FOUND, e.to_string())
            } else {
                error!("Fulfillment failed for {}/{}: {}", collection_id, document_id, e);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Fulfillment failed: {}", e))
            }
        })
}
