//! HTTP surface for the stage handlers.
//!
//! - `POST /stages/:stage/batch` – Run one stage over a broker batch event and return the
//!   partial batch response (`batchItemFailures`). Stages accept either their status name
//!   (`extraction`) or their handler name (`parse`).
//! - `GET /metrics` – Records processed and failed, chunks stored.
//! - `GET /health` – Liveness probe.

use crate::pipeline::{BatchEvent, BatchResponse, Stage};
use crate::runtime::Runtime;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router over a shared runtime.
pub fn create_router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/stages/:stage/batch", post(handle_batch))
        .route("/metrics", get(get_metrics))
        .route("/health", get(health))
        .with_state(runtime)
}

async fn handle_batch(
    State(runtime): State<Arc<Runtime>>,
    Path(stage): Path<String>,
    Json(event): Json<BatchEvent>,
) -> Result<Json<BatchResponse>, AppError> {
    let stage = Stage::from_name(&stage).ok_or(AppError::UnknownStage(stage))?;
    let records = event.records.len();
    let response = runtime.processor(stage).handle_event(event).await;
    tracing::info!(
        stage = %stage,
        records,
        failed = response.batch_item_failures.len(),
        "Batch request completed"
    );
    Ok(Json(response))
}

async fn get_metrics(State(runtime): State<Arc<Runtime>>) -> Json<crate::metrics::MetricsSnapshot> {
    Json(runtime.metrics().snapshot())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

enum AppError {
    UnknownStage(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::UnknownStage(stage) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("unknown stage '{stage}'") })),
            )
                .into_response(),
        }
    }
}
