//! Context API: open a context on a service, process requests through it,
//! read its interaction log, and close it.

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use chatfuse_core::context::HistoryEntry;
use chatfuse_orchestrator::{NormalizedResponse, ServiceRequest};

use crate::{ApiError, SharedState, error_response};

pub fn contexts_router() -> Router<SharedState> {
    Router::new()
        .route("/contexts", post(create_context_handler))
        .route("/contexts/{id}", axum::routing::delete(delete_context_handler))
        .route("/contexts/{id}/process", post(process_handler))
        .route("/contexts/{id}/history", get(history_handler))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateContextRequest {
    service_id: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateContextResponse {
    context_id: String,
}

#[derive(Deserialize)]
struct ProcessRequest {
    payload: ServiceRequest,
}

async fn create_context_handler(
    State(state): State<SharedState>,
    Json(body): Json<CreateContextRequest>,
) -> Result<(StatusCode, Json<CreateContextResponse>), ApiError> {
    let context_id = state
        .orchestrator
        .open_context(&body.service_id, body.data)
        .await
        .map_err(error_response)?;

    info!(context_id = %context_id, service_id = %body.service_id, "Context opened");
    Ok((StatusCode::CREATED, Json(CreateContextResponse { context_id })))
}

async fn process_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<ProcessRequest>,
) -> Result<Json<NormalizedResponse>, ApiError> {
    let orchestrator = &state.orchestrator;
    orchestrator
        .router
        .process(&id, body.payload, orchestrator.deadline())
        .await
        .map(Json)
        .map_err(error_response)
}

async fn history_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    state
        .orchestrator
        .contexts
        .history(&id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn delete_context_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .contexts
        .evict(&id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
