//! Chat and session routes. Every handler here runs behind the principal
//! middleware and acts on behalf of the caller in [`Principal`].

use axum::{
    Extension, Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use chatfuse_core::message::{ChatSession, Message};
use chatfuse_orchestrator::ChatRequest;
use chatfuse_session::{SaveReceipt, SessionSummary};

use crate::{ApiError, Principal, SharedState, error_response};

pub fn chat_router() -> Router<SharedState> {
    Router::new()
        .route("/chat/message", post(message_handler))
        .route("/chat/history", post(save_history_handler))
        .route("/chat/sessions", get(list_sessions_handler))
        .route(
            "/chat/session/{id}",
            get(get_session_handler).delete(delete_session_handler),
        )
}

#[derive(Serialize)]
struct ReplyResponse {
    reply: Message,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveHistoryRequest {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    messages: Vec<Value>,
}

async fn message_handler(
    State(state): State<SharedState>,
    Extension(Principal(user_id)): Extension<Principal>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ReplyResponse>, ApiError> {
    let orchestrator = &state.orchestrator;
    let reply = orchestrator
        .chat
        .send(&user_id, request, orchestrator.deadline())
        .await
        .map_err(error_response)?;
    Ok(Json(ReplyResponse { reply }))
}

async fn save_history_handler(
    State(state): State<SharedState>,
    Extension(Principal(user_id)): Extension<Principal>,
    Json(body): Json<SaveHistoryRequest>,
) -> Result<Json<SaveReceipt>, ApiError> {
    let receipt = state
        .sessions
        .save(&user_id, &body.session_id, &body.messages)
        .await
        .map_err(error_response)?;
    info!(
        user_id = %user_id,
        saved = receipt.saved_session_id.is_some(),
        "History save handled"
    );
    Ok(Json(receipt))
}

async fn list_sessions_handler(
    State(state): State<SharedState>,
    Extension(Principal(user_id)): Extension<Principal>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    state
        .sessions
        .list(&user_id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn get_session_handler(
    State(state): State<SharedState>,
    Extension(Principal(user_id)): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<ChatSession>, ApiError> {
    state
        .sessions
        .get(&user_id, &id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn delete_session_handler(
    State(state): State<SharedState>,
    Extension(Principal(user_id)): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .sessions
        .delete(&user_id, &id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
