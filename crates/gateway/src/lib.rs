//! HTTP API gateway for Chatfuse.
//!
//! Exposes the context API, the chat and session routes, health and the
//! service list over one Axum router.
//!
//! - `GET  /health`
//! - `GET  /services`
//! - `POST /contexts`, `POST /contexts/{id}/process`,
//!   `GET /contexts/{id}/history`, `DELETE /contexts/{id}`
//! - `POST /chat/message`, `POST /chat/history`, `GET /chat/sessions`,
//!   `GET /chat/session/{id}`, `DELETE /chat/session/{id}`
//!
//! Chat routes require the verified principal in the `x-user-id` header.

pub mod chat;
pub mod contexts;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Json,
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use chatfuse_config::{AppConfig, GatewayConfig};
use chatfuse_core::error::Error;
use chatfuse_core::service::ServiceDescriptor;
use chatfuse_orchestrator::Orchestrator;
use chatfuse_session::{InMemorySessionStore, SessionStore, USER_HEADER};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<dyn SessionStore>,
}

pub type SharedState = Arc<GatewayState>;

/// The authenticated caller of a chat route.
#[derive(Debug, Clone)]
pub struct Principal(pub String);

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a core error onto its HTTP status with an `{error}` body.
pub fn error_response(err: Error) -> ApiError {
    let status = match &err {
        Error::ContextNotFound(_) | Error::ServiceNotFound(_) | Error::SessionNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::UnsupportedServiceKind(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::Upstream { .. } | Error::MalformedUpstreamPayload { .. } | Error::ServiceUnavailable(_) => {
            StatusCode::BAD_GATEWAY
        }
        Error::AuthInvalidated(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        warn!(status = status.as_u16(), error = %err, "Request failed");
    }

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

/// Build the full router with every gateway route and layer.
///
/// Layers applied:
/// - principal extraction on the chat routes
/// - CORS restricted to the configured origins
/// - request body size limit
/// - HTTP trace logging
pub fn build_router(state: SharedState, config: &GatewayConfig) -> Router {
    let chat = chat::chat_router().layer(middleware::from_fn(require_principal));

    Router::new()
        .route("/health", get(health_handler))
        .route("/services", get(services_handler))
        .merge(contexts::contexts_router())
        .merge(chat)
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(cors_layer(&config.allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static(USER_HEADER),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
///
/// Probes every configured service, starts the context sweep, and serves
/// until the listener fails.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let orchestrator = Arc::new(Orchestrator::from_config(&config).await?);
    let report = orchestrator.init_report();
    if !report.inactive.is_empty() {
        warn!(inactive = ?report.inactive, "Some optional services are unavailable");
    }
    let _sweeper = orchestrator.spawn_sweeper();

    let state = Arc::new(GatewayState {
        orchestrator,
        sessions: Arc::new(InMemorySessionStore::new()),
    });
    let app = build_router(state, &config.gateway);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Require a non-empty `x-user-id` header and expose it as a [`Principal`].
async fn require_principal(
    mut req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, ApiError> {
    let user_id = req
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    match user_id {
        Some(user_id) => {
            req.extensions_mut().insert(Principal(user_id));
            Ok(next.run(req).await)
        }
        None => {
            warn!(path = %req.uri().path(), "Rejected chat request without a principal");
            Err(error_response(Error::AuthInvalidated(
                "User not authenticated".into(),
            )))
        }
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn services_handler(State(state): State<SharedState>) -> Json<Vec<ServiceDescriptor>> {
    Json(state.orchestrator.registry.list().await)
}
