//! HTTP API gateway for Parlor.
//!
//! Exposes REST endpoints for health checks, pairing, and the v1
//! conversation API with single-shot and SSE-streamed completions.
//!
//! Built on Axum for high performance async HTTP.

pub mod api_v1;
pub mod projection;

use axum::extract::{DefaultBodyLimit, FromRequestParts};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    http::request::Parts,
    middleware::{self, Next},
    response::Json,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use parlor_chat::ChatService;
use parlor_core::store::TurnStore;

/// Maximum number of active bearer sessions.
const MAX_SESSIONS: usize = 100;

/// One paired client: a bearer token bound to a user identity.
pub struct Session {
    pub token: String,
    pub user_id: String,
}

/// Shared application state for the gateway.
pub struct GatewayState {
    pub service: Arc<ChatService>,
    pub store: Arc<dyn TurnStore>,
    pub pairing_code: Option<String>,
    pub sessions: RwLock<Vec<Session>>,
}

pub type SharedState = Arc<GatewayState>;

/// The authenticated caller, resolved by the auth middleware.
///
/// Every v1 operation requires it; absence is an authorization failure,
/// never a silent anonymous path.
#[derive(Debug, Clone)]
pub struct AuthedUser(pub String);

impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthedUser>().cloned().ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Build the full router: health + pairing + authenticated v1 API.
///
/// Security layers applied:
/// - Bearer token authentication on all /v1 routes
/// - CORS with restrictive origin policy
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let v1 = api_v1::v1_router(state.clone())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::exact(
            "http://localhost:8080".parse().unwrap(),
        ))
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .route("/pair", post(pair_handler))
        .with_state(state)
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: parlor_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let host = config.gateway.host.clone();
    let port = config.gateway.port;
    let addr = format!("{host}:{port}");

    let pairing_code = if config.gateway.require_pairing {
        let code = format!("{:08}", rand_code());
        info!(code = %code, "Pairing code generated — use POST /pair with X-Pairing-Code header");
        Some(code)
    } else {
        None
    };

    let store = Arc::new(parlor_store::SqliteTurnStore::new(&config.store.database_url).await?);
    let provider = parlor_providers::build_provider(&config);
    info!(provider = provider.name(), model = %config.model, "Completion provider ready");

    let service = Arc::new(ChatService::new(provider, store.clone(), &config));

    let state = Arc::new(GatewayState {
        service,
        store,
        pairing_code,
        sessions: RwLock::new(Vec::new()),
    });

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

#[derive(Serialize)]
struct PairResponse {
    token: String,
    user_id: String,
}

/// Exchange the pairing code for a bearer token bound to a fresh user
/// identity.
async fn pair_handler(
    State(state): State<SharedState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<PairResponse>, StatusCode> {
    if let Some(expected) = state.pairing_code.as_deref() {
        let provided = headers.get("X-Pairing-Code").and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    let token = uuid::Uuid::new_v4().to_string();
    let user_id = uuid::Uuid::new_v4().to_string();

    let mut sessions = state.sessions.write().await;
    // Evict the oldest session when at capacity
    if sessions.len() >= MAX_SESSIONS {
        sessions.remove(0);
    }
    sessions.push(Session { token: token.clone(), user_id: user_id.clone() });

    Ok(Json(PairResponse { token, user_id }))
}

/// Authentication middleware for the /v1 API.
///
/// Requires a valid `Authorization: Bearer <token>` header and resolves it
/// to the paired user identity.
async fn auth_middleware(
    State(state): State<SharedState>,
    mut req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = auth_header else {
        warn!("Unauthorized request to /v1 API — missing bearer token");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let sessions = state.sessions.read().await;
    let Some(session) = sessions.iter().find(|s| s.token == token) else {
        warn!("Unauthorized request to /v1 API — unknown bearer token");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let user = AuthedUser(session.user_id.clone());
    drop(sessions);

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Generate a cryptographically strong 8-digit pairing code.
fn rand_code() -> u32 {
    use rand::Rng;
    let mut rng = rand::rng();
    rng.random_range(10_000_000..100_000_000)
}
