//! HTTP API v1 — the conversation endpoints.
//!
//! Endpoints (all bearer-authenticated):
//!
//! - `POST /v1/conversations`                — Open a conversation from a prompt
//! - `GET  /v1/conversations`                — List (pagination, search, projection)
//! - `GET  /v1/conversations/{id}`           — Detail with turns
//! - `POST /v1/conversations/{id}/messages`  — Single-shot continuation
//! - `POST /v1/conversations/{id}/stream`    — SSE streamed continuation

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use parlor_core::error::{Error, ProviderError};
use parlor_core::provider::Usage;
use parlor_core::turn::{Conversation, Turn, TurnRole};

use crate::projection::FieldMask;
use crate::{AuthedUser, SharedState};

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/conversations", get(list_conversations_handler))
        .route("/conversations", post(open_conversation_handler))
        .route("/conversations/{id}", get(get_conversation_handler))
        .route("/conversations/{id}/messages", post(continue_conversation_handler))
        .route("/conversations/{id}/stream", post(stream_conversation_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct PromptRequest {
    prompt: String,
}

#[derive(Serialize, Deserialize)]
struct TurnDto {
    id: i64,
    conversation_id: i64,
    body: String,
    role: TurnRole,
    token_cost: i64,
    created_at: String,
}

#[derive(Serialize, Deserialize)]
struct ConversationSummaryDto {
    id: i64,
    topic: String,
    created_at: String,
}

#[derive(Serialize, Deserialize)]
struct ConversationDetailDto {
    id: i64,
    topic: String,
    created_at: String,
    turns: Vec<TurnDto>,
}

/// Response of both creation endpoints: the conversation summary plus the
/// freshly persisted prompt and reply turns.
#[derive(Serialize)]
struct ExchangeResponse {
    conversation: ConversationSummaryDto,
    prompt: TurnDto,
    reply: TurnDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    fields: Option<String>,
    #[serde(default)]
    exclude: Option<String>,
}

fn default_page() -> u32 {
    1
}
fn default_page_size() -> u32 {
    10
}

/// Maximum rows a single page may request.
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Serialize)]
struct ListResponse {
    count: u64,
    total_pages: u32,
    current_page: u32,
    page_size: u32,
    next_page: Option<u32>,
    previous_page: Option<u32>,
    results: Vec<serde_json::Value>,
}

#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldErrorDto>,
}

#[derive(Serialize)]
pub(crate) struct FieldErrorDto {
    pub field: String,
    pub message: String,
}

impl ErrorResponse {
    pub(crate) fn message(error: impl Into<String>) -> Self {
        Self { error: error.into(), fields: Vec::new() }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

// ── DTO construction ──────────────────────────────────────────────────────

fn turn_dto(turn: &Turn) -> TurnDto {
    TurnDto {
        id: turn.id,
        conversation_id: turn.conversation_id,
        body: turn.body.clone(),
        role: turn.role,
        token_cost: turn.token_cost,
        created_at: turn.created_at.to_rfc3339(),
    }
}

fn summary_dto(conversation: &Conversation) -> ConversationSummaryDto {
    ConversationSummaryDto {
        id: conversation.id,
        topic: conversation.topic.clone(),
        created_at: conversation.created_at.to_rfc3339(),
    }
}

fn detail_dto(conversation: &Conversation, turns: &[Turn]) -> ConversationDetailDto {
    ConversationDetailDto {
        id: conversation.id,
        topic: conversation.topic.clone(),
        created_at: conversation.created_at.to_rfc3339(),
        turns: turns.iter().map(turn_dto).collect(),
    }
}

// ── Error mapping ─────────────────────────────────────────────────────────

/// Map a domain error to an HTTP outcome.
///
/// Upstream rejections become client errors carrying the upstream detail;
/// timeouts and outages become gateway errors. Missing and foreign
/// conversations are indistinguishable, so ids do not leak across users.
fn map_error(err: Error) -> ApiError {
    let status = match &err {
        Error::Window(_) => StatusCode::BAD_REQUEST,
        Error::Provider(ProviderError::Rejected { .. }) => StatusCode::BAD_REQUEST,
        Error::Provider(ProviderError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
        Error::Provider(ProviderError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        Error::Provider(_) => StatusCode::BAD_GATEWAY,
        Error::ConversationNotFound(_) | Error::ForeignConversation(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = match status {
        StatusCode::NOT_FOUND => ErrorResponse::message("Conversation not found"),
        StatusCode::INTERNAL_SERVER_ERROR => {
            tracing::error!(error = %err, "Request failed");
            ErrorResponse::message("Internal server error")
        }
        _ => ErrorResponse::message(err.to_string()),
    };

    (status, Json(body))
}

fn validate_prompt(prompt: &str) -> Result<(), ApiError> {
    if prompt.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Validation failed".into(),
                fields: vec![FieldErrorDto {
                    field: "prompt".into(),
                    message: "must not be blank".into(),
                }],
            }),
        ));
    }
    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn open_conversation_handler(
    State(state): State<SharedState>,
    AuthedUser(user_id): AuthedUser,
    Json(payload): Json<PromptRequest>,
) -> Result<(StatusCode, Json<ExchangeResponse>), ApiError> {
    validate_prompt(&payload.prompt)?;
    info!(user_id = %user_id, "v1 open conversation");

    let outcome = state
        .service
        .open_conversation(&user_id, &payload.prompt)
        .await
        .map_err(map_error)?;

    Ok((
        StatusCode::CREATED,
        Json(ExchangeResponse {
            conversation: summary_dto(&outcome.conversation),
            prompt: turn_dto(&outcome.prompt),
            reply: turn_dto(&outcome.reply),
            usage: outcome.usage,
        }),
    ))
}

async fn continue_conversation_handler(
    State(state): State<SharedState>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<i64>,
    Json(payload): Json<PromptRequest>,
) -> Result<(StatusCode, Json<ExchangeResponse>), ApiError> {
    validate_prompt(&payload.prompt)?;
    info!(user_id = %user_id, conversation_id = id, "v1 continue conversation");

    let outcome = state
        .service
        .continue_conversation(&user_id, id, &payload.prompt)
        .await
        .map_err(map_error)?;

    Ok((
        StatusCode::CREATED,
        Json(ExchangeResponse {
            conversation: summary_dto(&outcome.conversation),
            prompt: turn_dto(&outcome.prompt),
            reply: turn_dto(&outcome.reply),
            usage: outcome.usage,
        }),
    ))
}

/// `POST /v1/conversations/{id}/stream` — streamed continuation over SSE.
///
/// Each event frame is named after the stream event and carries its JSON
/// encoding. `X-Accel-Buffering: no` keeps intermediaries from buffering
/// the response. The connection closes when the event sequence ends.
async fn stream_conversation_handler(
    State(state): State<SharedState>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<i64>,
    Json(payload): Json<PromptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_prompt(&payload.prompt)?;
    info!(user_id = %user_id, conversation_id = id, "v1 stream conversation");

    let rx = state
        .service
        .continue_conversation_stream(&user_id, id, &payload.prompt)
        .await
        .map_err(map_error)?;

    let stream = ReceiverStream::new(rx).map(|event| {
        let name = event.event_type();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(SseEvent::default().event(name).data(data))
    });

    Ok(([("x-accel-buffering", "no")], Sse::new(stream)))
}

async fn get_conversation_handler(
    State(state): State<SharedState>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<i64>,
) -> Result<Json<ConversationDetailDto>, ApiError> {
    let found = state
        .store
        .get_conversation_with_turns(id)
        .await
        .map_err(|e| map_error(e.into()))?;

    match found {
        Some((conversation, turns)) if conversation.user_id == user_id => {
            Ok(Json(detail_dto(&conversation, &turns)))
        }
        // Foreign conversations look exactly like absent ones
        _ => Err(map_error(Error::ConversationNotFound(id))),
    }
}

async fn list_conversations_handler(
    State(state): State<SharedState>,
    AuthedUser(user_id): AuthedUser,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, ApiError> {
    let page_size = params.page_size.clamp(1, MAX_PAGE_SIZE);
    let page = params.page.max(1);
    let mask = FieldMask::from_params(params.fields.as_deref(), params.exclude.as_deref());

    let listing = state
        .store
        .list_conversations(&user_id, params.q.as_deref(), page, page_size)
        .await
        .map_err(|e| map_error(e.into()))?;

    let results = listing
        .items
        .iter()
        .map(|(conversation, turns)| {
            let mut value = serde_json::to_value(detail_dto(conversation, turns))
                .unwrap_or(serde_json::Value::Null);
            mask.apply(&mut value);
            value
        })
        .collect();

    let total_pages = listing.total_pages();
    Ok(Json(ListResponse {
        count: listing.count,
        total_pages,
        current_page: listing.page,
        page_size: listing.page_size,
        next_page: listing.has_next().then_some(listing.page + 1),
        previous_page: listing.has_previous().then_some(listing.page - 1),
        results,
    }))
}
