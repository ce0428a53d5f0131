//! End-to-end integration tests for the Parlor chat backend.
//!
//! These tests exercise the full pipeline from HTTP request to persisted
//! turns: gateway router → orchestrator → window builder → SQLite store,
//! with a scripted completion provider standing in for the upstream.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio::sync::RwLock;
use tower::ServiceExt;

use parlor_chat::{ChatService, token};
use parlor_core::error::ProviderError;
use parlor_core::provider::{Completion, CompletionProvider, CompletionRequest, Usage};
use parlor_core::window::WireRole;
use parlor_core::TurnStore;
use parlor_gateway::{GatewayState, Session, build_router};
use parlor_providers::StubProvider;
use parlor_store::SqliteTurnStore;

// ── Recording Provider ───────────────────────────────────────────────────

/// A scripted provider that records every request it receives, so tests
/// can assert on the exact window submitted upstream.
struct RecordingProvider {
    replies: std::sync::Mutex<Vec<String>>,
    requests: std::sync::Mutex<Vec<CompletionRequest>>,
}

impl RecordingProvider {
    fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into_iter().rev().map(String::from).collect()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CompletionProvider for RecordingProvider {
    fn name(&self) -> &str {
        "e2e_recording"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| panic!("RecordingProvider exhausted"));
        Ok(Completion {
            text,
            usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
            model: request.model,
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

async fn service_with(
    provider: Arc<dyn CompletionProvider>,
    configure: impl FnOnce(&mut parlor_config::AppConfig),
) -> (ChatService, Arc<SqliteTurnStore>) {
    let store = Arc::new(SqliteTurnStore::new("sqlite::memory:").await.unwrap());
    let mut config = parlor_config::AppConfig::default();
    config.context.system_preamble = String::new();
    configure(&mut config);
    let service = ChatService::new(provider, store.clone(), &config);
    (service, store)
}

async fn gateway_app(stub: StubProvider, pairing_code: Option<&str>) -> axum::Router {
    let store = Arc::new(SqliteTurnStore::new("sqlite::memory:").await.unwrap());
    let mut config = parlor_config::AppConfig::default();
    config.context.system_preamble = String::new();
    let service = Arc::new(ChatService::new(Arc::new(stub), store.clone(), &config));

    build_router(Arc::new(GatewayState {
        service,
        store,
        pairing_code: pairing_code.map(String::from),
        sessions: RwLock::new(Vec::<Session>::new()),
    }))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn authed_post(uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed_get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

// ── E2E: Full conversation flow through the gateway ──────────────────────

#[tokio::test]
async fn e2e_pair_open_continue_list_detail() {
    let stub = StubProvider::new()
        .with_reply("Rust is a systems programming language.")
        .with_reply("Rust overview");
    let app = gateway_app(stub, Some("12345678")).await;

    // Pair with the code to obtain a bearer token.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/pair")
                .header("X-Pairing-Code", "12345678")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let token = body_json(response).await["token"].as_str().unwrap().to_string();

    // Open a conversation.
    let response = app
        .clone()
        .oneshot(authed_post(
            "/v1/conversations",
            &token,
            serde_json::json!({"prompt": "What is Rust?"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let opened = body_json(response).await;
    assert_eq!(opened["conversation"]["topic"], "Rust overview");
    assert_eq!(opened["reply"]["body"], "Rust is a systems programming language.");
    let id = opened["conversation"]["id"].as_i64().unwrap();

    // Continue it; the unscripted stub echoes the prompt.
    let response = app
        .clone()
        .oneshot(authed_post(
            &format!("/v1/conversations/{id}/messages"),
            &token,
            serde_json::json!({"prompt": "Tell me more"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let continued = body_json(response).await;
    assert_eq!(continued["reply"]["body"], "You said: Tell me more");

    // Detail shows all four turns in chronological order.
    let response =
        app.clone().oneshot(authed_get(&format!("/v1/conversations/{id}"), &token)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let detail = body_json(response).await;
    let turns = detail["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0]["body"], "What is Rust?");
    assert_eq!(turns[0]["role"], "human");
    assert_eq!(turns[3]["role"], "model");

    // Keyword search finds the conversation through a turn body.
    let response =
        app.clone().oneshot(authed_get("/v1/conversations?q=systems", &token)).await.unwrap();
    let listing = body_json(response).await;
    assert_eq!(listing["count"], 1);

    // Projection trims the listing records.
    let response =
        app.oneshot(authed_get("/v1/conversations?fields=id,topic", &token)).await.unwrap();
    let listing = body_json(response).await;
    let record = listing["results"][0].as_object().unwrap();
    assert_eq!(record.len(), 2);
}

// ── E2E: Window construction under budget pressure ───────────────────────

#[tokio::test]
async fn e2e_window_admits_newest_history_first() {
    // Budget of 25 tokens: the prompt (9) plus one 11-token history turn
    // fit; the older turn does not.
    let provider = Arc::new(RecordingProvider::new(vec![
        "Hello Django", // opening reply
        "Topic",        // topic label
        "final answer", // continuation reply
    ]));
    let (service, _store) = service_with(provider.clone(), |config| {
        config.context.window_tokens = 1049;
        config.context.reserved_output_tokens = 1024;
    })
    .await;

    let opened = service.open_conversation("u1", "Hello World").await.unwrap();
    service.continue_conversation("u1", opened.conversation.id, "Hi").await.unwrap();

    let requests = provider.requests();
    assert_eq!(requests.len(), 3);

    // The continuation window: newest history turn wins, oldest excluded.
    let window = &requests[2].turns;
    assert_eq!(window.len(), 2);
    assert_eq!(window[0].role, WireRole::Assistant);
    assert_eq!(window[0].text, "Hello Django");
    assert_eq!(window[1].role, WireRole::User);
    assert_eq!(window[1].text, "Hi");
}

#[tokio::test]
async fn e2e_history_candidates_capped_by_config() {
    let provider = Arc::new(RecordingProvider::new(vec!["r0", "Topic", "r1", "r2", "r3"]));
    let (service, _store) = service_with(provider.clone(), |config| {
        config.context.max_history_turns = 4;
    })
    .await;

    let opened = service.open_conversation("u1", "q0").await.unwrap();
    for prompt in ["q1", "q2", "q3"] {
        service.continue_conversation("u1", opened.conversation.id, prompt).await.unwrap();
    }

    // 8 turns are persisted by now; the last window still carries at most
    // 4 history entries plus the new prompt.
    let requests = provider.requests();
    let window = &requests.last().unwrap().turns;
    assert_eq!(window.len(), 5);
    // The four candidates are the most recent persisted turns, restored to
    // chronological order, with the new prompt last.
    assert_eq!(window[0].text, "q1");
    assert_eq!(window[1].text, "r1");
    assert_eq!(window[2].text, "q2");
    assert_eq!(window[3].text, "r2");
    assert_eq!(window[4].text, "q3");
}

// ── E2E: Topic derivation is a secondary completion ──────────────────────

#[tokio::test]
async fn e2e_topic_derived_from_prompt_and_reply() {
    let provider = Arc::new(RecordingProvider::new(vec!["The reply", "A label"]));
    let (service, _store) = service_with(provider.clone(), |_| {}).await;

    let outcome = service.open_conversation("u1", "The prompt").await.unwrap();
    assert_eq!(outcome.conversation.topic, "A label");

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);

    // The secondary call carries its own instruction plus the exchange.
    let topic_request = &requests[1];
    assert_eq!(topic_request.turns[0].role, WireRole::System);
    assert!(topic_request.turns[0].text.contains("topic label"));
    assert!(topic_request.turns[1].text.contains("The prompt"));
    assert!(topic_request.turns[1].text.contains("The reply"));
    assert_eq!(topic_request.max_tokens, Some(64));
}

// ── E2E: Token attribution round-trip ────────────────────────────────────

#[tokio::test]
async fn e2e_every_persisted_cost_matches_the_tokenizer() {
    let stub = StubProvider::new().with_reply("An answer of some length").with_reply("Topic");
    let store = Arc::new(SqliteTurnStore::new("sqlite::memory:").await.unwrap());
    let mut config = parlor_config::AppConfig::default();
    config.context.system_preamble = String::new();
    let service = ChatService::new(Arc::new(stub), store.clone(), &config);

    let opened = service.open_conversation("u1", "A question").await.unwrap();
    service.continue_conversation("u1", opened.conversation.id, "Another one").await.unwrap();

    let (_, turns) =
        store.get_conversation_with_turns(opened.conversation.id).await.unwrap().unwrap();
    assert_eq!(turns.len(), 4);
    for turn in turns {
        assert_eq!(turn.token_cost, token::token_count(&turn.body) as i64);
    }
}
