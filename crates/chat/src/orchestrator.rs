//! The completion orchestrator.
//!
//! Drives the completion service and decides what gets persisted, in what
//! order relative to the call:
//!
//! - Opening a conversation: complete → derive topic → one transaction
//!   writing conversation + prompt turn + reply turn. A reader can never
//!   observe the conversation without its opening prompt.
//! - Continuing single-shot: complete first, persist the exchange only on
//!   success. A failed call leaves no orphaned prompt turn.
//! - Continuing streamed: the prompt turn is persisted before the stream
//!   is consumed (the reply is not known atomically), fragments are
//!   relayed as they arrive, and the reply turn is written when the
//!   stream terminates.

use std::sync::Arc;

use parlor_core::error::Error;
use parlor_core::provider::{CompletionProvider, CompletionRequest, Usage};
use parlor_core::store::{TurnDraft, TurnStore};
use parlor_core::turn::{Conversation, Turn};
use parlor_core::window::{ContextWindow, WindowTurn};
use tracing::{debug, info, warn};

use crate::context::token;
use crate::context::window::{HistoryWindowBuilder, WindowConfig};
use crate::stream_event::StreamEvent;

/// Instruction for the secondary topic-label completion.
const TOPIC_INSTRUCTION: &str =
    "Reply with a short topic label, at most 20 characters, for the following exchange. \
     Reply with the label only.";

/// Longest topic label the store accepts.
const MAX_TOPIC_CHARS: usize = 255;

/// The result of one prompt/reply exchange.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub conversation: Conversation,
    pub prompt: Turn,
    pub reply: Turn,
    pub usage: Option<Usage>,
}

/// Orchestrates completion calls against the turn store.
pub struct ChatService {
    provider: Arc<dyn CompletionProvider>,
    store: Arc<dyn TurnStore>,
    window: HistoryWindowBuilder,
    model: String,
    temperature: f32,
    max_completion_tokens: u32,
    max_topic_tokens: u32,
}

impl ChatService {
    /// Build the service from the application config.
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn TurnStore>,
        config: &parlor_config::AppConfig,
    ) -> Self {
        Self {
            provider,
            store,
            window: HistoryWindowBuilder::new(WindowConfig::from_config(&config.context)),
            model: config.model.clone(),
            temperature: config.temperature,
            max_completion_tokens: config.max_completion_tokens,
            max_topic_tokens: config.max_topic_tokens,
        }
    }

    fn completion_request(&self, window: ContextWindow) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            turns: window.turns,
            temperature: self.temperature,
            max_tokens: Some(self.max_completion_tokens),
        }
    }

    /// Derive a short topic label from the opening exchange.
    async fn derive_topic(&self, prompt: &str, reply: &str) -> Result<String, Error> {
        let request = CompletionRequest {
            model: self.model.clone(),
            turns: vec![
                WindowTurn::system(TOPIC_INSTRUCTION),
                WindowTurn::user(format!("{prompt}\n\n{reply}")),
            ],
            temperature: self.temperature,
            max_tokens: Some(self.max_topic_tokens),
        };
        let completion = self.provider.complete(request).await?;
        let topic: String = completion.text.trim().chars().take(MAX_TOPIC_CHARS).collect();
        Ok(topic)
    }

    /// Verify the conversation exists and belongs to the caller.
    async fn authorize(&self, user_id: &str, conversation_id: i64) -> Result<Conversation, Error> {
        match self.store.get_conversation(conversation_id).await? {
            None => Err(Error::ConversationNotFound(conversation_id)),
            Some(c) if c.user_id != user_id => {
                warn!(conversation_id, "Conversation requested by non-owner");
                Err(Error::ForeignConversation(conversation_id))
            }
            Some(c) => Ok(c),
        }
    }

    /// Start a new conversation from an opening prompt.
    ///
    /// The completion and topic calls both succeed before anything is
    /// written; the conversation, prompt turn, and reply turn then land in
    /// one transaction.
    pub async fn open_conversation(
        &self,
        user_id: &str,
        prompt: &str,
    ) -> Result<ExchangeOutcome, Error> {
        let window = self.window.assemble(&[], prompt)?;
        debug!(total_tokens = window.total_tokens, "Opening window assembled");

        let completion = self.provider.complete(self.completion_request(window)).await?;
        let topic = self.derive_topic(prompt, &completion.text).await?;

        let prompt_draft = TurnDraft::human(user_id, prompt, token::token_count(prompt) as i64);
        let reply_draft =
            TurnDraft::model(user_id, &completion.text, token::token_count(&completion.text) as i64);

        let (conversation, prompt_turn, reply_turn) = self
            .store
            .create_conversation(user_id, &topic, prompt_draft, reply_draft)
            .await?;

        info!(
            conversation_id = conversation.id,
            topic = %conversation.topic,
            "Conversation opened"
        );

        Ok(ExchangeOutcome {
            conversation,
            prompt: prompt_turn,
            reply: reply_turn,
            usage: completion.usage,
        })
    }

    /// Continue an existing conversation, single-shot.
    pub async fn continue_conversation(
        &self,
        user_id: &str,
        conversation_id: i64,
        prompt: &str,
    ) -> Result<ExchangeOutcome, Error> {
        let conversation = self.authorize(user_id, conversation_id).await?;

        let window = self.window.build(self.store.as_ref(), conversation_id, prompt).await?;
        debug!(
            conversation_id,
            total_tokens = window.total_tokens,
            entries = window.len(),
            "Continuation window assembled"
        );

        // The exchange is persisted only after the call succeeds: a failed
        // completion must not leave an orphaned prompt turn.
        let completion = self.provider.complete(self.completion_request(window)).await?;

        let prompt_draft = TurnDraft::human(user_id, prompt, token::token_count(prompt) as i64);
        let reply_draft =
            TurnDraft::model(user_id, &completion.text, token::token_count(&completion.text) as i64);

        let (prompt_turn, reply_turn) =
            self.store.append_exchange(conversation_id, prompt_draft, reply_draft).await?;

        Ok(ExchangeOutcome {
            conversation,
            prompt: prompt_turn,
            reply: reply_turn,
            usage: completion.usage,
        })
    }

    /// Continue an existing conversation with a streamed reply.
    ///
    /// Returns a finite, non-restartable event sequence. The prompt turn
    /// is persisted up front; the reply turn is persisted once the
    /// fragment stream terminates. If the caller goes away, the relay
    /// stops consuming the upstream promptly.
    pub async fn continue_conversation_stream(
        &self,
        user_id: &str,
        conversation_id: i64,
        prompt: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamEvent>, Error> {
        self.authorize(user_id, conversation_id).await?;

        let window = self.window.build(self.store.as_ref(), conversation_id, prompt).await?;
        debug!(
            conversation_id,
            total_tokens = window.total_tokens,
            "Streaming window assembled"
        );

        let prompt_draft = TurnDraft::human(user_id, prompt, token::token_count(prompt) as i64);
        self.store.append_turn(conversation_id, prompt_draft).await?;

        let mut upstream = self.provider.stream(self.completion_request(window)).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let store = self.store.clone();
        let user_id = user_id.to_string();

        tokio::spawn(async move {
            let mut text = String::new();
            let mut usage: Option<Usage> = None;

            while let Some(item) = upstream.recv().await {
                match item {
                    Ok(chunk) => {
                        if let Some(delta) = chunk.delta {
                            text.push_str(&delta);
                            if tx.send(StreamEvent::Delta { content: delta }).await.is_err() {
                                // Caller disconnected: stop consuming and
                                // release the upstream by dropping it.
                                debug!(conversation_id, "Stream caller went away");
                                return;
                            }
                        }
                        if chunk.done {
                            usage = chunk.usage;
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(conversation_id, error = %e, "Upstream stream failed");
                        let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                        return;
                    }
                }
            }

            let reply_draft =
                TurnDraft::model(&user_id, &text, token::token_count(&text) as i64);
            match store.append_turn(conversation_id, reply_draft).await {
                Ok(reply) => {
                    let _ = tx.send(StreamEvent::Done { conversation_id, reply, usage }).await;
                }
                Err(e) => {
                    warn!(conversation_id, error = %e, "Failed to persist streamed reply");
                    let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parlor_core::error::ProviderError;
    use parlor_core::provider::{Completion, CompletionChunk};
    use parlor_providers::StubProvider;
    use parlor_store::SqliteTurnStore;

    async fn service_with(stub: StubProvider) -> (ChatService, Arc<SqliteTurnStore>) {
        let store = Arc::new(SqliteTurnStore::new("sqlite::memory:").await.unwrap());
        let mut config = parlor_config::AppConfig::default();
        // Keep tests free of the preamble unless they opt in
        config.context.system_preamble = String::new();
        let service = ChatService::new(Arc::new(stub), store.clone(), &config);
        (service, store)
    }

    #[tokio::test]
    async fn opening_creates_topic_and_both_turns_atomically() {
        let stub = StubProvider::new().with_reply("Mocked AI response").with_reply("Mocked Topic");
        let (service, store) = service_with(stub).await;

        let outcome = service.open_conversation("u1", "Test prompt").await.unwrap();

        assert_eq!(outcome.conversation.topic, "Mocked Topic");
        assert_eq!(outcome.prompt.body, "Test prompt");
        assert_eq!(outcome.reply.body, "Mocked AI response");

        // The conversation row exists with its first turn already attached
        let (_, turns) =
            store.get_conversation_with_turns(outcome.conversation.id).await.unwrap().unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].body, "Test prompt");
        assert_eq!(turns[1].body, "Mocked AI response");
    }

    #[tokio::test]
    async fn persisted_costs_match_the_tokenizer() {
        let stub = StubProvider::new().with_reply("Mocked AI response").with_reply("Mocked Topic");
        let (service, _store) = service_with(stub).await;

        let outcome = service.open_conversation("u1", "Test prompt").await.unwrap();
        assert_eq!(outcome.prompt.token_cost, token::token_count("Test prompt") as i64);
        assert_eq!(outcome.reply.token_cost, token::token_count("Mocked AI response") as i64);
    }

    #[tokio::test]
    async fn failed_opening_writes_nothing() {
        let stub = StubProvider::new()
            .with_failure(ProviderError::Rejected { detail: "over-length".into() });
        let (service, store) = service_with(stub).await;

        let err = service.open_conversation("u1", "Test prompt").await.unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::Rejected { .. })));

        let page = store.list_conversations("u1", None, 1, 10).await.unwrap();
        assert_eq!(page.count, 0);
    }

    #[tokio::test]
    async fn continuation_appends_an_exchange() {
        let stub = StubProvider::new().with_reply("Opening reply").with_reply("Topic");
        let (service, store) = service_with(stub).await;
        let opened = service.open_conversation("u1", "Opening prompt").await.unwrap();

        let outcome = service
            .continue_conversation("u1", opened.conversation.id, "Hi")
            .await
            .unwrap();
        // Unscripted stub echoes the last user entry of the window
        assert_eq!(outcome.reply.body, "You said: Hi");

        let (_, turns) =
            store.get_conversation_with_turns(opened.conversation.id).await.unwrap().unwrap();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[2].body, "Hi");
        assert_eq!(turns[3].body, "You said: Hi");
    }

    #[tokio::test]
    async fn failed_continuation_leaves_no_orphaned_prompt() {
        let stub = StubProvider::new()
            .with_reply("Opening reply")
            .with_reply("Topic")
            .with_failure(ProviderError::Timeout("deadline".into()));
        let (service, store) = service_with(stub).await;
        let opened = service.open_conversation("u1", "Opening prompt").await.unwrap();

        let err = service
            .continue_conversation("u1", opened.conversation.id, "Hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::Timeout(_))));

        let (_, turns) =
            store.get_conversation_with_turns(opened.conversation.id).await.unwrap().unwrap();
        assert_eq!(turns.len(), 2, "failed completion must not persist the prompt");
    }

    #[tokio::test]
    async fn missing_and_foreign_conversations_are_rejected() {
        let stub = StubProvider::new().with_reply("r").with_reply("t");
        let (service, _store) = service_with(stub).await;
        let opened = service.open_conversation("u1", "mine").await.unwrap();

        let err = service.continue_conversation("u1", 999, "Hi").await.unwrap_err();
        assert!(matches!(err, Error::ConversationNotFound(999)));

        let err = service
            .continue_conversation("intruder", opened.conversation.id, "Hi")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ForeignConversation(_)));
    }

    #[tokio::test]
    async fn streaming_relays_fragments_then_persists_reply() {
        let stub = StubProvider::new()
            .with_reply("Opening reply")
            .with_reply("Topic")
            .with_reply("streamed reply text");
        let (service, store) = service_with(stub).await;
        let opened = service.open_conversation("u1", "Opening prompt").await.unwrap();

        let mut rx = service
            .continue_conversation_stream("u1", opened.conversation.id, "stream this")
            .await
            .unwrap();

        let mut text = String::new();
        let mut done_reply: Option<Turn> = None;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Delta { content } => text.push_str(&content),
                StreamEvent::Done { reply, .. } => done_reply = Some(reply),
                StreamEvent::Error { message } => panic!("unexpected error: {message}"),
            }
        }

        assert_eq!(text, "streamed reply text");
        let reply = done_reply.expect("terminal event");
        assert_eq!(reply.body, "streamed reply text");
        assert_eq!(reply.token_cost, token::token_count("streamed reply text") as i64);

        let (_, turns) =
            store.get_conversation_with_turns(opened.conversation.id).await.unwrap().unwrap();
        assert_eq!(turns.len(), 4);
        // The prompt turn was persisted before the reply
        assert!(turns[2].id < turns[3].id);
        assert_eq!(turns[2].body, "stream this");
    }

    // A provider that emits a fixed fragment script, for relay-order tests.
    struct FragmentScript {
        fragments: Vec<&'static str>,
    }

    #[async_trait]
    impl CompletionProvider for FragmentScript {
        fn name(&self) -> &str {
            "fragment-script"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<Completion, ProviderError> {
            Ok(Completion {
                text: self.fragments.concat(),
                usage: None,
                model: "test".into(),
            })
        }

        async fn stream(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<
            tokio::sync::mpsc::Receiver<std::result::Result<CompletionChunk, ProviderError>>,
            ProviderError,
        > {
            let (tx, rx) = tokio::sync::mpsc::channel(8);
            let fragments = self.fragments.clone();
            tokio::spawn(async move {
                for fragment in fragments {
                    let _ = tx
                        .send(Ok(CompletionChunk {
                            delta: Some(fragment.to_string()),
                            done: false,
                            usage: None,
                        }))
                        .await;
                }
                let _ = tx.send(Ok(CompletionChunk { delta: None, done: true, usage: None })).await;
            });
            Ok(rx)
        }
    }

    async fn scripted_stream_events(fragments: Vec<&'static str>) -> Vec<StreamEvent> {
        let store = Arc::new(SqliteTurnStore::new("sqlite::memory:").await.unwrap());
        let (conversation, _, _) = store
            .create_conversation(
                "u1",
                "Topic",
                TurnDraft::human("u1", "p", 9),
                TurnDraft::model("u1", "r", 9),
            )
            .await
            .unwrap();

        let mut config = parlor_config::AppConfig::default();
        config.context.system_preamble = String::new();
        let service =
            ChatService::new(Arc::new(FragmentScript { fragments }), store, &config);

        let mut rx = service
            .continue_conversation_stream("u1", conversation.id, "go")
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn two_fragments_arrive_in_order_then_terminate() {
        let events = scripted_stream_events(vec!["He", "llo"]).await;
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], StreamEvent::Delta { content } if content == "He"));
        assert!(matches!(&events[1], StreamEvent::Delta { content } if content == "llo"));
        match &events[2] {
            StreamEvent::Done { reply, .. } => assert_eq!(reply.body, "Hello"),
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_fragment_source_emits_no_deltas() {
        let events = scripted_stream_events(vec![]).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Done { .. }));
    }
}
