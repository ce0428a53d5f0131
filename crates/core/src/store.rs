//! TurnStore trait — the persistence boundary.
//!
//! The store owns the persisted `Conversation` and `Turn` records. The core
//! only requires ordered-by-recency retrieval and (transactional)
//! insertion; everything else — pagination, keyword search — serves the
//! list endpoints.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::turn::{Conversation, Turn, TurnRole};

/// A turn about to be written. The store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct TurnDraft {
    pub user_id: String,
    pub body: String,
    pub role: TurnRole,
    pub token_cost: i64,
}

impl TurnDraft {
    pub fn human(user_id: impl Into<String>, body: impl Into<String>, token_cost: i64) -> Self {
        Self { user_id: user_id.into(), body: body.into(), role: TurnRole::Human, token_cost }
    }

    pub fn model(user_id: impl Into<String>, body: impl Into<String>, token_cost: i64) -> Self {
        Self { user_id: user_id.into(), body: body.into(), role: TurnRole::Model, token_cost }
    }
}

/// One page of a conversation listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// The rows on this page.
    pub items: Vec<T>,

    /// Total matching rows across all pages.
    pub count: u64,

    /// 1-based page number.
    pub page: u32,

    /// Requested page size.
    pub page_size: u32,
}

impl<T> Page<T> {
    /// Total number of pages (at least 1, even when empty).
    pub fn total_pages(&self) -> u32 {
        let size = u64::from(self.page_size.max(1));
        (self.count.div_ceil(size)).max(1) as u32
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }
}

/// The persistence boundary for conversations and their turns.
///
/// Turns are append-only: there is no update or delete surface. Within a
/// conversation, `created_at DESC, id DESC` is the canonical recency order;
/// the id tiebreak makes equal-timestamp rows deterministic at read time.
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Create a conversation together with its opening prompt and reply,
    /// in one transaction, inserted in that order. A reader can never
    /// observe the conversation without its opening prompt turn.
    async fn create_conversation(
        &self,
        user_id: &str,
        topic: &str,
        prompt: TurnDraft,
        reply: TurnDraft,
    ) -> Result<(Conversation, Turn, Turn), StoreError>;

    /// Append a prompt/reply pair to an existing conversation in one
    /// transaction.
    async fn append_exchange(
        &self,
        conversation_id: i64,
        prompt: TurnDraft,
        reply: TurnDraft,
    ) -> Result<(Turn, Turn), StoreError>;

    /// Append a single turn. Used by the streaming path, where prompt and
    /// reply are not known atomically.
    async fn append_turn(&self, conversation_id: i64, draft: TurnDraft)
    -> Result<Turn, StoreError>;

    /// The most recent turns of a conversation, newest-first, truncated to
    /// `limit`.
    async fn list_recent(&self, conversation_id: i64, limit: u32)
    -> Result<Vec<Turn>, StoreError>;

    /// Look up a conversation row.
    async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, StoreError>;

    /// A conversation together with all its turns, oldest-first.
    async fn get_conversation_with_turns(
        &self,
        id: i64,
    ) -> Result<Option<(Conversation, Vec<Turn>)>, StoreError>;

    /// One page of a user's conversations, newest-first, each with its
    /// turns. `query` applies the keyword search: every word must appear
    /// in the topic, or every word must appear somewhere in the
    /// conversation's turns.
    async fn list_conversations(
        &self,
        user_id: &str,
        query: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<Page<(Conversation, Vec<Turn>)>, StoreError>;
}
