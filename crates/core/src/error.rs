//! Error types for the Parlor domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Parlor operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Completion service errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Turn store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Window assembly errors ---
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    // --- Request-level outcomes ---
    #[error("Conversation {0} not found")]
    ConversationNotFound(i64),

    #[error("Conversation {0} belongs to another user")]
    ForeignConversation(i64),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures talking to the completion service.
///
/// `Rejected` is the upstream refusing the request itself (malformed or
/// over-length input) — a client-visible outcome, not a server fault.
/// Everything else is fatal to this request and surfaced as a server error;
/// nothing here is retried automatically.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Completion service rejected the request: {detail}")]
    Rejected { detail: String },

    #[error("Rate limited by completion service, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication with completion service failed: {0}")]
    Authentication(String),

    #[error("Completion service timed out: {0}")]
    Timeout(String),

    #[error("Completion service unavailable: {0}")]
    Unavailable(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Malformed completion response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Failures assembling a context window.
#[derive(Debug, Clone, Error)]
pub enum WindowError {
    /// The new prompt (plus the configured system instruction) alone
    /// exceeds the window budget. History is never the cause — history
    /// turns that do not fit are simply excluded.
    #[error("Prompt reservation of {reserved} tokens exceeds window budget of {budget} tokens")]
    BudgetExceeded { reserved: usize, budget: usize },
}
