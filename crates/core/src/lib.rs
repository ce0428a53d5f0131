//! # Parlor Core
//!
//! Domain types, traits, and error definitions for the Parlor chat-history
//! backend. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The two external collaborators — the turn store and the completion
//! service — are defined as traits here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod provider;
pub mod store;
pub mod turn;
pub mod window;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError, WindowError};
pub use provider::{Completion, CompletionChunk, CompletionProvider, CompletionRequest, Usage};
pub use store::{Page, TurnDraft, TurnStore};
pub use turn::{Conversation, Turn, TurnRole};
pub use window::{ContextWindow, WindowTurn, WireRole};
