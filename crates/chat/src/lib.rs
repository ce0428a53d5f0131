//! # Parlor Chat
//!
//! The conversation-context and completion-orchestration subsystem:
//!
//! - **context::token** — model token estimation with per-turn overhead
//! - **context::window** — the bounded history window builder
//! - **orchestrator** — drives completion calls and decides what gets
//!   persisted, in what order relative to the call
//! - **stream_event** — events relayed to the caller during streaming

pub mod context;
pub mod orchestrator;
pub mod stream_event;

pub use context::token;
pub use context::window::{HistoryWindowBuilder, WindowConfig};
pub use orchestrator::{ChatService, ExchangeOutcome};
pub use stream_event::StreamEvent;
