//! Turn and Conversation domain types.
//!
//! These are the persisted value objects: a `Conversation` owns an
//! append-only, timestamp-ordered sequence of `Turn`s. Both are immutable
//! once written — a conversation only ever accumulates turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::window::WireRole;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// Written by the end user.
    Human,
    /// Generated by the completion model.
    Model,
}

impl TurnRole {
    /// Storage representation (`role` column).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Model => "model",
        }
    }

    /// Parse the storage representation back. Unknown values are an error
    /// at the store boundary, not silently coerced.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human" => Some(Self::Human),
            "model" => Some(Self::Model),
            _ => None,
        }
    }

    /// The role this turn carries on the completion wire.
    pub fn wire_role(&self) -> WireRole {
        match self {
            Self::Human => WireRole::User,
            Self::Model => WireRole::Assistant,
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single utterance within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Store-assigned identifier.
    pub id: i64,

    /// The conversation this turn belongs to.
    pub conversation_id: i64,

    /// The owning user.
    pub user_id: String,

    /// Free-text body.
    pub body: String,

    /// Who authored it.
    pub role: TurnRole,

    /// Tokenizer cost of `body`, attributed at write time. The same
    /// function that budgets the context window computes this value.
    pub token_cost: i64,

    /// Creation timestamp — the only ordering used to rebuild context.
    pub created_at: DateTime<Utc>,
}

/// A thread of turns belonging to one user.
///
/// Created atomically together with its first two turns (the opening prompt
/// and the model's reply); immutable afterwards except for accumulating
/// turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Store-assigned identifier.
    pub id: i64,

    /// The owning user.
    pub user_id: String,

    /// Short model-derived topic label (never user-supplied).
    pub topic: String,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
