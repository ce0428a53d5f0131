//! The context window — the bounded, ordered slice of a conversation sent
//! to the completion service for one request.
//!
//! A `ContextWindow` is ephemeral: it is assembled per request, submitted,
//! and discarded. It is never persisted and has no existence beyond the
//! request that built it.

use serde::{Deserialize, Serialize};

/// The role tag a window entry carries on the completion wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    /// Fixed instruction entry (output formatting expectations).
    System,
    /// The end user.
    User,
    /// The completion model.
    Assistant,
}

impl WireRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One (role, text) entry of a context window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowTurn {
    pub role: WireRole,
    pub text: String,
}

impl WindowTurn {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: WireRole::System, text: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: WireRole::User, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: WireRole::Assistant, text: text.into() }
    }
}

/// An assembled context window: ordered entries plus the token total used
/// to decide inclusion. The total is accounting metadata only — it is
/// discarded once the completion call returns.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    /// Accumulated token cost of every entry, per the tokenizer.
    pub total_tokens: usize,

    /// Entries in submission order: optional system instruction, admitted
    /// history oldest → newest, then the new prompt.
    pub turns: Vec<WindowTurn>,
}

impl ContextWindow {
    /// Number of entries in the window.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roles_serialize_lowercase() {
        let entry = WindowTurn::assistant("Hello Django");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""role":"assistant""#));
    }

    #[test]
    fn constructors_tag_roles() {
        assert_eq!(WindowTurn::system("x").role, WireRole::System);
        assert_eq!(WindowTurn::user("x").role, WireRole::User);
        assert_eq!(WindowTurn::assistant("x").role, WireRole::Assistant);
    }
}
