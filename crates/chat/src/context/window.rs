//! The history window builder — the core budgeting component.
//!
//! Given a conversation's persisted turns and a new prompt, selects a
//! bounded, ordered subset to submit to the completion model:
//!
//! 1. The new prompt is the sole certain member; its cost (plus the fixed
//!    system instruction, when configured) is reserved up front.
//! 2. History is walked newest-first. A turn is admitted whole when it
//!    fits the remaining budget; the first turn that does not fit stops
//!    the scan — older turns are assumed to cost no less, so nothing is
//!    skipped to admit a smaller older turn.
//! 3. The final order is: system instruction, admitted history oldest →
//!    newest, then the new prompt.
//!
//! # Determinism
//!
//! Assembly is a pure function of the persisted history and the prompt:
//! identical inputs always produce identical windows.

use parlor_core::error::WindowError;
use parlor_core::store::TurnStore;
use parlor_core::turn::Turn;
use parlor_core::window::{ContextWindow, WindowTurn};
use tracing::debug;

use crate::context::token;

/// Window construction settings.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Total token budget of the model's context window.
    pub window_tokens: usize,

    /// Headroom reserved for the model's own generated output.
    pub reserved_output_tokens: usize,

    /// How many recent persisted turns are candidates for inclusion.
    pub max_history_turns: u32,

    /// Fixed instruction entry prepended to every window. Counted against
    /// the budget, never against history truncation.
    pub system_preamble: Option<String>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_tokens: 4000,
            reserved_output_tokens: 1024,
            max_history_turns: 4,
            system_preamble: Some("Format your replies as Markdown.".into()),
        }
    }
}

impl WindowConfig {
    /// Build from the application config. An empty preamble string
    /// disables the system entry.
    pub fn from_config(context: &parlor_config::ContextConfig) -> Self {
        let preamble = context.system_preamble.trim();
        Self {
            window_tokens: context.window_tokens,
            reserved_output_tokens: context.reserved_output_tokens,
            max_history_turns: context.max_history_turns,
            system_preamble: if preamble.is_empty() { None } else { Some(preamble.to_string()) },
        }
    }
}

/// The history window builder. Stateless — create one and reuse it.
pub struct HistoryWindowBuilder {
    config: WindowConfig,
}

impl HistoryWindowBuilder {
    pub fn new(config: WindowConfig) -> Self {
        Self { config }
    }

    /// Tokens available to the window: the model's context size minus the
    /// reservation for its generated output.
    pub fn budget(&self) -> usize {
        self.config.window_tokens.saturating_sub(self.config.reserved_output_tokens)
    }

    /// How many recent turns are retrieved as inclusion candidates.
    pub fn max_history_turns(&self) -> u32 {
        self.config.max_history_turns
    }

    /// Fetch the candidate turns from the store and assemble the window.
    pub async fn build(
        &self,
        store: &dyn TurnStore,
        conversation_id: i64,
        prompt: &str,
    ) -> Result<ContextWindow, parlor_core::Error> {
        let history = store.list_recent(conversation_id, self.config.max_history_turns).await?;
        Ok(self.assemble(&history, prompt)?)
    }

    /// Assemble a window from history (newest-first) and the new prompt.
    pub fn assemble(
        &self,
        history_newest_first: &[Turn],
        prompt: &str,
    ) -> Result<ContextWindow, WindowError> {
        let budget = self.budget();

        let preamble = self.config.system_preamble.as_deref();
        let reserved = token::token_count(prompt)
            + preamble.map(token::token_count).unwrap_or(0);

        // The prompt (and preamble) are the certain members; if they alone
        // blow the budget there is no window to build.
        if reserved > budget {
            return Err(WindowError::BudgetExceeded { reserved, budget });
        }

        let mut total = reserved;
        let mut admitted: Vec<WindowTurn> = Vec::new();

        for turn in history_newest_first {
            let cost = token::token_count(&turn.body);
            if total + cost > budget {
                // Older turns are assumed to cost no less: stop scanning
                // rather than skipping this turn for a smaller older one.
                break;
            }
            admitted.push(WindowTurn { role: turn.role.wire_role(), text: turn.body.clone() });
            total += cost;
        }

        let mut turns = Vec::with_capacity(admitted.len() + 2);
        if let Some(preamble) = preamble {
            turns.push(WindowTurn::system(preamble));
        }
        turns.extend(admitted.into_iter().rev());
        turns.push(WindowTurn::user(prompt));

        debug!(
            total_tokens = total,
            budget,
            entries = turns.len(),
            history_admitted = turns.len() - 1 - usize::from(self.config.system_preamble.is_some()),
            history_available = history_newest_first.len(),
            "Assembled context window"
        );

        Ok(ContextWindow { total_tokens: total, turns })
    }
}
