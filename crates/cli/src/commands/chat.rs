//! `parlor chat` — one-shot prompt from the terminal.
//!
//! Runs against the same store and provider as the gateway, under a fixed
//! local user identity.

use std::sync::Arc;

use anyhow::Context;
use parlor_chat::ChatService;
use parlor_config::AppConfig;
use parlor_store::SqliteTurnStore;

/// The user identity for terminal sessions.
const LOCAL_USER: &str = "local";

pub async fn run(message: &str, conversation: Option<i64>) -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;

    // The default database lives under the config dir
    std::fs::create_dir_all(AppConfig::config_dir()).context("creating config directory")?;

    let store = Arc::new(
        SqliteTurnStore::new(&config.store.database_url)
            .await
            .context("opening turn store")?,
    );
    let provider = parlor_providers::build_provider(&config);
    let service = ChatService::new(provider, store, &config);

    let outcome = match conversation {
        Some(id) => service
            .continue_conversation(LOCAL_USER, id, message)
            .await
            .context("continuing conversation")?,
        None => service
            .open_conversation(LOCAL_USER, message)
            .await
            .context("opening conversation")?,
    };

    if conversation.is_none() {
        println!("[{}] {}", outcome.conversation.id, outcome.conversation.topic);
    }
    println!("{}", outcome.reply.body);

    if let Some(usage) = outcome.usage {
        tracing::debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Upstream usage"
        );
    }

    Ok(())
}
