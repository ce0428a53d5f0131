//! Completion service implementations for Parlor.
//!
//! All providers implement the `parlor_core::CompletionProvider` trait.
//! Which implementation serves a process is decided once, from
//! configuration, at construction time — never per call.

pub mod openai_compat;
pub mod stub;

pub use openai_compat::OpenAiCompatProvider;
pub use stub::StubProvider;

use std::sync::Arc;

use parlor_core::CompletionProvider;

/// Build the configured completion provider.
///
/// `provider = "stub"` gives the deterministic offline stub; any other name
/// is treated as an OpenAI-compatible endpoint, with well-known base URLs
/// filled in for common provider names.
pub fn build_provider(config: &parlor_config::AppConfig) -> Arc<dyn CompletionProvider> {
    if config.provider == "stub" {
        return Arc::new(StubProvider::new());
    }

    let base_url = config
        .api_url
        .clone()
        .unwrap_or_else(|| default_base_url(&config.provider));
    let api_key = config.api_key.clone().unwrap_or_default();

    Arc::new(OpenAiCompatProvider::new(&config.provider, base_url, api_key))
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
