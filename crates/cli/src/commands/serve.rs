//! `parlor serve` — start the HTTP gateway.

use anyhow::Context;
use parlor_config::AppConfig;

pub async fn run(port: Option<u16>) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("loading configuration")?;

    if let Some(port) = port {
        config.gateway.port = port;
    }

    // The default database lives under the config dir
    std::fs::create_dir_all(AppConfig::config_dir()).context("creating config directory")?;

    tracing::debug!(?config, "Configuration loaded");

    parlor_gateway::start(config)
        .await
        .map_err(|e| anyhow::anyhow!("gateway failed: {e}"))
}
