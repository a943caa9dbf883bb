//! `chatfuse serve`: start the HTTP gateway.

use anyhow::Context;
use chatfuse_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    tracing::debug!(?config, "Configuration loaded");

    println!("Chatfuse Gateway");
    println!("   Listening:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Default LLM: {}", config.default_llm);
    println!("   Services:    {}", config.services.len());

    chatfuse_gateway::start(config)
        .await
        .map_err(|e| anyhow::anyhow!("gateway stopped: {e}"))?;

    Ok(())
}
