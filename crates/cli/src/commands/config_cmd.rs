//! `chatfuse config`: configuration helpers.

use anyhow::Context;
use chatfuse_config::AppConfig;
use clap::Subcommand;

#[derive(Subcommand, Default, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the default configuration as TOML
    #[default]
    Default,

    /// Print the path the config is loaded from
    Path,

    /// Load the config, apply environment overrides, and validate it
    Validate,
}

pub fn run(action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Default => println!("{}", AppConfig::default_toml()),
        ConfigAction::Path => println!("{}", config_path().display()),
        ConfigAction::Validate => validate()?,
    }
    Ok(())
}

fn config_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}

fn validate() -> anyhow::Result<()> {
    println!("Validating {}", config_path().display());
    let config = AppConfig::load().context("Config error")?;

    let required: Vec<&str> = config
        .services
        .iter()
        .filter(|s| s.required)
        .map(|s| s.id.as_str())
        .collect();

    println!("   ✅ Config is valid");
    println!();
    println!("   Default LLM: {}", config.default_llm);
    println!("   Gateway:     {}:{}", config.gateway.host, config.gateway.port);
    println!("   Services:    {}", config.services.len());
    println!("   Required:    {}", required.join(", "));
    Ok(())
}
