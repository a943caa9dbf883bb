//! `chatfuse services`: probe every configured service once.

use anyhow::Context;
use chatfuse_config::AppConfig;
use chatfuse_core::error::RegistrationError;
use chatfuse_orchestrator::ServiceRegistry;

pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let descriptors = config.descriptors()?;
    let registry = ServiceRegistry::new(config.timeouts.health());

    println!("Configured services");
    println!("===================");
    println!();

    let mut required_down = 0;
    for descriptor in descriptors {
        let line = format!(
            "{:<10} {:<4} {}",
            descriptor.id,
            descriptor.kind,
            descriptor.health_url()
        );
        match registry.register(descriptor).await {
            Ok(registered) if registered.is_active() => println!("  ✅ {line}"),
            Ok(_) => println!("  ⚠️  {line}  (optional, unreachable)"),
            Err(RegistrationError::RequiredUnavailable { reason, .. }) => {
                required_down += 1;
                println!("  ❌ {line}  (required: {reason})");
            }
            Err(e) => println!("  ❌ {line}  ({e})"),
        }
    }

    println!();
    if required_down == 0 {
        println!("  All required services are reachable.");
        Ok(())
    } else {
        anyhow::bail!("{required_down} required service(s) unreachable")
    }
}
