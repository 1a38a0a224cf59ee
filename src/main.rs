use ratelimiter::{config::LimiterConfig, init_server, init_tracing};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Optional config file path from command line; environment variables always apply
    let config_path = env::args().nth(1);

    let config = LimiterConfig::load(config_path.as_deref()).map_err(|e| {
        eprintln!("Usage: ratelimiter [config_file]");
        anyhow::anyhow!(
            "Failed to load configuration from {}: {}",
            config_path.as_deref().unwrap_or("environment"),
            e
        )
    })?;

    // Registration failures surface here and stop the process
    init_server(config).await?;

    Ok(())
}
