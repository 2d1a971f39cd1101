use anyhow::{Context, Result};
use ideaboard_backend::config::AssistantConfig;
use ideaboard_backend::server::serve_gateway;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ideaboard_backend=debug")),
        )
        .init();

    let config = AssistantConfig::load();

    tracing::info!(
        "Starting assistant gateway (bind via IDEABOARD_GATEWAY_BIND; set IDEABOARD_GATEWAY_TOKEN to require bearer auth)"
    );

    let server_rt = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    server_rt.block_on(serve_gateway(&config))
}
