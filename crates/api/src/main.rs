use std::sync::Arc;

use anyhow::Context;

use stockflow_api::app::{build_app, services};
use stockflow_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    stockflow_observability::init(config.log_format);

    let services = services::build_services(&config).await?;
    let backend = services.backend();
    let app = build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, store = backend, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
