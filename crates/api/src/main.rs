use std::sync::Arc;

use anyhow::Context;

use prospector_api::app::{self, services};
use prospector_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    prospector_observability::init();

    let config = AppConfig::from_env();
    let services = Arc::new(services::build_services(&config).await?);

    let processor = services.processor.clone().spawn();
    let app = app::build_app(&config.jwt_secret, services);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    processor.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
