use std::sync::Arc;

use anyhow::Context;

use safework_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    safework_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let bind_addr = config.bind_addr;

    let services = Arc::new(safework_api::app::services::build_services(config).await?);
    let workers = services.spawn_workers();
    let app = safework_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await
        .context("server error")?;

    tracing::info!("draining job workers");
    workers.shutdown().await;
    Ok(())
}
