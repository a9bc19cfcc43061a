use std::net::SocketAddr;

use anyhow::Context;
use crawler_app::{router, AppConfig, AppState};
use crawler_logging::{crawler_info, crawler_warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    crawler_logging::initialize(config.log_level);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    crawler_info!(
        "crawler listening on http://{} (rate limit {}/{}ms, cache {} entries for {}ms)",
        addr,
        config.rate_limit_max_requests,
        config.rate_limit_window.as_millis(),
        config.cache_max_size,
        config.cache_ttl.as_millis()
    );

    let app = router(AppState::from_config(&config));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    crawler_info!("crawler stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        crawler_warn!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
