use anyhow::Result;
use axum::http::StatusCode;
use axum::routing::get;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Startup failures (bad config, unreachable DB or KV) propagate out of
    // main and exit non-zero.
    let gateway = aigw_core::bootstrap_from_env().await?;
    let bind = format!("{}:{}", gateway.config.host, gateway.config.port);

    let proxy_state = aigw_router::ProxyState {
        executor: gateway.executor.clone(),
        registry: gateway.registry.clone(),
        repo: gateway.repo.clone(),
        admin_key_hash: gateway.config.admin_key_hash.clone(),
    };
    let admin_state = aigw_router::AdminState {
        repo: gateway.repo.clone(),
        kv: gateway.kv.clone(),
        registry: gateway.registry.clone(),
        manager: gateway.manager.clone(),
        proxies: gateway.proxies.clone(),
        aliases: gateway.aliases.clone(),
        tokens: gateway.tokens.clone(),
        admin_key_hash: gateway.config.admin_key_hash.clone(),
    };

    let app = axum::Router::new()
        .merge(aigw_router::proxy_router(proxy_state))
        .nest("/admin", aigw_router::admin_router(admin_state))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain background loops before exiting cleanly.
    gateway.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
