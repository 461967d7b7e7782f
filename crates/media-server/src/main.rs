//! tablevoice-server: the agent process.

use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use tablevoice_media_server::{router, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tablevoice=info,tablevoice_media_server=info".into()),
        )
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    let addr = format!("0.0.0.0:{}", config.port);
    info!(%addr, restaurant = %config.restaurant_id, "starting tablevoice server");

    let state = AppState::new(config);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("clean shutdown");
    Ok(())
}

/// Resolve on SIGINT/SIGTERM; once signalled, a detached watchdog forces
/// process exit within 3 seconds even if a call refuses to wind down.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("shutdown signal received");
    std::thread::spawn(|| {
        std::thread::sleep(Duration::from_secs(3));
        warn!("shutdown watchdog expired, forcing exit");
        std::process::exit(0);
    });
}
