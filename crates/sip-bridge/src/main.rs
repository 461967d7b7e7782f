//! tablevoice-sipbridge: the trunk process.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use tablevoice_sip_bridge::{control, start_client, BridgeConfig, BridgeState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tablevoice=info,tablevoice_sip_bridge=info,rvoip=warn".into()),
        )
        .init();

    let config = BridgeConfig::parse();
    if config.sip_username.trim().is_empty() {
        anyhow::bail!("--sip-username is required");
    }
    info!(
        account = %config.account_uri(),
        ws_target = %config.ws_target,
        api_port = config.api_port,
        "starting tablevoice sipbridge"
    );

    let state = BridgeState::new(config);
    let registration_id = start_client(&state).await.context("SIP client startup failed")?;

    let app = control::router(state.clone());
    let addr = format!("0.0.0.0:{}", state.config.api_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind control plane on {addr}"))?;
    info!(%addr, "control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("control plane error")?;

    // Orderly teardown: BYE every live call before the ports go away,
    // then drop the registration.
    state.hangup_all().await;
    if let Some(client) = state.client().await {
        if let Err(e) = client.unregister(registration_id).await {
            warn!(error = %e, "unregister failed");
        }
        if let Err(e) = client.stop().await {
            warn!(error = %e, "client stop failed");
        }
    }
    info!("clean shutdown");
    Ok(())
}

/// Resolve on SIGINT/SIGTERM; a detached watchdog guarantees the process
/// is gone within 3 seconds of the signal.
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
