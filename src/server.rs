//! HTTP server lifecycle: router construction, signal handling, and the
//! shutdown drain that lets in-flight deployments finish.

use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::deploy::ActiveBuilds;
use crate::logging::LogSink;
use crate::{webhook, SharedState};

/// How long shutdown waits for in-flight deployments before giving up.
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Webhook paths are configuration, not compile-time routes, so every
/// request funnels through the admitter as the router fallback.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .fallback(webhook::handle_webhook)
        .with_state(state)
}

/// Serves until a termination signal arrives, then stops accepting
/// connections, cancels in-flight deployments' tokens, and drains.
pub async fn run(state: SharedState, listener: TcpListener) -> std::io::Result<()> {
    let app = build_router(state.clone());

    info!(addr = %listener.local_addr()?, "listening for webhooks");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state
        .logger
        .info(None, "Shutdown signal received, draining active deployments");
    state.shutdown.cancel();

    if !wait_for_drain(state.deployer.active_builds(), DRAIN_DEADLINE).await {
        warn!("drain deadline reached with deployments still active");
        state
            .logger
            .warn(None, "Drain deadline reached with deployments still active");
    }

    state.logger.info(None, "Shutdown complete");
    state.logger.close();
    Ok(())
}

/// Polls the active-build counter until it reaches zero or the deadline
/// passes. Returns whether the drain completed.
pub async fn wait_for_drain(active_builds: &ActiveBuilds, deadline: Duration) -> bool {
    let started = std::time::Instant::now();
    while !active_builds.is_idle() {
        if started.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    true
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
