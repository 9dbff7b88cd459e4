//! Real-time driver presence and position broadcast.
//!
//! Drivers report presence over unary HTTP calls into a single in-process
//! store. A broadcaster diffs the store every tick and fans typed change
//! events out to dashboard WebSockets, while a reaper independently evicts
//! drivers that stopped reporting.

pub mod auth;
pub mod broadcaster;
pub mod config;
pub mod error;
pub mod http;
pub mod messages;
pub mod reaper;
pub mod state;
pub mod ws;

use std::convert::Infallible;
use std::sync::Arc;

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use log::{error, info};
use tokio::signal;
use tokio::sync::watch;

use broadcaster::Broadcaster;
use config::Config;
use reaper::Reaper;
use state::{AppState, SharedState};

/// Starts the tick and reaper tasks and serves HTTP/WebSocket traffic until
/// Ctrl+C or SIGTERM.
pub async fn start_server(config: Config) {
    let addr = config.addr;
    let state: SharedState = Arc::new(AppState::new(config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let broadcaster = Broadcaster::new(state.subscribers.clone());
    let broadcaster_task = tokio::spawn(
        broadcaster.run(state.config.broadcast_tick, shutdown_rx.clone()),
    );

    let reaper = Reaper::new(state.presence.clone(), state.config.inactivity_threshold_chrono());
    let reaper_task = tokio::spawn(reaper.run(state.config.reaper_interval, shutdown_rx));

    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let state = state.clone();
        let remote = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                http::handle_request(req, remote, state.clone())
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            return;
        }
    };

    info!("Presence server listening on http://{}", addr);
    info!("Driver reports: POST http://{}/api/drivers/{{driver_id}}/presence", addr);
    info!("Dashboard WebSocket: ws://{}", addr);
    info!("Health check: http://{}/health", addr);

    if let Err(e) = server.with_graceful_shutdown(shutdown_signal()).await {
        error!("Server error: {}", e);
    }

    let _ = shutdown_tx.send(true);
    let _ = broadcaster_task.await;
    let _ = reaper_task.await;
    info!("Presence server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
