//! Lag-compensated authoritative game server
//!
//! Entry point. It wires up:
//! - TCP listener for the reliable channel (session control, acknowledgments)
//! - UDP socket for the unreliable channel (high-frequency transforms)
//! - The fixed-tick simulation task

use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lagcomp_server::app::ServerState;
use lagcomp_server::config::{Config, LogFormat};
use lagcomp_server::game::TickScheduler;
use lagcomp_server::net::outbox::{NetOutbox, UDP_QUEUE_LEN};
use lagcomp_server::net::transport::{send_udp, serve_tcp, serve_udp};
use lagcomp_server::util::time::{init_server_time, TICKS_PER_SECOND};

/// Free props scattered around the spawn area
const STARTUP_PROPS: usize = 8;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_format);

    // Initialize server time tracking
    init_server_time();

    info!("Starting lag-compensated game server");
    info!(
        tcp = %config.server_addr,
        udp = %config.udp_addr,
        tick_rate = TICKS_PER_SECOND,
        max_players = config.max_players,
        "Configuration loaded"
    );

    let state = ServerState::new(config);

    let listener = TcpListener::bind(state.config.server_addr).await?;
    let udp = Arc::new(UdpSocket::bind(state.config.udp_addr).await?);
    info!(addr = %state.config.server_addr, "Reliable channel listening");
    info!(addr = %state.config.udp_addr, "Unreliable channel listening");

    let (udp_tx, udp_rx) = mpsc::channel(UDP_QUEUE_LEN);
    tokio::spawn(send_udp(udp.clone(), udp_rx));

    let scheduler = TickScheduler::builder()
        .outbox(Arc::new(NetOutbox::new(state.sessions.clone(), udp_tx)))
        .ingress(state.ingress.clone())
        .tick_counter(state.current_tick.clone())
        .seed(state.config.world_seed)
        .props(STARTUP_PROPS)
        .build()
        .map_err(|e| {
            error!(error = %e, "Simulation wiring failed");
            e
        })?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let simulation = tokio::spawn(scheduler.run(async move {
        let _ = stop_rx.await;
    }));

    tokio::select! {
        _ = serve_tcp(listener, state.clone()) => {}
        _ = serve_udp(udp, state.clone()) => {}
        _ = shutdown_signal() => {}
    }

    let _ = stop_tx.send(());
    simulation.await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
