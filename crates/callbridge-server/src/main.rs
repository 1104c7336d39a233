//! Callbridge server binary.
//!
//! Starts an axum HTTP server with structured logging, builds the voice
//! engines from configuration, and ends every active call on SIGTERM/SIGINT.

use callbridge_server::{app, config, AppState};
use callbridge_voice::VoicePorts;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CALLBRIDGE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    if config.server.public_url.trim().is_empty() {
        tracing::warn!("server.public_url is not set; /incoming-call will answer with an error");
    }

    let ports = VoicePorts::from_config(
        config.recognizer.clone(),
        config.generator.clone(),
        config.synthesizer.clone(),
    )
    .expect("failed to build voice engines; check the recognizer/generator/synthesizer config");

    let state = Arc::new(AppState::from_config(&config, ports));
    let registry = state.registry.clone();
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting callbridge server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    // Upgraded media streams outlive the HTTP connection tracking, so calls
    // are ended explicitly once the signal arrives.
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let ended = registry.shutdown_all().await;
            tracing::info!(ended_calls = ended, "ended active calls");
        })
        .await
        .expect("server error");

    tracing::info!("callbridge server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
