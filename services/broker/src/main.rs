use std::env;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config_path = env::var("BROKER_CONFIG_PATH").unwrap_or_else(|_| "/etc/turbostream/broker.toml".to_owned());
    let mut config = if PathBuf::from(&config_path).exists() {
        broker::config::load_config_from_path(&PathBuf::from(&config_path)).expect("failed to load broker config")
    } else {
        info!(path = %config_path, "no config file found, starting with defaults");
        broker::config::load_config_from_str("").expect("default config must be valid")
    };

    if let Ok(bind_addr) = env::var("BIND_ADDR") {
        config.bind = bind_addr;
    }

    let shutdown = CancellationToken::new();
    let state = broker::AppState::build(&config, shutdown.clone());
    let router = broker::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind).await.expect("failed to bind");
    info!(addr = %config.bind, "broker listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .expect("server error");
    info!("broker shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT), then cancels `shutdown` so every
/// feed connector, dispatcher loop, and session task can wind down before
/// the process exits.
async fn shutdown_signal(shutdown: CancellationToken) {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }

    shutdown.cancel();
}
