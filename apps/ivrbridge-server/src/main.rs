//! ivrbridge Server - standalone ingress server for telephony audio
//! transport and ASR provider session management.

use anyhow::{Context, Result};
use clap::Parser;
use ivrbridge_core::bootstrap::bootstrap_services;
use ivrbridge_core::config::Config;
use tokio::signal;

/// ivrbridge Server - telephony audio ingress and ASR session management.
#[derive(Parser, Debug)]
#[command(name = "ivrbridge-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "IVRBRIDGE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides PORT from the environment).
    #[arg(short = 'p', long, env = "IVRBRIDGE_BIND_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("ivrbridge Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    log::info!(
        "configuration: port={} asr_provider={} support_exotel={}",
        config.port,
        config.asr_provider,
        config.support_exotel
    );

    let port = config.port;
    let services = bootstrap_services(config).context("failed to bootstrap services")?;
    log::info!("services bootstrapped successfully");

    let router = ivrbridge_core::api::router(services.app_state.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .context("failed to bind listener")?;

    let server_handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            log::error!("server error: {err}");
        }
    });

    log::info!("ingress server listening on port {port}");

    shutdown_signal().await;
    log::info!("shutdown signal received, cleaning up");

    services.shutdown().await;
    server_handle.abort();

    log::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
