//! Main binary for the file upload service
//!
//! Serves the upload form, accepts multipart uploads on `/upload` and serves
//! stored files back from `/uploads/{filename}`.

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use file_upload_service::{
    config_types::LoggingConfig, create_router, AppState, UploadServiceConfig,
};

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal outside development
    let _ = dotenvy::dotenv();

    let matches = create_cli().get_matches();

    let mut config = UploadServiceConfig::load(matches.get_one::<String>("config").map(String::as_str))
        .context("Failed to load configuration")?;
    apply_cli_overrides(&mut config, &matches);

    init_tracing(&config.logging);

    info!(
        "Starting file upload service v{}",
        env!("CARGO_PKG_VERSION")
    );

    config.validate().map_err(|e| {
        error!("Configuration validation failed: {}", e);
        e
    })?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;

    let state = AppState::new(config)
        .await
        .context("Failed to initialize upload service")?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!("File upload service listening on http://{}", addr);
    info!("Upload form: http://{}/", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("File upload service stopped");
    Ok(())
}

/// Create CLI argument parser
fn create_cli() -> Command {
    Command::new("file-upload")
        .version(env!("CARGO_PKG_VERSION"))
        .about("File upload service with MIME allow-listing and size limits")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Server host address"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .help("Server port (overrides PORT)"),
        )
        .arg(
            Arg::new("storage-dir")
                .short('d')
                .long("storage-dir")
                .value_name("DIR")
                .help("Directory uploads are stored in"),
        )
        .arg(
            Arg::new("max-bytes")
                .long("max-bytes")
                .value_name("BYTES")
                .value_parser(clap::value_parser!(u64))
                .help("Maximum accepted file size in bytes"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Log level"),
        )
}

/// Command line values win over file and environment configuration
fn apply_cli_overrides(config: &mut UploadServiceConfig, matches: &ArgMatches) {
    if let Some(host) = matches.get_one::<String>("host") {
        config.server.host = host.clone();
    }

    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }

    if let Some(directory) = matches.get_one::<String>("storage-dir") {
        config.storage.directory = directory.clone();
    }

    if let Some(max_bytes) = matches.get_one::<u64>("max-bytes") {
        config.upload.max_bytes = *max_bytes;
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }
}

/// Initialize tracing/logging
fn init_tracing(logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "file_upload_service={level},file_upload={level},tower_http={level}",
            level = logging.level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    if logging.json_format {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false).compact()).init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
