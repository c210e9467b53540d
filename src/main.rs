//! Demo host for the fast-micro application assembler.
//!
//! Serves a `/` route and the health endpoint, logging JSON lines to
//! stdout, until Ctrl+C.

use std::path::PathBuf;

use axum::{routing::get, Extension, Json};
use clap::Parser;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use fast_micro::config::{load_config, validate_config, ConfigError, ServiceConfig};
use fast_micro::http::shutdown_signal;
use fast_micro::{serve, AppBuilder, RequestContext};

#[derive(Parser)]
#[command(name = "fast-micro")]
#[command(about = "Serve a preconfigured application with structured logging", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Global log level, overrides the configuration file.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Bind address, overrides the configuration file.
    #[arg(short, long)]
    bind: Option<String>,
}

async fn index(Extension(ctx): Extension<RequestContext>) -> Json<Value> {
    tracing::info!("saying hello");
    Json(json!({
        "message": "hello",
        "request_id": ctx.request_id(),
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    let mut builder = AppBuilder::from_config(&config.app, &config.logging)
        .route("/", get(index));
    if let Some(level) = cli.log_level {
        builder = builder.log_level(level);
    }
    let app = builder.build()?;

    tracing::info!(
        bind_address = %config.listener.bind_address,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    serve(listener, app, shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
