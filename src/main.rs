//! Coinward server entry point.
//!
//! Always-on portfolio-control service: scheduled ingestion, rules
//! evaluation behind the guardrail pipeline, approval workflow, SSE
//! fan-out, and the nightly optimizer, all behind one HTTP API.

use anyhow::Result;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

use coinward::application::system::Application;
use coinward::config::Config;
use coinward::interfaces::http;
use coinward::interfaces::http::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("coinward {} starting...", env!("CARGO_PKG_VERSION"));

    // Missing required configuration aborts with a non-zero exit.
    let config = Config::from_env()?;
    info!(
        port = config.port,
        dry_run = config.effective_dry_run(),
        light_mode = config.light_mode,
        "configuration loaded"
    );

    let app = Arc::new(Application::build(config.clone()).await?);
    let handles = app.start();
    info!("background jobs running: {}", handles.len());

    let state = AppState::new(Arc::clone(&app));
    let server = tokio::spawn(http::serve(
        state,
        config.port,
        app.shutdown_signal(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    app.shutdown(handles).await;
    let _ = server.await;

    Ok(())
}
