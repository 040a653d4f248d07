//! Scribe relay service entry point.
//!
//! Loads settings, installs tracing and metrics, builds the token source
//! from environment credentials, and serves the relay endpoints until
//! ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use scribe_relay::{HttpTokenSource, StaticTokenSource, TokenSource};
use scribe_settings::ScribeSettings;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Streaming transcription relay for the Scribe clinic platform.
#[derive(Debug, Parser)]
#[command(name = "scribe", version, about)]
struct Cli {
    /// Settings file path (defaults to ~/.scribe/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Override the listen port from settings.
    #[arg(long)]
    port: Option<u16>,

    /// Override the listen host from settings.
    #[arg(long)]
    host: Option<String>,

    /// Disable the Prometheus /metrics endpoint.
    #[arg(long)]
    no_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => scribe_settings::load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => scribe_settings::load_settings().context("loading settings")?,
    };
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(host) = cli.host {
        settings.server.host = host;
    }

    scribe_core::logging::init_tracing(&settings.logging.filter, settings.logging.json);

    let metrics = if cli.no_metrics {
        None
    } else {
        Some(scribe_server::metrics::install_recorder())
    };

    let token_source = build_token_source(&settings)?;
    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    scribe_settings::init_settings(settings.clone());
    let state = scribe_server::AppState::new(Arc::new(settings), token_source, metrics);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "scribe relay listening");

    axum::serve(listener, scribe_server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("scribe relay stopped");
    Ok(())
}

/// Build the per-session token source from the environment variables the
/// settings name. A pre-provisioned `SCRIBE_UPSTREAM_TOKEN` short-circuits
/// credential acquisition for local development.
fn build_token_source(settings: &ScribeSettings) -> anyhow::Result<Arc<dyn TokenSource>> {
    if let Ok(token) = std::env::var("SCRIBE_UPSTREAM_TOKEN") {
        warn!("using fixed upstream token from SCRIBE_UPSTREAM_TOKEN; not for production");
        return Ok(Arc::new(StaticTokenSource::new(token)));
    }

    let client_id = std::env::var(&settings.upstream.client_id_env).with_context(|| {
        format!(
            "upstream client id not set ({})",
            settings.upstream.client_id_env
        )
    })?;
    let client_secret = std::env::var(&settings.upstream.client_secret_env).with_context(|| {
        format!(
            "upstream client secret not set ({})",
            settings.upstream.client_secret_env
        )
    })?;

    Ok(Arc::new(HttpTokenSource::new(
        settings.upstream.token_url.clone(),
        client_id,
        client_secret,
    )))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => warn!(error = %e, "failed to listen for shutdown signal"),
    }
}
