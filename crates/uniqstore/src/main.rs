use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uniqconf::UniqConfig;
use uniqstore::{telemetry, web};

/// Deduplicating text store over HTTP
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of ./uniqstore.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the digest index and reference catalog
    #[arg(short, long)]
    state_dir: Option<PathBuf>,

    /// Root directory of the blob store
    #[arg(long)]
    blob_dir: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// OTLP gRPC endpoint for OpenTelemetry (e.g., "127.0.0.1:4317")
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Flags win over files and environment.
    fn apply(&self, config: &mut UniqConfig) {
        if let Some(dir) = &self.state_dir {
            config.paths.state_dir = dir.clone();
        }
        if let Some(dir) = &self.blob_dir {
            config.paths.blob_dir = dir.clone();
        }
        if let Some(port) = self.port {
            config.bind.http_port = port;
        }
        if let Some(endpoint) = &self.otlp_endpoint {
            config.telemetry.otlp_endpoint = Some(endpoint.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) =
        UniqConfig::load_with_sources_from(cli.config.as_deref()).context("failed to load config")?;
    cli.apply(&mut config);

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    let telemetry_guard = telemetry::init(
        &config.telemetry.log_level,
        config.telemetry.otlp_endpoint.as_deref(),
    )
    .context("failed to initialize telemetry")?;

    for file in &sources.files {
        tracing::info!(path = %file.display(), "loaded config file");
    }
    if !sources.env_overrides.is_empty() {
        tracing::info!(vars = ?sources.env_overrides, "applied environment overrides");
    }

    let coordinator = Arc::new(uniqstore::open_coordinator(&config)?);
    let app = web::router(web::WebState::new(coordinator.clone()));

    let addr = config.bind.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("uniqstore listening on http://{}", addr);
    tracing::info!("   Upload: POST http://{}/upload", addr);
    tracing::info!("   Reference: GET|DELETE http://{}/file-ref/{{id}}", addr);
    tracing::info!("   Content: GET http://{}/file/{{hash}}", addr);
    tracing::info!("   Exists: GET http://{}/file_exists/{{hash}}", addr);
    tracing::info!("   Health: GET http://{}/health", addr);

    let shutdown_token = CancellationToken::new();
    let server_token = shutdown_token.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                server_token.cancelled().await;
                tracing::info!("server shutdown signal received");
            })
            .await
    });

    wait_for_signal().await?;
    shutdown_token.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = ?e, "server exited with error"),
        Err(e) => tracing::error!(error = ?e, "server task failed"),
    }

    if let Err(e) = coordinator.flush() {
        tracing::error!(error = %e, "failed to flush metadata on shutdown");
    }

    tracing::info!("shutdown complete");
    telemetry_guard.shutdown();
    Ok(())
}

/// Resolve on SIGINT (Ctrl+C) or SIGTERM.
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl+C")?;
                tracing::info!("received SIGINT, shutting down gracefully");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down gracefully");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        tracing::info!("received Ctrl+C, shutting down gracefully");
    }
    Ok(())
}
