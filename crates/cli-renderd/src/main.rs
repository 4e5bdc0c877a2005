use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use render_daemon::{http, workspace, AppState, ServiceConfig};

/// HTTP service that renders editly specs to video
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config file and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Remove leftover render_* workspaces from the scratch root at startup
    #[arg(long)]
    sweep_orphans: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let mut cfg = ServiceConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    cfg.apply_process_env()
        .context("Failed to read configuration from environment")?;
    if let Some(port) = args.port {
        cfg.port = port;
    }

    info!("Configuration loaded:");
    info!("  Scratch root: {}", cfg.scratch_root.display());
    info!("  Editly binary: {}", cfg.editly_bin.display());
    info!("  Render timeout: {}ms", cfg.render_timeout_ms);
    match cfg.max_concurrent_renders {
        Some(n) => info!("  Max concurrent renders: {}", n),
        None => info!("  Max concurrent renders: unbounded"),
    }

    if cfg.sweep_orphans_on_startup || args.sweep_orphans {
        let removed = workspace::sweep_orphans(&cfg.scratch_root)
            .await
            .context("Failed to sweep orphaned workspaces")?;
        info!("✅ Startup sweep complete: {} orphaned workspace(s) removed", removed);
    }

    let state = AppState::from_config(&cfg);
    let upload_enabled = state.runner.upload_enabled();
    let app = http::router(state, cfg.max_body_bytes);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", cfg.host, cfg.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Editly rendering service running on {}", addr);
    info!("Available endpoints:");
    info!("  GET  /health - Health check");
    info!("  POST /render - Render video from Editly spec");
    if upload_enabled {
        info!("Object storage upload enabled");
    } else {
        info!("Object storage disabled (missing SUPABASE_URL, SUPABASE_KEY or SUPABASE_BUCKET)");
    }

    let grace = Duration::from_secs(cfg.shutdown_grace_secs);
    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        })
        .into_future();

    // In-flight jobs get `grace` after the signal, then the process exits
    // and whatever is still running is dropped.
    let drain_deadline = async move {
        if signalled_rx.await.is_ok() {
            tokio::time::sleep(grace).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = server => result.context("HTTP server failed")?,
        _ = drain_deadline => {
            if !grace.is_zero() {
                warn!("Shutdown grace period of {}s elapsed, abandoning in-flight jobs", grace.as_secs());
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
