//! Forgecast - ML inference and lifecycle service for the manufacturing
//! platform.
//!
//! Startup wires the dependency graph explicitly: stores, cache, pipeline,
//! lifecycle manager, then the three long-lived background tasks (training
//! consumer, staleness sweep, cache maintenance) and finally the HTTP
//! adapter.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use forgecast_backend::{router, AppState, ServiceConfig};

#[derive(Debug, Parser)]
#[command(name = "forgecast", about = "ML inference and lifecycle service")]
struct Args {
    /// SQLite database path (overrides FORGECAST_DB_PATH).
    #[arg(long)]
    db_path: Option<String>,

    /// Bind address (overrides FORGECAST_BIND_ADDR).
    #[arg(long)]
    bind: Option<String>,

    /// Artifact directory (overrides FORGECAST_ARTIFACT_DIR).
    #[arg(long)]
    artifact_dir: Option<String>,

    /// Run one staleness sweep and exit.
    #[arg(long)]
    sweep_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,forgecast_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = ServiceConfig::from_env();
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(artifact_dir) = args.artifact_dir {
        config.artifact_dir = artifact_dir;
    }

    info!(
        db_path = %config.db_path,
        artifact_dir = %config.artifact_dir,
        bind = %config.bind_addr,
        "Starting forgecast"
    );

    let cache = Arc::new(forgecast_backend::cache::InMemoryCache::new());
    let (state, job_rx) = AppState::build_with_cache(config, cache.clone()).await?;

    if args.sweep_once {
        let enqueued = state
            .lifecycle
            .sweep_stale(
                chrono::Duration::days(state.config.stale_after_days),
                &state.dispatcher,
            )
            .await?;
        info!(enqueued, "One-shot staleness sweep done");
        return Ok(());
    }

    // Background task: the single training consumer.
    state.training_consumer().spawn(job_rx);

    // Background task: periodic staleness sweep.
    state.lifecycle.clone().spawn_sweep_loop(
        state.dispatcher.clone(),
        state.config.sweep_interval,
        state.config.stale_after_days,
    );

    // Background task: cache expiry maintenance. Reads already check
    // expiry; this just bounds memory.
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;
            let removed = cache.purge_expired();
            if removed > 0 {
                tracing::debug!(removed, "Purged expired cache entries");
            }
        }
    });

    let bind_addr = state.config.bind_addr.clone();
    let app = router(state);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    info!(addr = %bind_addr, "HTTP adapter listening");
    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}
