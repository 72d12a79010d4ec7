mod api;
mod config;
mod db;
mod error;
mod fetcher;
mod refresh;
mod scheduler;
mod state;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::RefreshHealth;
use crate::api::latency::CycleStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::CryptoStore;
use crate::error::Result;
use crate::refresh::{hydrate_from_store, select_strategy, PipelineDeps};
use crate::scheduler::{FirstTick, Scheduler};
use crate::state::CryptoCache;
use crate::types::CycleResult;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store = CryptoStore::connect(&cfg.db_path).await?;
    info!("Database ready at {} ({} rows)", cfg.db_path, store.count().await?);

    // --- Shared state ---
    let deps = PipelineDeps {
        cache: CryptoCache::new(),
        store,
        health: Arc::new(RefreshHealth::new()),
        cycle_stats: Arc::new(CycleStats::new()),
    };
    let strategy = select_strategy(&cfg, deps.clone())?;
    info!(
        mode = strategy.mode(),
        fetch_limit = cfg.fetch_limit,
        policy = %cfg.persist_policy,
        "Refresh strategy selected",
    );

    // --- Optional warm start from the store ---
    let first_tick = if cfg.cold_start && !cfg.dev_mode {
        match hydrate_from_store(&deps.cache, &deps.store).await {
            CycleResult::Success(n) if n > 0 => {
                info!("Cold start: hydrated {n} stored records, first fetch in one period");
                FirstTick::AfterPeriod
            }
            CycleResult::LoadFailed(e) => {
                warn!("Cold start failed, fetching immediately: {e}");
                FirstTick::Immediate
            }
            _ => {
                info!("Cold start: store is empty, fetching immediately");
                FirstTick::Immediate
            }
        }
    } else {
        FirstTick::Immediate
    };

    // --- Scheduler ---
    let scheduler = Scheduler::new(Arc::clone(&strategy), cfg.refresh_interval, first_tick).spawn();

    // --- HTTP API server ---
    let api_state = ApiState {
        cache: Arc::clone(&deps.cache),
        health: Arc::clone(&deps.health),
        cycle_stats: Arc::clone(&deps.cycle_stats),
        top_n: cfg.top_n,
        max_limit: cfg.fetch_limit,
        mode: strategy.mode(),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP API stopped, waiting for scheduler");
    scheduler.shutdown().await;
    deps.store.pool().close().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown requested");
}
