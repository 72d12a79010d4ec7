use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::api::health::RefreshHealth;
use crate::api::latency::CycleStats;
use crate::config::{Config, PersistPolicy};
use crate::db::CryptoStore;
use crate::fetcher::{CmcClient, ListingSource};
use crate::state::CryptoCache;
use crate::types::{Crypto, CycleResult};

/// One way of producing a cache snapshot. Chosen once from config at startup.
///
/// `run_cycle` never returns an error: every failure is logged here and reported as a
/// `CycleResult`, so the scheduler loop cannot be brought down by a bad cycle.
#[async_trait]
pub trait RefreshStrategy: Send + Sync {
    async fn run_cycle(&self) -> CycleResult;

    /// Whether the scheduler keeps running cycles after the first one.
    fn periodic(&self) -> bool {
        true
    }

    fn mode(&self) -> &'static str;
}

/// Shared handles every strategy reports into.
#[derive(Clone)]
pub struct PipelineDeps {
    pub cache: Arc<CryptoCache>,
    pub store: CryptoStore,
    pub health: Arc<RefreshHealth>,
    pub cycle_stats: Arc<CycleStats>,
}

/// Pick the strategy for this process: store-only in dev mode, fetch-and-persist otherwise.
pub fn select_strategy(
    cfg: &Config,
    deps: PipelineDeps,
) -> crate::error::Result<Arc<dyn RefreshStrategy>> {
    if cfg.dev_mode {
        return Ok(Arc::new(ColdStartPipeline::new(deps)));
    }
    let source = Arc::new(CmcClient::new(cfg)?);
    Ok(Arc::new(LivePipeline::new(
        source,
        deps,
        cfg.fetch_limit,
        cfg.persist_policy,
    )))
}

// ---------------------------------------------------------------------------
// LivePipeline
// ---------------------------------------------------------------------------

/// fetch → swap cache → persist.
pub struct LivePipeline {
    source: Arc<dyn ListingSource>,
    deps: PipelineDeps,
    limit: usize,
    policy: PersistPolicy,
    /// Held for the whole cycle. A second caller finding it taken skips.
    in_flight: Mutex<()>,
}

impl LivePipeline {
    pub fn new(
        source: Arc<dyn ListingSource>,
        deps: PipelineDeps,
        limit: usize,
        policy: PersistPolicy,
    ) -> Self {
        Self {
            source,
            deps,
            limit,
            policy,
            in_flight: Mutex::new(()),
        }
    }

    async fn cycle(&self) -> CycleResult {
        let (listings, stats) = match self.source.fetch_listings(self.limit).await {
            Ok(fetched) => fetched,
            Err(e) => return CycleResult::FetchFailed(e.to_string()),
        };
        if listings.is_empty() {
            return CycleResult::FetchFailed(format!(
                "no usable listings ({} received, {} malformed)",
                stats.api_total, stats.rejected_malformed
            ));
        }

        let at = self.deps.cache.next_update_time(Utc::now());
        let records: Vec<Crypto> = listings.into_iter().map(|l| l.stamp(at)).collect();
        let snapshot = self.deps.cache.replace(records, at);
        let cached = snapshot.data.len();

        // Cache is already live with the new snapshot; a failed write is tolerated until
        // the next cycle persists again.
        if let Err(e) = self.deps.store.persist(&snapshot.data, self.policy).await {
            return CycleResult::PersistFailed {
                cached,
                reason: e.to_string(),
            };
        }

        CycleResult::Success(cached)
    }
}

#[async_trait]
impl RefreshStrategy for LivePipeline {
    async fn run_cycle(&self) -> CycleResult {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("Refresh cycle already in flight, skipping");
            return CycleResult::Skipped;
        };

        let started = Instant::now();
        let result = self.cycle().await;
        finish_cycle(&self.deps, &result, started, self.mode());
        result
    }

    fn mode(&self) -> &'static str {
        "LIVE"
    }
}

// ---------------------------------------------------------------------------
// ColdStartPipeline
// ---------------------------------------------------------------------------

/// Dev-mode strategy: never calls the listings API, only loads the store into the cache.
pub struct ColdStartPipeline {
    deps: PipelineDeps,
}

impl ColdStartPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl RefreshStrategy for ColdStartPipeline {
    async fn run_cycle(&self) -> CycleResult {
        let started = Instant::now();
        let result = hydrate_from_store(&self.deps.cache, &self.deps.store).await;
        finish_cycle(&self.deps, &result, started, self.mode());
        result
    }

    fn periodic(&self) -> bool {
        false
    }

    fn mode(&self) -> &'static str {
        "DEV"
    }
}

/// Load the store (best rank first) into the cache. Never writes to the store.
///
/// An empty store leaves the cache in its initial state. The snapshot is dated by its
/// newest row so clients can tell how stale it is.
pub async fn hydrate_from_store(cache: &CryptoCache, store: &CryptoStore) -> CycleResult {
    let rows = match store.load_ranked().await {
        Ok(rows) => rows,
        Err(e) => return CycleResult::LoadFailed(e.to_string()),
    };
    let Some(newest) = rows.iter().map(|c| c.last_updated).max() else {
        info!("Store is empty, nothing to hydrate");
        return CycleResult::Success(0);
    };
    let count = rows.len();
    cache.replace(rows, newest);
    CycleResult::Success(count)
}

fn finish_cycle(deps: &PipelineDeps, result: &CycleResult, started: Instant, mode: &str) {
    let elapsed = started.elapsed();
    deps.cycle_stats.record(elapsed);
    deps.health.record(result, Utc::now().timestamp_millis());
    let elapsed_ms = elapsed.as_millis() as u64;

    match result {
        CycleResult::Success(count) => info!(
            mode,
            count,
            elapsed_ms,
            "Refresh cycle complete: {count} records in {elapsed_ms}ms",
        ),
        CycleResult::FetchFailed(reason) => warn!(
            mode,
            elapsed_ms,
            "Fetch failed, keeping previous snapshot: {reason}",
        ),
        CycleResult::PersistFailed { cached, reason } => error!(
            mode,
            cached,
            elapsed_ms,
            "Cache updated with {cached} records but persisting failed: {reason}",
        ),
        CycleResult::LoadFailed(reason) => {
            error!(mode, "Loading store into cache failed: {reason}")
        }
        CycleResult::Skipped => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
