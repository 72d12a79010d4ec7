use chrono::{DateTime, Utc};

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Crypto
// ---------------------------------------------------------------------------

/// USD quote block, copied verbatim from the listings payload.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Quote {
    pub price: f64,
    pub volume_24h: f64,
    pub percent_change_24h: f64,
    pub market_cap: f64,
}

/// One listed asset as fetched by the listings source, before it is stamped by a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub id: i64,
    pub name: String,
    pub symbol: String,
    pub rank: i64,
    pub quote: Quote,
}

impl Listing {
    pub fn stamp(self, at: DateTime<Utc>) -> Crypto {
        Crypto {
            id: self.id,
            name: self.name,
            symbol: self.symbol,
            rank: self.rank,
            quote: self.quote,
            last_updated: at,
        }
    }
}

/// A cached and persisted asset record. `id` is the upstream identifier and the store key.
#[derive(Debug, Clone, PartialEq)]
pub struct Crypto {
    pub id: i64,
    pub name: String,
    pub symbol: String,
    pub rank: i64,
    pub quote: Quote,
    /// Set when this system wrote the record, not by the source.
    pub last_updated: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything one cycle produced. The cache only ever swaps whole snapshots.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    /// None until the first cycle (or cold start) lands.
    pub last_update: Option<DateTime<Utc>>,
    pub data: Vec<Crypto>,
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankKey {
    #[default]
    MarketCap,
    Price,
    Volume24h,
    PercentChange24h,
    /// Upstream rank, ascending (rank 1 first).
    Rank,
}

impl std::str::FromStr for RankKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "market_cap" => Ok(RankKey::MarketCap),
            "price" => Ok(RankKey::Price),
            "volume_24h" => Ok(RankKey::Volume24h),
            "percent_change_24h" => Ok(RankKey::PercentChange24h),
            "rank" | "cmc_rank" => Ok(RankKey::Rank),
            other => Err(AppError::Query(format!("unknown sort key '{other}'"))),
        }
    }
}

impl std::fmt::Display for RankKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RankKey::MarketCap => "market_cap",
            RankKey::Price => "price",
            RankKey::Volume24h => "volume_24h",
            RankKey::PercentChange24h => "percent_change_24h",
            RankKey::Rank => "rank",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Cycle outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum CycleResult {
    /// Snapshot cached and persisted (or, for cold start, loaded). Carries the record count.
    Success(usize),
    /// Fetch failed. Cache and store were not touched.
    FetchFailed(String),
    /// Cache holds the new snapshot but the store write was rolled back.
    PersistFailed { cached: usize, reason: String },
    /// Reading the store for a cold start failed. Cache untouched.
    LoadFailed(String),
    /// Another cycle was already in flight.
    Skipped,
}

impl CycleResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleResult::Success(_))
    }
}

impl std::fmt::Display for CycleResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleResult::Success(n) => write!(f, "success({n})"),
            CycleResult::FetchFailed(_) => write!(f, "fetch_failed"),
            CycleResult::PersistFailed { .. } => write!(f, "persist_failed"),
            CycleResult::LoadFailed(_) => write!(f, "load_failed"),
            CycleResult::Skipped => write!(f, "skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_key_parses_known_names_and_rejects_others() {
        assert_eq!("market_cap".parse::<RankKey>().unwrap(), RankKey::MarketCap);
        assert_eq!("cmc_rank".parse::<RankKey>().unwrap(), RankKey::Rank);
        assert_eq!("volume_24h".parse::<RankKey>().unwrap(), RankKey::Volume24h);
        let err = "marketcap".parse::<RankKey>().unwrap_err();
        assert!(matches!(err, AppError::Query(_)));
    }

    #[test]
    fn stamp_carries_every_listing_field() {
        let at = Utc::now();
        let listing = Listing {
            id: 1,
            name: "Bitcoin".to_string(),
            symbol: "BTC".to_string(),
            rank: 1,
            quote: Quote {
                price: 2.0,
                volume_24h: 3.0,
                percent_change_24h: -1.5,
                market_cap: 4.0,
            },
        };
        let crypto = listing.clone().stamp(at);
        assert_eq!(crypto.id, listing.id);
        assert_eq!(crypto.symbol, "BTC");
        assert_eq!(crypto.quote, listing.quote);
        assert_eq!(crypto.last_updated, at);
    }
}
