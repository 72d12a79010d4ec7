use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{Config, CONVERT_CURRENCY, HTTP_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::types::{Listing, Quote};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchStats {
    /// Entries in the payload's `data` array.
    pub api_total: usize,
    pub rejected_malformed: usize,
    pub rejected_duplicate: usize,
    pub accepted: usize,
}

/// Where a cycle gets its snapshot from.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch at most `limit` listings, in the order the source ranks them.
    async fn fetch_listings(&self, limit: usize) -> Result<(Vec<Listing>, FetchStats)>;
}

// ---------------------------------------------------------------------------
// CoinMarketCap client
// ---------------------------------------------------------------------------

pub struct CmcClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CmcClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        if cfg.api_key.is_empty() {
            return Err(AppError::Config(
                "API_KEY is required for live fetches".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.cmc_api_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        })
    }
}

#[async_trait]
impl ListingSource for CmcClient {
    async fn fetch_listings(&self, limit: usize) -> Result<(Vec<Listing>, FetchStats)> {
        let url = format!("{}/cryptocurrency/listings/latest", self.base_url);
        let limit_param = limit.to_string();

        let resp = self
            .http
            .get(&url)
            .header("X-CMC_PRO_API_KEY", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("start", "1"),
                ("limit", limit_param.as_str()),
                ("convert", CONVERT_CURRENCY),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AppError::Upstream {
                status: status.as_u16(),
                message: upstream_error_message(&body),
            });
        }

        let payload: serde_json::Value = serde_json::from_str(&body)?;
        parse_listings(&payload, limit)
    }
}

/// Pull `status.error_message` out of an error body, else a short prefix of the raw body.
fn upstream_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("status")?
                .get("error_message")?
                .as_str()
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

// ---------------------------------------------------------------------------
// Payload parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct WireListing {
    id: i64,
    name: String,
    symbol: String,
    cmc_rank: i64,
    quote: HashMap<String, WireQuote>,
}

/// Upstream sends `null` for metrics it has no value for.
#[derive(Deserialize)]
struct WireQuote {
    price: Option<f64>,
    volume_24h: Option<f64>,
    percent_change_24h: Option<f64>,
    market_cap: Option<f64>,
}

/// Turn a listings payload into at most `limit` listings.
///
/// Entries that fail to parse or lack a USD quote are rejected one by one; a repeated id
/// keeps its first occurrence. A payload without a `data` array is an error.
pub fn parse_listings(
    payload: &serde_json::Value,
    limit: usize,
) -> Result<(Vec<Listing>, FetchStats)> {
    let items = payload
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| AppError::MalformedPayload("missing 'data' array".to_string()))?;

    let mut stats = FetchStats {
        api_total: items.len(),
        ..Default::default()
    };
    let mut seen: HashSet<i64> = HashSet::new();
    let mut listings = Vec::with_capacity(items.len().min(limit));

    for item in items {
        let Some(listing) = parse_listing(item) else {
            stats.rejected_malformed += 1;
            continue;
        };
        if !seen.insert(listing.id) {
            stats.rejected_duplicate += 1;
            debug!(coin_id = listing.id, "Duplicate listing dropped");
            continue;
        }
        listings.push(listing);
        if listings.len() >= limit {
            break;
        }
    }

    if stats.rejected_malformed > 0 {
        warn!(
            rejected = stats.rejected_malformed,
            total = stats.api_total,
            "Dropped {} malformed listings",
            stats.rejected_malformed,
        );
    }

    stats.accepted = listings.len();
    Ok((listings, stats))
}

fn parse_listing(v: &serde_json::Value) -> Option<Listing> {
    let wire: WireListing = serde_json::from_value(v.clone()).ok()?;
    let usd = wire.quote.get(CONVERT_CURRENCY)?;
    Some(Listing {
        id: wire.id,
        name: wire.name,
        symbol: wire.symbol,
        rank: wire.cmc_rank,
        quote: Quote {
            price: usd.price.unwrap_or_default(),
            volume_24h: usd.volume_24h.unwrap_or_default(),
            percent_change_24h: usd.percent_change_24h.unwrap_or_default(),
            market_cap: usd.market_cap.unwrap_or_default(),
        },
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: i64, rank: i64, market_cap: f64) -> serde_json::Value {
        json!({
            "id": id,
            "name": format!("coin{id}"),
            "symbol": format!("C{id}"),
            "cmc_rank": rank,
            "quote": { "USD": {
                "price": 1.5,
                "volume_24h": 20.0,
                "percent_change_24h": -2.25,
                "market_cap": market_cap
            }}
        })
    }

    #[test]
    fn parses_listing_fields() {
        let payload = json!({ "data": [entry(1, 1, 900.0)] });
        let (listings, stats) = parse_listings(&payload, 10).unwrap();
        assert_eq!(stats.accepted, 1);
        let l = &listings[0];
        assert_eq!((l.id, l.rank, l.symbol.as_str()), (1, 1, "C1"));
        assert_eq!(l.quote.price, 1.5);
        assert_eq!(l.quote.percent_change_24h, -2.25);
        assert_eq!(l.quote.market_cap, 900.0);
    }

    #[test]
    fn missing_data_array_is_malformed() {
        let err = parse_listings(&json!({ "status": {} }), 10).unwrap_err();
        assert!(matches!(err, AppError::MalformedPayload(_)));
    }

    #[test]
    fn bad_entries_are_rejected_individually() {
        let no_usd = json!({
            "id": 5, "name": "x", "symbol": "X", "cmc_rank": 5,
            "quote": { "EUR": {} }
        });
        let no_rank = json!({ "id": 6, "name": "y", "symbol": "Y", "quote": { "USD": {} } });
        let payload = json!({ "data": [entry(1, 1, 1.0), no_usd, no_rank, entry(2, 2, 1.0)] });

        let (listings, stats) = parse_listings(&payload, 10).unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(stats.api_total, 4);
        assert_eq!(stats.rejected_malformed, 2);
    }

    #[test]
    fn null_metrics_read_as_zero() {
        let payload = json!({ "data": [{
            "id": 3, "name": "z", "symbol": "Z", "cmc_rank": 900,
            "quote": { "USD": {
                "price": 0.1, "volume_24h": null, "percent_change_24h": null, "market_cap": null
            } }
        }]});
        let (listings, _) = parse_listings(&payload, 10).unwrap();
        assert_eq!(listings[0].quote.market_cap, 0.0);
        assert_eq!(listings[0].quote.price, 0.1);
    }

    #[test]
    fn duplicates_keep_first_and_limit_bounds_output() {
        let mut dup = entry(1, 1, 1.0);
        dup["name"] = json!("second copy");
        let payload = json!({
            "data": [entry(1, 1, 1.0), dup, entry(2, 2, 1.0), entry(3, 3, 1.0)]
        });

        let (listings, stats) = parse_listings(&payload, 2).unwrap();
        let ids: Vec<i64> = listings.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(listings[0].name, "coin1");
        assert_eq!(stats.rejected_duplicate, 1);
        assert_eq!(stats.accepted, 2);
    }

    #[test]
    fn upstream_error_message_prefers_status_block() {
        let body = r#"{"status":{"error_code":1002,"error_message":"API key missing."}}"#;
        assert_eq!(upstream_error_message(body), "API key missing.");
        assert_eq!(upstream_error_message("gateway timeout"), "gateway timeout");
    }
}
