use chrono::{DateTime, Utc};

use crate::types::{Crypto, Quote};

/// Row of the `cryptos` table (see migrations/0001_create_cryptos.sql).
#[derive(Debug, sqlx::FromRow)]
pub struct CryptoRow {
    pub coin_id: i64,
    pub name: String,
    pub symbol: String,
    pub cmc_rank: i64,
    pub price: f64,
    pub volume_24h: f64,
    pub percent_change_24h: f64,
    pub market_cap: f64,
    pub last_updated: DateTime<Utc>,
}

impl From<CryptoRow> for Crypto {
    fn from(r: CryptoRow) -> Self {
        Crypto {
            id: r.coin_id,
            name: r.name,
            symbol: r.symbol,
            rank: r.cmc_rank,
            quote: Quote {
                price: r.price,
                volume_24h: r.volume_24h,
                percent_change_24h: r.percent_change_24h,
                market_cap: r.market_cap,
            },
            last_updated: r.last_updated,
        }
    }
}
