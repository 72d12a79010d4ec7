use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::PersistPolicy;
use crate::db::models::CryptoRow;
use crate::error::Result;
use crate::types::Crypto;

const UPSERT_SQL: &str = r#"
    INSERT INTO cryptos (
        coin_id, name, symbol, cmc_rank,
        price, volume_24h, percent_change_24h, market_cap,
        last_updated
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(coin_id) DO UPDATE SET
        name = excluded.name,
        symbol = excluded.symbol,
        cmc_rank = excluded.cmc_rank,
        price = excluded.price,
        volume_24h = excluded.volume_24h,
        percent_change_24h = excluded.percent_change_24h,
        market_cap = excluded.market_cap,
        last_updated = excluded.last_updated
"#;

/// Durable copy of the latest snapshot, keyed by upstream coin id.
///
/// Only the refresh pipeline writes here. Every write is one transaction: it either lands
/// in full or is rolled back when the transaction is dropped uncommitted.
#[derive(Debug, Clone)]
pub struct CryptoStore {
    pool: SqlitePool,
}

impl CryptoStore {
    /// Open (creating if needed) the SQLite file at `db_path` and run migrations.
    pub async fn connect(db_path: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database. The pool is pinned to one connection that never
    /// expires, since each SQLite memory connection is its own database.
    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn persist(&self, records: &[Crypto], policy: PersistPolicy) -> Result<()> {
        match policy {
            PersistPolicy::Upsert => self.upsert_all(records).await,
            PersistPolicy::Replace => self.replace_all(records).await,
        }
    }

    /// Insert each record, or overwrite every mutable column and `last_updated` when the
    /// coin id already exists. Rows absent from `records` are left as they are.
    pub async fn upsert_all(&self, records: &[Crypto]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for c in records {
            bind_crypto(sqlx::query(UPSERT_SQL), c).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!(rows = records.len(), "Upserted snapshot");
        Ok(())
    }

    /// Clear the table and insert `records`, in one transaction.
    ///
    /// Readers outside the transaction's isolation could observe the emptied table, so
    /// this is only sound while the table is read through the cache alone.
    pub async fn replace_all(&self, records: &[Crypto]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cryptos").execute(&mut *tx).await?;
        for c in records {
            bind_crypto(sqlx::query(UPSERT_SQL), c).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!(rows = records.len(), "Replaced snapshot");
        Ok(())
    }

    /// All stored records, best rank first.
    pub async fn load_ranked(&self) -> Result<Vec<Crypto>> {
        let rows: Vec<CryptoRow> = sqlx::query_as(
            r#"
            SELECT coin_id, name, symbol, cmc_rank,
                   price, volume_24h, percent_change_24h, market_cap,
                   last_updated
            FROM cryptos
            ORDER BY cmc_rank ASC, coin_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Crypto::from).collect())
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cryptos")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

fn bind_crypto<'q>(
    q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    c: &'q Crypto,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    q.bind(c.id)
        .bind(c.name.as_str())
        .bind(c.symbol.as_str())
        .bind(c.rank)
        .bind(c.quote.price)
        .bind(c.quote.volume_24h)
        .bind(c.quote.percent_change_24h)
        .bind(c.quote.market_cap)
        .bind(c.last_updated)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
