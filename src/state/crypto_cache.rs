use std::cmp::Ordering;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::types::{Crypto, RankKey, Snapshot};

// ---------------------------------------------------------------------------
// CryptoCache
// ---------------------------------------------------------------------------

/// Latest snapshot, shared between the refresh pipeline (sole writer) and the API handlers.
///
/// The lock only guards an `Arc` pointer: writers build the new snapshot outside the lock
/// and swap it in, readers clone the pointer and release. A reader therefore sees one
/// cycle's data in full or the next cycle's data in full, never a mix.
#[derive(Debug, Default)]
pub struct CryptoCache {
    inner: RwLock<Arc<Snapshot>>,
}

impl CryptoCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current snapshot. Cheap: one pointer clone.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in a new snapshot and return it.
    ///
    /// `last_update` never moves backwards or repeats: if `at` is not after the previous
    /// timestamp (clock granularity, clock step) it is bumped one microsecond past it.
    pub fn replace(&self, data: Vec<Crypto>, at: DateTime<Utc>) -> Arc<Snapshot> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let last_update = match guard.last_update {
            Some(prev) if at <= prev => prev + Duration::microseconds(1),
            _ => at,
        };
        let next = Arc::new(Snapshot {
            last_update: Some(last_update),
            data,
        });
        *guard = Arc::clone(&next);
        next
    }

    /// The timestamp `replace(_, now)` would assign. Lets the writer stamp records with
    /// the same instant the snapshot will carry.
    pub fn next_update_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_update() {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        }
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.snapshot().last_update
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.snapshot().data.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole cache, in the order the source returned it.
    pub fn all(&self) -> Arc<Snapshot> {
        self.snapshot()
    }

    /// The `n` best entries by `key`, taken from a single snapshot.
    /// Returns the snapshot timestamp alongside so callers report a consistent pair.
    pub fn top_n(&self, n: usize, key: RankKey) -> (Option<DateTime<Utc>>, Vec<Crypto>) {
        let snap = self.snapshot();
        (snap.last_update, rank(&snap.data, n, key))
    }
}

/// Stable sort by `key`, truncated to `n`. Equal keys keep source order.
pub fn rank(data: &[Crypto], n: usize, key: RankKey) -> Vec<Crypto> {
    let mut ranked: Vec<&Crypto> = data.iter().collect();
    match key {
        RankKey::Rank => ranked.sort_by_key(|c| c.rank),
        RankKey::MarketCap => ranked.sort_by(|a, b| desc(a.quote.market_cap, b.quote.market_cap)),
        RankKey::Price => ranked.sort_by(|a, b| desc(a.quote.price, b.quote.price)),
        RankKey::Volume24h => ranked.sort_by(|a, b| desc(a.quote.volume_24h, b.quote.volume_24h)),
        RankKey::PercentChange24h => {
            ranked.sort_by(|a, b| desc(a.quote.percent_change_24h, b.quote.percent_change_24h))
        }
    }
    ranked.into_iter().take(n).cloned().collect()
}

fn desc(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Quote;

    fn coin(id: i64, rank: i64, market_cap: f64) -> Crypto {
        Crypto {
            id,
            name: format!("coin{id}"),
            symbol: format!("C{id}"),
            rank,
            quote: Quote {
                price: 1.0,
                volume_24h: 0.0,
                percent_change_24h: 0.0,
                market_cap,
            },
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn starts_empty_without_timestamp() {
        let cache = CryptoCache::new();
        assert!(cache.is_empty());
        assert!(cache.last_update().is_none());
    }

    #[test]
    fn top_two_by_market_cap() {
        let cache = CryptoCache::new();
        cache.replace(
            vec![coin(1, 2, 500.0), coin(2, 3, 100.0), coin(3, 1, 900.0)],
            Utc::now(),
        );

        let (_, top) = cache.top_n(2, RankKey::MarketCap);
        let caps: Vec<f64> = top.iter().map(|c| c.quote.market_cap).collect();
        assert_eq!(caps, vec![900.0, 500.0]);
    }

    #[test]
    fn ties_keep_source_order() {
        let data = vec![
            coin(10, 1, 100.0),
            coin(11, 2, 300.0),
            coin(12, 3, 100.0),
            coin(13, 4, 100.0),
        ];
        let ranked = rank(&data, 10, RankKey::MarketCap);
        let ids: Vec<i64> = ranked.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![11, 10, 12, 13]);
    }

    #[test]
    fn rank_key_sorts_ascending() {
        let data = vec![coin(1, 3, 0.0), coin(2, 1, 0.0), coin(3, 2, 0.0)];
        let ranked = rank(&data, 3, RankKey::Rank);
        let ranks: Vec<i64> = ranked.iter().map(|c| c.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn top_n_larger_than_cache_returns_everything() {
        let cache = CryptoCache::new();
        cache.replace(vec![coin(1, 1, 1.0)], Utc::now());
        assert_eq!(cache.top_n(50, RankKey::MarketCap).1.len(), 1);
    }

    #[test]
    fn all_keeps_source_order() {
        let cache = CryptoCache::new();
        cache.replace(vec![coin(1, 2, 1.0), coin(2, 1, 9.0)], Utc::now());
        let ids: Vec<i64> = cache.all().data.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn last_update_strictly_increases_even_for_equal_timestamps() {
        let cache = CryptoCache::new();
        let at = Utc::now();
        let earlier = at - Duration::seconds(5);
        let first = cache.replace(vec![coin(1, 1, 1.0)], at).last_update;
        let second = cache.replace(vec![coin(1, 1, 2.0)], at).last_update;
        let third = cache.replace(vec![coin(1, 1, 3.0)], earlier).last_update;
        assert!(second > first);
        assert!(third > second);

        let next = third.unwrap() + Duration::microseconds(1);
        assert_eq!(cache.next_update_time(at), next);
    }

    #[test]
    fn readers_holding_an_old_snapshot_are_unaffected_by_a_swap() {
        let cache = CryptoCache::new();
        cache.replace(vec![coin(1, 1, 1.0), coin(2, 2, 2.0)], Utc::now());
        let held = cache.snapshot();

        cache.replace(vec![coin(3, 1, 3.0)], Utc::now());

        assert_eq!(held.data.len(), 2);
        assert_eq!(cache.snapshot().data.len(), 1);
        assert_eq!(cache.snapshot().data[0].id, 3);
    }
}
