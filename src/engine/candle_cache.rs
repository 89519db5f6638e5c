//! Incremental store of closed candles per (instance, symbol, timeframe).

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::db::Database;
use crate::market::MarketDataClient;
use crate::models::{Candle, Timeframe};

/// Fetches only candles newer than what is stored and never persists a
/// candle whose close (plus the settle buffer) is still in the future.
#[derive(Clone)]
pub struct CandleCache {
    db: Database,
    buffer: chrono::Duration,
}

impl CandleCache {
    pub fn new(db: Database, buffer: chrono::Duration) -> Self {
        Self { db, buffer }
    }

    /// Sync as of `now`, then return the newest `limit` stored candles
    /// ascending. An upstream failure falls back to what is cached.
    pub async fn sync_at(
        &self,
        client: &dyn MarketDataClient,
        instance_id: i64,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let last = self
            .db
            .max_candle_timestamp(instance_id, symbol, timeframe)
            .await?;
        let since = last.map(|ts| ts + 1);

        match client.fetch_ohlcv(symbol, timeframe, since, limit).await {
            Ok(rows) => {
                let cutoff = (now - self.buffer).timestamp_millis();
                let mut closed: Vec<Candle> = rows
                    .into_iter()
                    .filter(|c| since.map_or(true, |s| c.timestamp >= s))
                    .filter(|c| c.is_closed_by(timeframe, cutoff))
                    .collect();
                closed.sort_by_key(|c| c.timestamp);
                closed.dedup_by_key(|c| c.timestamp);

                if !closed.is_empty() {
                    let inserted = self
                        .db
                        .insert_candles(instance_id, client.exchange(), symbol, timeframe, &closed)
                        .await?;
                    debug!(
                        instance_id,
                        symbol,
                        timeframe = %timeframe,
                        inserted,
                        "Stored closed candles"
                    );
                }
            }
            Err(e) => {
                warn!(
                    instance_id,
                    symbol,
                    timeframe = %timeframe,
                    error = %e,
                    "Candle fetch failed, using cached series"
                );
            }
        }

        self.db
            .recent_candles(instance_id, symbol, timeframe, limit)
            .await
    }

    /// Remove every candle the instance owns.
    pub async fn purge_instance(&self, instance_id: i64) -> Result<u64> {
        self.db.delete_candles(instance_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{series, MockMarket};
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;

    const HOUR_MS: i64 = 3_600_000;

    async fn setup() -> (CandleCache, Database, MockMarket) {
        let db = Database::in_memory().await.unwrap();
        let cache = CandleCache::new(db.clone(), chrono::Duration::seconds(5));
        (cache, db, MockMarket::default())
    }

    fn tf() -> Timeframe {
        "1h".parse().unwrap()
    }

    #[tokio::test]
    async fn test_open_candle_is_never_persisted() {
        let (cache, _db, market) = setup().await;
        // Opens at 00:00..=03:00; the 03:00 bar closes at 04:00
        market.set("BTC/USDT", "1h", series(0, "1h", &[1.0, 2.0, 3.0, 4.0]));

        // 04:00:03 is inside the settle buffer of the 03:00 bar
        let now = Utc.timestamp_millis_opt(4 * HOUR_MS + 3_000).unwrap();
        let rows = cache.sync_at(&market, 1, "BTC/USDT", tf(), 500, now).await.unwrap();
        assert_eq!(rows.len(), 3);
        let cutoff = now.timestamp_millis() - 5_000;
        assert!(rows.iter().all(|c| c.close_time_ms(tf()) <= cutoff));

        // Once the buffer passes the bar is picked up incrementally
        let later = Utc.timestamp_millis_opt(4 * HOUR_MS + 5_000).unwrap();
        let rows = cache.sync_at(&market, 1, "BTC/USDT", tf(), 500, later).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows.last().unwrap().close, 4.0);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let (cache, db, market) = setup().await;
        market.set("BTC/USDT", "1h", series(0, "1h", &[1.0, 2.0, 3.0]));
        let now = Utc.timestamp_millis_opt(10 * HOUR_MS).unwrap();

        let first = cache.sync_at(&market, 1, "BTC/USDT", tf(), 500, now).await.unwrap();
        let second = cache.sync_at(&market, 1, "BTC/USDT", tf(), 500, now).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(db.count_candles(1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_returns_latest_limit_ascending() {
        let (cache, _db, market) = setup().await;
        market.set("BTC/USDT", "1h", series(0, "1h", &[1.0, 2.0, 3.0, 4.0, 5.0]));
        let now = Utc.timestamp_millis_opt(10 * HOUR_MS).unwrap();

        cache.sync_at(&market, 1, "BTC/USDT", tf(), 500, now).await.unwrap();
        let rows = cache.sync_at(&market, 1, "BTC/USDT", tf(), 2, now).await.unwrap();
        let closes: Vec<f64> = rows.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![4.0, 5.0]);
    }

    #[tokio::test]
    async fn test_fetch_failure_serves_cached_rows() {
        let (cache, _db, market) = setup().await;
        market.set("BTC/USDT", "1h", series(0, "1h", &[1.0, 2.0]));
        let now = Utc.timestamp_millis_opt(10 * HOUR_MS).unwrap();
        let cached = cache.sync_at(&market, 1, "BTC/USDT", tf(), 500, now).await.unwrap();

        market.fail.store(true, Ordering::SeqCst);
        let stale = cache.sync_at(&market, 1, "BTC/USDT", tf(), 500, now).await.unwrap();
        assert_eq!(stale, cached);

        // Nothing cached and nothing fetched: empty, not an error
        let empty = cache.sync_at(&market, 1, "ETH/USDT", tf(), 500, now).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_purge_only_touches_one_instance() {
        let (cache, db, market) = setup().await;
        market.set("BTC/USDT", "1h", series(0, "1h", &[1.0, 2.0]));
        let now = Utc.timestamp_millis_opt(10 * HOUR_MS).unwrap();
        cache.sync_at(&market, 1, "BTC/USDT", tf(), 500, now).await.unwrap();
        cache.sync_at(&market, 2, "BTC/USDT", tf(), 500, now).await.unwrap();

        assert_eq!(cache.purge_instance(1).await.unwrap(), 2);
        assert_eq!(db.count_candles(1).await.unwrap(), 0);
        assert_eq!(db.count_candles(2).await.unwrap(), 2);
    }
}
