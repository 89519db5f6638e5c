//! SQLite persistence shared by the engine and the operator CLI.
//!
//! Tables:
//! - `instances`: instance configuration and lifecycle status
//! - `candles`: closed candles per (instance, symbol, timeframe)
//! - `trades`: dispatched signals and their review outcome
//! - `instance_state`: capital, realized P&L and level per instance

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::models::{Candle, Instance, InstanceStatus, NewInstance, Side, StrategyConfig, Timeframe};
use crate::trading::CapitalState;

const PNL_UPDATE_ATTEMPTS: usize = 5;

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Raw instance row; JSON columns are decoded by [`InstanceRecord::into_instance`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstanceRecord {
    pub id: i64,
    pub name: String,
    pub exchange: String,
    pub base_currency: String,
    pub market_type: String,
    pub strategy_config: String,
    pub pairs: String,
    pub status: String,
}

impl InstanceRecord {
    pub fn status(&self) -> Result<InstanceStatus> {
        self.status.parse()
    }

    pub fn into_instance(self) -> Result<Instance> {
        let strategy: StrategyConfig = serde_json::from_str(&self.strategy_config)
            .with_context(|| format!("Bad strategy_config for instance {}", self.id))?;
        let pairs = serde_json::from_str(&self.pairs)
            .with_context(|| format!("Bad pairs for instance {}", self.id))?;

        let instance = Instance {
            id: self.id,
            market_type: self.market_type.parse()?,
            status: self.status.parse()?,
            name: self.name,
            exchange: self.exchange,
            base_currency: self.base_currency,
            pairs,
            strategy,
        };
        instance.validate()?;
        Ok(instance)
    }
}

/// Stored trade record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub id: i64,
    pub instance_id: Option<i64>,
    pub symbol: String,
    pub side: String,
    pub amount: f64,
    pub entry_price: f64,
    pub status: String,
    pub pnl: Option<f64>,
    pub timestamp: String,
    pub agent_notes: Option<String>,
}

/// A trade row to insert.
#[derive(Debug, Clone)]
pub struct NewTrade<'a> {
    pub instance_id: i64,
    pub symbol: &'a str,
    pub side: Side,
    pub amount: Decimal,
    pub entry_price: f64,
    pub status: &'a str,
    pub agent_notes: Option<&'a str>,
}

/// Persisted capital state. Decimals are stored as text.
#[derive(Debug, Clone, sqlx::FromRow)]
struct InstanceStateRow {
    id: i64,
    total_capital: String,
    current_level: String,
    realized_pnl: String,
    start_amount: String,
    updated_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredCapital {
    pub instance_id: i64,
    pub total_capital: Decimal,
    pub current_level: String,
    pub realized_pnl: Decimal,
    pub start_amount: Decimal,
    pub updated_at: String,
}

impl TryFrom<InstanceStateRow> for StoredCapital {
    type Error = anyhow::Error;

    fn try_from(row: InstanceStateRow) -> Result<Self> {
        let decimal = |s: &str| {
            Decimal::from_str(s).with_context(|| format!("Bad decimal in instance_state {}: {}", row.id, s))
        };
        Ok(Self {
            instance_id: row.id,
            total_capital: decimal(&row.total_capital)?,
            realized_pnl: decimal(&row.realized_pnl)?,
            start_amount: decimal(&row.start_amount)?,
            current_level: row.current_level,
            updated_at: row.updated_at,
        })
    }
}

impl Database {
    /// Connect (creating the file if needed) and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database. A single connection keeps one shared store.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS instances (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                exchange TEXT NOT NULL,
                base_currency TEXT NOT NULL DEFAULT 'USDT',
                market_type TEXT NOT NULL,
                strategy_config TEXT NOT NULL,
                pairs TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'ACTIVE',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                instance_id INTEGER NOT NULL,
                exchange TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (instance_id, symbol, timeframe, timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instance_id INTEGER,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                amount REAL NOT NULL,
                entry_price REAL NOT NULL,
                status TEXT NOT NULL,
                pnl REAL,
                timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                agent_notes TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS instance_state (
                id INTEGER PRIMARY KEY,
                total_capital TEXT NOT NULL,
                current_level TEXT NOT NULL,
                realized_pnl TEXT NOT NULL DEFAULT '0',
                start_amount TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_instance ON trades(instance_id, id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Instances ====================

    /// Insert a new ACTIVE instance. Returns its id.
    pub async fn insert_instance(&self, new: &NewInstance) -> Result<i64> {
        let strategy = serde_json::to_string(&new.strategy)?;
        let pairs = serde_json::to_string(&new.pairs)?;

        let result = sqlx::query(
            r#"
            INSERT INTO instances (name, exchange, base_currency, market_type, strategy_config, pairs, status)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(&new.exchange)
        .bind(&new.base_currency)
        .bind(new.market_type.as_str())
        .bind(strategy)
        .bind(pairs)
        .bind(InstanceStatus::Active.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to insert instance")?;

        Ok(result.last_insert_rowid())
    }

    /// Every instance row, including DELETED ones awaiting purge.
    pub async fn list_instance_records(&self) -> Result<Vec<InstanceRecord>> {
        sqlx::query_as::<_, InstanceRecord>("SELECT * FROM instances ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list instances")
    }

    pub async fn get_instance_record(&self, id: i64) -> Result<Option<InstanceRecord>> {
        sqlx::query_as::<_, InstanceRecord>("SELECT * FROM instances WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load instance")
    }

    /// Returns false when no such instance exists.
    pub async fn set_status(&self, id: i64, status: InstanceStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE instances SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove the instance record and its capital state permanently.
    pub async fn delete_instance(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM instance_state WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM instances WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // ==================== Candles ====================

    /// Open time of the newest stored candle for the key.
    pub async fn max_candle_timestamp(
        &self,
        instance_id: i64,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<i64>> {
        let (max,): (Option<i64>,) = sqlx::query_as(
            "SELECT MAX(timestamp) FROM candles WHERE instance_id = ? AND symbol = ? AND timeframe = ?",
        )
        .bind(instance_id)
        .bind(symbol)
        .bind(timeframe.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
    }

    /// Insert candles, ignoring rows already stored. Returns rows inserted.
    pub async fn insert_candles(
        &self,
        instance_id: i64,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<u64> {
        let tf = timeframe.to_string();
        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;
        for c in candles {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO candles
                    (instance_id, exchange, symbol, timeframe, timestamp, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(instance_id)
            .bind(exchange)
            .bind(symbol)
            .bind(&tf)
            .bind(c.timestamp)
            .bind(c.open)
            .bind(c.high)
            .bind(c.low)
            .bind(c.close)
            .bind(c.volume)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Most recent `limit` candles for the key, ascending by time.
    pub async fn recent_candles(
        &self,
        instance_id: i64,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let mut rows = sqlx::query_as::<_, Candle>(
            r#"
            SELECT timestamp, open, high, low, close, volume FROM candles
            WHERE instance_id = ? AND symbol = ? AND timeframe = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(instance_id)
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.reverse();
        Ok(rows)
    }

    /// Delete every candle owned by the instance. Returns rows removed.
    pub async fn delete_candles(&self, instance_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM candles WHERE instance_id = ?")
            .bind(instance_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[cfg(test)]
    pub async fn count_candles(&self, instance_id: i64) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM candles WHERE instance_id = ?")
            .bind(instance_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ==================== Capital ====================

    /// Full write of an instance's capital state (operator reset).
    pub async fn upsert_instance_state(&self, state: &CapitalState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instance_state (id, total_capital, current_level, realized_pnl, start_amount, updated_at)
            VALUES (?, ?, ?, ?, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                total_capital = excluded.total_capital,
                current_level = excluded.current_level,
                realized_pnl = excluded.realized_pnl,
                start_amount = excluded.start_amount,
                updated_at = datetime('now')
            "#,
        )
        .bind(state.instance_id)
        .bind(state.current_capital.to_string())
        .bind(state.current_level.name())
        .bind(state.realized_pnl.to_string())
        .bind(state.start_amount.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to save instance state")?;

        Ok(())
    }

    /// Record the engine's view of capital and level. Realized P&L is owned
    /// by the operator: an existing row is only touched while its P&L still
    /// equals the one the snapshot was computed from. Returns whether the
    /// snapshot was written.
    pub async fn save_capital_snapshot(&self, state: &CapitalState) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO instance_state (id, total_capital, current_level, realized_pnl, start_amount, updated_at)
            VALUES (?, ?, ?, ?, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                total_capital = excluded.total_capital,
                current_level = excluded.current_level,
                updated_at = datetime('now')
            WHERE instance_state.realized_pnl = excluded.realized_pnl
            "#,
        )
        .bind(state.instance_id)
        .bind(state.current_capital.to_string())
        .bind(state.current_level.name())
        .bind(state.realized_pnl.to_string())
        .bind(state.start_amount.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to save capital snapshot")?;

        Ok(result.rows_affected() > 0)
    }

    /// Add `delta` to the stored realized P&L. The write is a compare-and-swap
    /// on the value read, so concurrent writers never lose an update.
    /// Returns the new realized P&L.
    pub async fn add_realized_pnl(
        &self,
        instance_id: i64,
        start_amount: Decimal,
        delta: Decimal,
    ) -> Result<Decimal> {
        for _ in 0..PNL_UPDATE_ATTEMPTS {
            let current: Option<(String,)> =
                sqlx::query_as("SELECT realized_pnl FROM instance_state WHERE id = ?")
                    .bind(instance_id)
                    .fetch_optional(&self.pool)
                    .await?;

            let applied = match current {
                None => {
                    let result = sqlx::query(
                        r#"
                        INSERT OR IGNORE INTO instance_state (id, total_capital, current_level, realized_pnl, start_amount)
                        VALUES (?, ?, 'UNKNOWN', ?, ?)
                        "#,
                    )
                    .bind(instance_id)
                    .bind((start_amount + delta).to_string())
                    .bind(delta.to_string())
                    .bind(start_amount.to_string())
                    .execute(&self.pool)
                    .await?;
                    (result.rows_affected() == 1).then_some(delta)
                }
                Some((raw,)) => {
                    let next = Decimal::from_str(&raw)
                        .with_context(|| format!("Bad realized_pnl for instance {}: {}", instance_id, raw))?
                        + delta;
                    let result = sqlx::query(
                        r#"
                        UPDATE instance_state
                        SET realized_pnl = ?, updated_at = datetime('now')
                        WHERE id = ? AND realized_pnl = ?
                        "#,
                    )
                    .bind(next.to_string())
                    .bind(instance_id)
                    .bind(&raw)
                    .execute(&self.pool)
                    .await?;
                    (result.rows_affected() == 1).then_some(next)
                }
            };

            if let Some(total) = applied {
                return Ok(total);
            }
        }

        bail!(
            "realized P&L of instance {} kept changing, giving up after {} attempts",
            instance_id,
            PNL_UPDATE_ATTEMPTS
        )
    }

    pub async fn load_instance_state(&self, id: i64) -> Result<Option<StoredCapital>> {
        let row = sqlx::query_as::<_, InstanceStateRow>("SELECT * FROM instance_state WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(StoredCapital::try_from).transpose()
    }

    // ==================== Trades ====================

    pub async fn log_trade(&self, trade: &NewTrade<'_>) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (instance_id, symbol, side, amount, entry_price, status, agent_notes)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trade.instance_id)
        .bind(trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.amount.to_f64().unwrap_or(0.0))
        .bind(trade.entry_price)
        .bind(trade.status)
        .bind(trade.agent_notes)
        .execute(&self.pool)
        .await
        .context("Failed to log trade")?;

        Ok(result.last_insert_rowid())
    }

    /// Newest first.
    pub async fn recent_trades(&self, instance_id: i64, limit: i64) -> Result<Vec<StoredTrade>> {
        sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trades WHERE instance_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(instance_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load trades")
    }
}
