//! SQLite storage backend.
//!
//! Persists trades, markets and the sync checkpoint to a single SQLite file.
//! WAL mode lets status readers run while the scanner writes. Each
//! `insert_trades` call is one transaction.
//!
//! U256 values (asset ids, amounts) are stored as decimal strings, the
//! protocol's public token-id notation; addresses and hashes as `0x`-prefixed
//! lowercase hex.
//!
//! # Usage
//! ```rust,no_run
//! use ctfindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./ctfindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use ctfindex_core::checkpoint::{CheckpointStore, SyncCheckpoint};
use ctfindex_core::enricher::MarketLookup;
use ctfindex_core::error::IndexerError;
use ctfindex_core::store::TradeStore;
use ctfindex_core::types::{to_hex_0x, Enrichment, Market, Outcome, Side, Trade, TradeKey};

const TRADE_COLUMNS: &str = "tx_hash, log_index, exchange, order_hash, maker, taker, \
     maker_asset_id, taker_asset_id, maker_amount, taker_amount, fee, side, token_id, \
     price, price_valid, block_number, timestamp, market_slug, condition_id, outcome";

/// SQLite-backed storage for trades, markets and sync state.
pub struct SqliteStorage {
    pool: SqlitePool,
}

fn db_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./ctfindex.db"`) or a full
    /// SQLite URL (`"sqlite:./ctfindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection to `:memory:` is its own database, so the pool holds
    /// exactly one.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trades (
                tx_hash        TEXT    NOT NULL,
                log_index      INTEGER NOT NULL,
                exchange       TEXT    NOT NULL,
                order_hash     TEXT    NOT NULL,
                maker          TEXT    NOT NULL,
                taker          TEXT    NOT NULL,
                maker_asset_id TEXT    NOT NULL,
                taker_asset_id TEXT    NOT NULL,
                maker_amount   TEXT    NOT NULL,
                taker_amount   TEXT    NOT NULL,
                fee            TEXT    NOT NULL,
                side           TEXT    NOT NULL,
                token_id       TEXT    NOT NULL,
                price          REAL    NOT NULL,
                price_valid    INTEGER NOT NULL,
                block_number   INTEGER NOT NULL,
                timestamp      INTEGER NOT NULL,
                market_slug    TEXT,
                condition_id   TEXT,
                outcome        TEXT,
                UNIQUE (tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS markets (
                condition_id     TEXT    PRIMARY KEY,
                slug             TEXT    NOT NULL,
                yes_token_id     TEXT    NOT NULL,
                no_token_id      TEXT    NOT NULL,
                oracle           TEXT    NOT NULL,
                collateral_token TEXT    NOT NULL,
                updated_at       INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_state (
                id           INTEGER PRIMARY KEY CHECK (id = 1),
                last_block   INTEGER NOT NULL,
                total_trades INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_trades_token ON trades (token_id);",
            "CREATE INDEX IF NOT EXISTS idx_trades_block ON trades (block_number);",
            "CREATE INDEX IF NOT EXISTS idx_trades_maker ON trades (maker);",
            "CREATE INDEX IF NOT EXISTS idx_trades_taker ON trades (taker);",
            "CREATE INDEX IF NOT EXISTS idx_trades_unenriched ON trades (block_number)
             WHERE market_slug IS NULL;",
            "CREATE INDEX IF NOT EXISTS idx_markets_yes ON markets (yes_token_id);",
            "CREATE INDEX IF NOT EXISTS idx_markets_no ON markets (no_token_id);",
        ] {
            sqlx::query(ddl).execute(&self.pool).await.map_err(db_err)?;
        }

        Ok(())
    }

    // ─── Markets ─────────────────────────────────────────────────────────────────

    /// Insert or replace a market, keyed by condition id.
    pub async fn upsert_market(&self, market: &Market) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO markets
             (condition_id, slug, yes_token_id, no_token_id, oracle, collateral_token, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (condition_id) DO UPDATE SET
                slug = excluded.slug,
                yes_token_id = excluded.yes_token_id,
                no_token_id = excluded.no_token_id,
                oracle = excluded.oracle,
                collateral_token = excluded.collateral_token,
                updated_at = excluded.updated_at",
        )
        .bind(to_hex_0x(market.condition_id.as_slice()))
        .bind(&market.slug)
        .bind(market.yes_token_id.to_string())
        .bind(market.no_token_id.to_string())
        .bind(to_hex_0x(market.oracle.as_slice()))
        .bind(to_hex_0x(market.collateral_token.as_slice()))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(slug = %market.slug, condition_id = %market.condition_id, "market upserted");
        Ok(())
    }

    pub async fn market_count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM markets")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    // ─── Trade queries ──────────────────────────────────────────────────────────

    /// Trades of one outcome token, oldest first.
    pub async fn trades_by_token(
        &self,
        token_id: U256,
        limit: usize,
    ) -> Result<Vec<Trade>, IndexerError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE token_id = ?
             ORDER BY block_number, log_index LIMIT ?"
        ))
        .bind(token_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_trade).collect()
    }
}

// ─── Row conversion ──────────────────────────────────────────────────────────

fn parse_col<T: FromStr>(row: &SqliteRow, column: &str) -> Result<T, IndexerError>
where
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column).map_err(db_err)?;
    raw.parse::<T>()
        .map_err(|e| bad_value(column, &raw, e))
}

fn parse_opt_col<T: FromStr>(row: &SqliteRow, column: &str) -> Result<Option<T>, IndexerError>
where
    T::Err: std::fmt::Display,
{
    let raw: Option<String> = row.try_get(column).map_err(db_err)?;
    raw.map(|s| {
        s.parse::<T>().map_err(|e| bad_value(column, &s, e))
    })
    .transpose()
}

/// Build a trade from a row. The price is re-derived from the stored amounts
/// rather than read from the `price` column.
fn bad_value(column: &str, raw: &str, e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(format!("bad value in column {column} ('{raw}'): {e}"))
}

fn row_to_trade(row: &SqliteRow) -> Result<Trade, IndexerError> {
    let mut trade = Trade {
        tx_hash: parse_col::<B256>(row, "tx_hash")?,
        log_index: row.try_get::<i64, _>("log_index").map_err(db_err)? as u64,
        exchange: parse_col::<Address>(row, "exchange")?,
        order_hash: parse_col::<B256>(row, "order_hash")?,
        maker: parse_col::<Address>(row, "maker")?,
        taker: parse_col::<Address>(row, "taker")?,
        maker_asset_id: parse_col::<U256>(row, "maker_asset_id")?,
        taker_asset_id: parse_col::<U256>(row, "taker_asset_id")?,
        maker_amount: parse_col::<U256>(row, "maker_amount")?,
        taker_amount: parse_col::<U256>(row, "taker_amount")?,
        fee: parse_col::<U256>(row, "fee")?,
        side: parse_col::<Side>(row, "side")?,
        token_id: parse_col::<U256>(row, "token_id")?,
        price: row.try_get("price").map_err(db_err)?,
        price_valid: row.try_get("price_valid").map_err(db_err)?,
        block_number: row.try_get::<i64, _>("block_number").map_err(db_err)? as u64,
        timestamp: row.try_get("timestamp").map_err(db_err)?,
        market_slug: row.try_get("market_slug").map_err(db_err)?,
        condition_id: parse_opt_col::<B256>(row, "condition_id")?,
        outcome: parse_opt_col::<Outcome>(row, "outcome")?,
    };
    if let Some(price) = trade.recompute_price() {
        trade.price = price;
    }
    Ok(trade)
}

fn row_to_market(row: &SqliteRow) -> Result<Market, IndexerError> {
    Ok(Market {
        condition_id: parse_col::<B256>(row, "condition_id")?,
        slug: row.try_get("slug").map_err(db_err)?,
        yes_token_id: parse_col::<U256>(row, "yes_token_id")?,
        no_token_id: parse_col::<U256>(row, "no_token_id")?,
        oracle: parse_col::<Address>(row, "oracle")?,
        collateral_token: parse_col::<Address>(row, "collateral_token")?,
    })
}

// ─── TradeStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl TradeStore for SqliteStorage {
    async fn insert_trades(&self, trades: &[Trade]) -> Result<u64, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut inserted = 0u64;

        for t in trades {
            let result = sqlx::query(&format!(
                "INSERT OR IGNORE INTO trades ({TRADE_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(to_hex_0x(t.tx_hash.as_slice()))
            .bind(t.log_index as i64)
            .bind(to_hex_0x(t.exchange.as_slice()))
            .bind(to_hex_0x(t.order_hash.as_slice()))
            .bind(to_hex_0x(t.maker.as_slice()))
            .bind(to_hex_0x(t.taker.as_slice()))
            .bind(t.maker_asset_id.to_string())
            .bind(t.taker_asset_id.to_string())
            .bind(t.maker_amount.to_string())
            .bind(t.taker_amount.to_string())
            .bind(t.fee.to_string())
            .bind(t.side.to_string())
            .bind(t.token_id.to_string())
            .bind(t.price)
            .bind(t.price_valid)
            .bind(t.block_number as i64)
            .bind(t.timestamp)
            .bind(t.market_slug.as_deref())
            .bind(t.condition_id.map(|c| to_hex_0x(c.as_slice())))
            .bind(t.outcome.map(|o| o.to_string()))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(db_err)?;
        debug!(batch = trades.len(), inserted, "trades stored");
        Ok(inserted)
    }

    async fn trade_count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM trades")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    async fn unenriched_trades(&self, limit: usize) -> Result<Vec<Trade>, IndexerError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE market_slug IS NULL
             ORDER BY block_number, log_index LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_trade).collect()
    }

    async fn set_enrichment(
        &self,
        key: TradeKey,
        enrichment: &Enrichment,
    ) -> Result<bool, IndexerError> {
        let result = sqlx::query(
            "UPDATE trades SET market_slug = ?, condition_id = ?, outcome = ?
             WHERE tx_hash = ? AND log_index = ? AND market_slug IS NULL",
        )
        .bind(&enrichment.market_slug)
        .bind(to_hex_0x(enrichment.condition_id.as_slice()))
        .bind(enrichment.outcome.to_string())
        .bind(to_hex_0x(key.tx_hash.as_slice()))
        .bind(key.log_index as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }
}

// ─── MarketLookup impl ───────────────────────────────────────────────────────

#[async_trait]
impl MarketLookup for SqliteStorage {
    async fn market_by_token_id(&self, token_id: U256) -> Result<Option<Market>, IndexerError> {
        let id = token_id.to_string();
        let row = sqlx::query(
            "SELECT condition_id, slug, yes_token_id, no_token_id, oracle, collateral_token
             FROM markets WHERE yes_token_id = ? OR no_token_id = ? LIMIT 1",
        )
        .bind(&id)
        .bind(&id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_market).transpose()
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(&self) -> Result<Option<SyncCheckpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT last_block, total_trades, updated_at FROM sync_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| SyncCheckpoint {
            last_block: r.get::<i64, _>("last_block") as u64,
            total_trades: r.get::<i64, _>("total_trades") as u64,
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save(&self, checkpoint: SyncCheckpoint) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO sync_state (id, last_block, total_trades, updated_at)
             VALUES (1, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                last_block = excluded.last_block,
                total_trades = excluded.total_trades,
                updated_at = excluded.updated_at",
        )
        .bind(checkpoint.last_block as i64)
        .bind(checkpoint.total_trades as i64)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(
            last_block = checkpoint.last_block,
            total_trades = checkpoint.total_trades,
            "checkpoint saved"
        );
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
