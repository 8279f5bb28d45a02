//! Trade persistence seam.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{Enrichment, Trade, TradeKey};

/// Append-only trade storage, deduplicated by `(tx_hash, log_index)`.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Insert a batch in one transaction.
    ///
    /// Trades whose key already exists are ignored. Returns the number of
    /// rows actually inserted. On error nothing from the batch is visible.
    async fn insert_trades(&self, trades: &[Trade]) -> Result<u64, IndexerError>;

    async fn trade_count(&self) -> Result<u64, IndexerError>;

    /// Trades with no market attached yet, oldest first.
    async fn unenriched_trades(&self, limit: usize) -> Result<Vec<Trade>, IndexerError>;

    /// Attach market identity to a stored trade.
    ///
    /// Only fills empty enrichment fields; returns `false` if the trade is
    /// unknown or already enriched.
    async fn set_enrichment(
        &self,
        key: TradeKey,
        enrichment: &Enrichment,
    ) -> Result<bool, IndexerError>;
}
