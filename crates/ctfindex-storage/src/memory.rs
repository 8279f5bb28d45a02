//! In-memory storage backend.
//!
//! Holds trades, markets and the sync checkpoint in RAM. Useful for tests and
//! short-lived runs that don't need persistence.

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{B256, U256};
use async_trait::async_trait;
use tokio::sync::RwLock;

use ctfindex_core::checkpoint::{CheckpointStore, MemoryCheckpointStore, SyncCheckpoint};
use ctfindex_core::enricher::MarketLookup;
use ctfindex_core::error::IndexerError;
use ctfindex_core::store::TradeStore;
use ctfindex_core::types::{Enrichment, Market, Trade, TradeKey};

/// In-memory ctfindex storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    trades: RwLock<BTreeMap<TradeKey, Trade>>,
    markets: RwLock<HashMap<B256, Market>>,
    checkpoint: MemoryCheckpointStore,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a market, keyed by condition id.
    pub async fn upsert_market(&self, market: Market) {
        self.markets.write().await.insert(market.condition_id, market);
    }

    pub async fn market_count(&self) -> usize {
        self.markets.read().await.len()
    }

    /// All stored trades ordered by `(tx_hash, log_index)`.
    pub async fn all_trades(&self) -> Vec<Trade> {
        self.trades.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl TradeStore for InMemoryStorage {
    async fn insert_trades(&self, trades: &[Trade]) -> Result<u64, IndexerError> {
        let mut map = self.trades.write().await;
        let mut inserted = 0;
        for trade in trades {
            if let std::collections::btree_map::Entry::Vacant(slot) = map.entry(trade.key()) {
                slot.insert(trade.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn trade_count(&self) -> Result<u64, IndexerError> {
        Ok(self.trades.read().await.len() as u64)
    }

    async fn unenriched_trades(&self, limit: usize) -> Result<Vec<Trade>, IndexerError> {
        let mut pending: Vec<Trade> = self
            .trades
            .read()
            .await
            .values()
            .filter(|t| !t.is_enriched())
            .cloned()
            .collect();
        pending.sort_by_key(|t| (t.block_number, t.log_index));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn set_enrichment(
        &self,
        key: TradeKey,
        enrichment: &Enrichment,
    ) -> Result<bool, IndexerError> {
        let mut map = self.trades.write().await;
        match map.get_mut(&key) {
            Some(trade) if !trade.is_enriched() => {
                trade.apply_enrichment(enrichment.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl MarketLookup for InMemoryStorage {
    async fn market_by_token_id(&self, token_id: U256) -> Result<Option<Market>, IndexerError> {
        Ok(self
            .markets
            .read()
            .await
            .values()
            .find(|m| m.yes_token_id == token_id || m.no_token_id == token_id)
            .cloned())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(&self) -> Result<Option<SyncCheckpoint>, IndexerError> {
        self.checkpoint.load().await
    }

    async fn save(&self, checkpoint: SyncCheckpoint) -> Result<(), IndexerError> {
        self.checkpoint.save(checkpoint).await
    }
}
