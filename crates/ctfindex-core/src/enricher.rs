//! Best-effort market enrichment.
//!
//! Attaches slug, condition id and outcome to a trade by looking up its token
//! id among known markets. A miss or a failing lookup leaves the trade
//! unenriched; enrichment never fails ingestion.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::Serialize;

use crate::error::IndexerError;
use crate::store::TradeStore;
use crate::types::{Enrichment, Market, Outcome, Trade};

/// Read access to market metadata maintained by the metadata-sync process.
#[async_trait]
pub trait MarketLookup: Send + Sync {
    /// The market whose YES or NO token id equals `token_id`.
    async fn market_by_token_id(&self, token_id: U256) -> Result<Option<Market>, IndexerError>;
}

/// Result of an out-of-band enrichment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub scanned: usize,
    pub enriched: usize,
    pub unmatched: usize,
}

pub struct MarketEnricher {
    lookup: Arc<dyn MarketLookup>,
}

impl MarketEnricher {
    pub fn new(lookup: Arc<dyn MarketLookup>) -> Self {
        Self { lookup }
    }

    /// Enrichment for `token_id`, or `None` if no market matches.
    async fn resolve(&self, token_id: U256) -> Option<Enrichment> {
        match self.lookup.market_by_token_id(token_id).await {
            Ok(Some(market)) => Some(enrichment_for(&market, token_id)),
            Ok(None) => {
                tracing::debug!(%token_id, "No market for token id");
                None
            }
            Err(e) => {
                tracing::warn!(
                    %token_id,
                    error = %e,
                    "Market lookup failed; trade left unenriched"
                );
                None
            }
        }
    }

    async fn resolve_cached(
        &self,
        cache: &mut HashMap<U256, Option<Enrichment>>,
        token_id: U256,
    ) -> Option<Enrichment> {
        if let Some(hit) = cache.get(&token_id) {
            return hit.clone();
        }
        let resolved = self.resolve(token_id).await;
        cache.insert(token_id, resolved.clone());
        resolved
    }

    pub async fn enrich(&self, mut trade: Trade) -> Trade {
        if trade.is_enriched() {
            return trade;
        }
        if let Some(enrichment) = self.resolve(trade.token_id).await {
            trade.apply_enrichment(enrichment);
        }
        trade
    }

    /// Enrich a batch, resolving each distinct token id once.
    pub async fn enrich_batch(&self, trades: Vec<Trade>) -> Vec<Trade> {
        let mut cache: HashMap<U256, Option<Enrichment>> = HashMap::new();
        let mut out = Vec::with_capacity(trades.len());
        for mut trade in trades {
            if !trade.is_enriched() {
                if let Some(enrichment) = self.resolve_cached(&mut cache, trade.token_id).await {
                    trade.apply_enrichment(enrichment);
                }
            }
            out.push(trade);
        }
        out
    }

    /// Enrich up to `limit` stored trades whose market fields are still empty.
    pub async fn backfill(
        &self,
        store: &dyn TradeStore,
        limit: usize,
    ) -> Result<BackfillReport, IndexerError> {
        let pending = store.unenriched_trades(limit).await?;
        let mut report = BackfillReport {
            scanned: pending.len(),
            ..Default::default()
        };

        let mut cache: HashMap<U256, Option<Enrichment>> = HashMap::new();
        for trade in &pending {
            match self.resolve_cached(&mut cache, trade.token_id).await {
                Some(e) => {
                    if store.set_enrichment(trade.key(), &e).await? {
                        report.enriched += 1;
                    }
                }
                None => report.unmatched += 1,
            }
        }

        tracing::info!(
            scanned = report.scanned,
            enriched = report.enriched,
            unmatched = report.unmatched,
            "Enrichment backfill complete"
        );
        Ok(report)
    }
}

/// The lookup only returns markets holding `token_id`, so anything that is
/// not the YES token is the NO token.
fn enrichment_for(market: &Market, token_id: U256) -> Enrichment {
    Enrichment {
        market_slug: market.slug.clone(),
        condition_id: market.condition_id,
        outcome: market.outcome_of(token_id).unwrap_or(Outcome::No),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctf::USDC_E;
    use crate::decoder::tests::{buy_fill, order_filled_log};
    use crate::decoder::{TradeLogDecoder, CTF_EXCHANGE};
    use alloy_primitives::{Address, B256};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticMarkets {
        markets: Vec<Market>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketLookup for StaticMarkets {
        async fn market_by_token_id(&self, token_id: U256) -> Result<Option<Market>, IndexerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .markets
                .iter()
                .find(|m| m.yes_token_id == token_id || m.no_token_id == token_id)
                .cloned())
        }
    }

    struct BrokenLookup;

    #[async_trait]
    impl MarketLookup for BrokenLookup {
        async fn market_by_token_id(&self, _: U256) -> Result<Option<Market>, IndexerError> {
            Err(IndexerError::Storage("markets table locked".into()))
        }
    }

    fn market() -> Market {
        Market::derive(B256::repeat_byte(0xaa), "will-it-rain", Address::ZERO, USDC_E)
    }

    fn trade_for(token_id: U256) -> Trade {
        let log = order_filled_log(CTF_EXCHANGE, &buy_fill(1, 500_000, 1_000_000), 1, 0x11, 0);
        let mut trade = TradeLogDecoder::polymarket().decode(&log, 0).unwrap();
        trade.token_id = token_id;
        trade.taker_asset_id = token_id;
        trade
    }

    #[tokio::test]
    async fn attaches_market_identity() {
        let m = market();
        let enricher = MarketEnricher::new(Arc::new(StaticMarkets {
            markets: vec![m.clone()],
            calls: AtomicUsize::new(0),
        }));

        let yes = enricher.enrich(trade_for(m.yes_token_id)).await;
        assert_eq!(yes.market_slug.as_deref(), Some("will-it-rain"));
        assert_eq!(yes.condition_id, Some(m.condition_id));
        assert_eq!(yes.outcome, Some(Outcome::Yes));

        let no = enricher.enrich(trade_for(m.no_token_id)).await;
        assert_eq!(no.outcome, Some(Outcome::No));
    }

    #[tokio::test]
    async fn miss_and_failure_leave_trade_unchanged() {
        let miss = MarketEnricher::new(Arc::new(StaticMarkets {
            markets: vec![],
            calls: AtomicUsize::new(0),
        }));
        let trade = trade_for(U256::from(5u64));
        assert_eq!(miss.enrich(trade.clone()).await, trade);

        let broken = MarketEnricher::new(Arc::new(BrokenLookup));
        assert_eq!(broken.enrich(trade.clone()).await, trade);
    }

    #[tokio::test]
    async fn batch_looks_up_each_token_once() {
        let m = market();
        let lookup = Arc::new(StaticMarkets {
            markets: vec![m.clone()],
            calls: AtomicUsize::new(0),
        });
        let enricher = MarketEnricher::new(lookup.clone());

        let trades = vec![
            trade_for(m.yes_token_id),
            trade_for(m.yes_token_id),
            trade_for(m.no_token_id),
            trade_for(U256::from(9u64)),
        ];
        let out = enricher.enrich_batch(trades).await;
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 3);
        assert_eq!(out.iter().filter(|t| t.is_enriched()).count(), 3);
    }
}
