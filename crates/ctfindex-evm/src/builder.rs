//! Fluent builder for scanners.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ctfindex_evm::{HttpChainClient, ScannerBuilder};
//! use ctfindex_evm::client::HttpClientConfig;
//! use ctfindex_storage::InMemoryStorage;
//!
//! # fn main() -> Result<(), ctfindex_core::IndexerError> {
//! let storage = Arc::new(InMemoryStorage::new());
//! let client = HttpChainClient::new("https://polygon-rpc.com", HttpClientConfig::default())?;
//! let scanner = ScannerBuilder::new()
//!     .batch_size(500)
//!     .initial_offset(5_000)
//!     .market_lookup(storage.clone())
//!     .build(client, storage.clone(), storage)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use alloy_primitives::{Address, B256};

use ctfindex_core::checkpoint::CheckpointStore;
use ctfindex_core::enricher::{MarketEnricher, MarketLookup};
use ctfindex_core::error::IndexerError;
use ctfindex_core::indexer::ScannerConfig;
use ctfindex_core::store::TradeStore;

use crate::client::ChainClient;
use crate::scanner::IndexerScanner;

/// Fluent builder for `ScannerConfig` and `IndexerScanner`.
#[derive(Default)]
pub struct ScannerBuilder {
    config: ScannerConfig,
    lookup: Option<Arc<dyn MarketLookup>>,
}

impl ScannerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tracked exchange contracts.
    pub fn exchanges(mut self, exchanges: Vec<Address>) -> Self {
        self.config.exchanges = exchanges;
        self
    }

    pub fn topic0(mut self, topic0: B256) -> Self {
        self.config.topic0 = topic0;
        self
    }

    /// Set the number of blocks per `eth_getLogs` call.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Blocks behind the head to start from when no checkpoint exists.
    pub fn initial_offset(mut self, blocks: u64) -> Self {
        self.config.initial_offset = blocks;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn max_batch_retries(mut self, n: u32) -> Self {
        self.config.max_batch_retries = n;
        self
    }

    /// Enrich trades against this market source during ingestion.
    pub fn market_lookup(mut self, lookup: Arc<dyn MarketLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn build_config(self) -> ScannerConfig {
        self.config
    }

    /// Validate the configuration and assemble the scanner.
    pub fn build<C: ChainClient>(
        self,
        client: C,
        trades: Arc<dyn TradeStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<IndexerScanner<C>, IndexerError> {
        let enricher = self.lookup.map(MarketEnricher::new);
        IndexerScanner::new(self.config, client, trades, checkpoints, enricher)
    }
}
