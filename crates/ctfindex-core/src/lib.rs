//! ctfindex-core: trade ingestion primitives for the conditional-token exchanges.
//!
//! # Architecture
//!
//! ```text
//! ScannerBuilder → IndexerScanner
//!                      ├── ChainClient        (eth_blockNumber / eth_getLogs)
//!                      ├── TradeLogDecoder    (OrderFilled → Trade)
//!                      ├── MarketEnricher     (token id → market identity)
//!                      ├── TradeStore         (atomic, deduplicated batch insert)
//!                      └── CheckpointManager  (resume point, advanced after commit)
//! ```
//!
//! The chain client and scanner live in `ctfindex-evm`; storage backends in
//! `ctfindex-storage`.

pub mod checkpoint;
pub mod ctf;
pub mod decoder;
pub mod enricher;
pub mod error;
pub mod indexer;
pub mod retry;
pub mod store;
pub mod types;

pub use checkpoint::{CheckpointManager, CheckpointStore, SyncCheckpoint};
pub use ctf::BinaryPositions;
pub use decoder::{DecodedBatch, TradeLogDecoder};
pub use enricher::{BackfillReport, MarketEnricher, MarketLookup};
pub use error::{DecodeError, IndexerError};
pub use indexer::{ScannerConfig, ScannerState};
pub use retry::{RetryConfig, RetryPolicy};
pub use store::TradeStore;
pub use types::{Enrichment, Market, Outcome, RawLog, Side, Trade, TradeKey};
