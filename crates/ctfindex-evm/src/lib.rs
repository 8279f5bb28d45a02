//! ctfindex-evm: JSON-RPC chain client and the checkpointed trade scanner.

pub mod builder;
pub mod client;
pub mod scanner;

pub use builder::ScannerBuilder;
pub use client::{ChainClient, HttpChainClient};
pub use scanner::{IndexerScanner, ScanSummary};
