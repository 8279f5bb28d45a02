//! Scanner configuration and state types.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::checkpoint::DEFAULT_INITIAL_OFFSET;
use crate::decoder::{CTF_EXCHANGE, NEG_RISK_EXCHANGE, ORDER_FILLED_TOPIC};
use crate::error::IndexerError;

/// Configuration for a scanner instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Exchange contracts whose `OrderFilled` logs are ingested.
    pub exchanges: Vec<Address>,
    /// Event signature hash to filter on.
    pub topic0: B256,
    /// Maximum blocks per `eth_getLogs` call.
    pub batch_size: u64,
    /// Blocks behind the head a fresh store starts from.
    pub initial_offset: u64,
    /// Head polling interval in continuous mode (milliseconds). Polygon
    /// produces a block roughly every 2s; 12s amortises the RPC cost.
    pub poll_interval_ms: u64,
    /// Pause before retrying a failed batch (milliseconds).
    pub retry_delay_ms: u64,
    /// Bounded mode gives up after this many consecutive failures of one batch.
    pub max_batch_retries: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            exchanges: vec![CTF_EXCHANGE, NEG_RISK_EXCHANGE],
            topic0: ORDER_FILLED_TOPIC,
            batch_size: 1000,
            initial_offset: DEFAULT_INITIAL_OFFSET,
            poll_interval_ms: 12_000,
            retry_delay_ms: 5_000,
            max_batch_retries: 3,
        }
    }
}

impl ScannerConfig {
    /// Reject configurations that cannot scan at all.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.batch_size == 0 {
            return Err(IndexerError::Config("batch_size must be at least 1".into()));
        }
        if self.exchanges.is_empty() {
            return Err(IndexerError::Config("no exchange addresses configured".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(IndexerError::Config("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Runtime state of the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScannerState {
    /// Not yet started.
    Idle,
    /// Fetching, decoding and storing one block range.
    ScanningBatch,
    /// The last batch was stored and the checkpoint advanced.
    Committed,
    /// The last batch failed; the same range will be retried.
    BatchFailed,
    /// Caught up; waiting for the chain head to move.
    WaitingForNewBlocks,
    /// Terminated (target reached, cancelled, or retries exhausted).
    Stopped,
}

impl std::fmt::Display for ScannerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::ScanningBatch => write!(f, "scanning-batch"),
            Self::Committed => write!(f, "committed"),
            Self::BatchFailed => write!(f, "batch-failed"),
            Self::WaitingForNewBlocks => write!(f, "waiting-for-new-blocks"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = ScannerConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.exchanges.len(), 2);
        assert_eq!(cfg.initial_offset, 1000);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let cfg = ScannerConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(IndexerError::Config(_))));
    }

    #[test]
    fn state_display() {
        assert_eq!(ScannerState::WaitingForNewBlocks.to_string(), "waiting-for-new-blocks");
        assert_eq!(ScannerState::BatchFailed.to_string(), "batch-failed");
    }
}
