//! Error types for the ctfindex pipeline.

use thiserror::Error;

/// Errors that can occur while scanning, storing, or configuring the indexer.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The chain endpoint was unreachable or timed out.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    /// Missing or invalid configuration, detected before scanning starts.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checkpoint regression: stored block {current}, attempted {attempted}")]
    CheckpointRegression { current: u64, attempted: u64 },

    #[error("Scanner aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` for transient failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    /// Returns `true` if the error happened while persisting data.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Per-record failures of the `OrderFilled` decoder.
///
/// None of these fail a batch: the scanner logs the record and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("log emitted by untracked contract {0}")]
    UnexpectedSource(String),

    #[error("unexpected topic0 {0}")]
    UnexpectedTopic(String),

    #[error("payload is {actual} bytes, expected 224 or 256")]
    PayloadLength { actual: usize },

    /// Neither asset id is the collateral sentinel (e.g. a share-for-share fill).
    #[error("neither asset id is collateral")]
    NotCollateralTrade,

    #[error("both asset ids are collateral")]
    BothCollateral,

    #[error("{0} amount is zero")]
    ZeroAmount(&'static str),

    #[error("malformed field '{field}': {reason}")]
    MalformedField { field: &'static str, reason: String },
}

impl DecodeError {
    /// Expected occurrences (non-collateral transfers) rather than anomalies.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::NotCollateralTrade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connectivity_is_transient() {
        assert!(IndexerError::Connectivity("timeout".into()).is_transient());
        assert!(!IndexerError::Storage("disk full".into()).is_transient());
        assert!(!IndexerError::Rpc { code: -32000, message: "bad".into() }.is_transient());
    }

    #[test]
    fn non_collateral_is_expected() {
        assert!(DecodeError::NotCollateralTrade.is_expected());
        assert!(!DecodeError::BothCollateral.is_expected());
        assert!(!DecodeError::PayloadLength { actual: 10 }.is_expected());
    }
}
