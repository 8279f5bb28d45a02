//! Shared types for the ingestion pipeline.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::ctf;
use crate::decoder;

// ─── Side / Outcome ───────────────────────────────────────────────────────────

/// Direction of a fill, seen from the order maker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Maker paid collateral for outcome shares.
    Buy,
    /// Maker sold outcome shares for collateral.
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            other => Err(format!("unknown side '{other}'")),
        }
    }
}

/// Binary market outcome a token id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => write!(f, "YES"),
            Self::No => write!(f, "NO"),
        }
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "YES" => Ok(Self::Yes),
            "NO" => Ok(Self::No),
            other => Err(format!("unknown outcome '{other}'")),
        }
    }
}

// ─── Trade ────────────────────────────────────────────────────────────────────

/// Identity of a trade: the log that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradeKey {
    pub tx_hash: B256,
    pub log_index: u64,
}

/// Market identity attached to a trade by the enricher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub market_slug: String,
    pub condition_id: B256,
    pub outcome: Outcome,
}

/// A decoded `OrderFilled` fill, denominated in collateral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub tx_hash: B256,
    pub log_index: u64,
    /// Exchange contract that emitted the event.
    pub exchange: Address,
    pub order_hash: B256,
    pub maker: Address,
    pub taker: Address,
    pub maker_asset_id: U256,
    pub taker_asset_id: U256,
    pub maker_amount: U256,
    pub taker_amount: U256,
    pub fee: U256,
    pub side: Side,
    /// The outcome token traded (the non-collateral asset id).
    pub token_id: U256,
    /// Collateral paid per outcome share.
    pub price: f64,
    /// `false` when `price` falls outside `(0, 1]`; such trades are kept but
    /// must be excluded from aggregates.
    pub price_valid: bool,
    pub block_number: u64,
    /// Unix seconds (block time when the provider reports it, ingestion time otherwise).
    pub timestamp: i64,
    pub market_slug: Option<String>,
    pub condition_id: Option<B256>,
    pub outcome: Option<Outcome>,
}

impl Trade {
    pub fn key(&self) -> TradeKey {
        TradeKey {
            tx_hash: self.tx_hash,
            log_index: self.log_index,
        }
    }

    /// Raw collateral amount moved by this fill.
    pub fn collateral_raw(&self) -> U256 {
        match self.side {
            Side::Buy => self.maker_amount,
            Side::Sell => self.taker_amount,
        }
    }

    /// Raw outcome-share amount moved by this fill.
    pub fn shares_raw(&self) -> U256 {
        match self.side {
            Side::Buy => self.taker_amount,
            Side::Sell => self.maker_amount,
        }
    }

    /// Collateral notional in whole units.
    pub fn notional(&self) -> f64 {
        decoder::collateral_amount(self.collateral_raw())
    }

    /// Re-derive the price from the raw amounts.
    ///
    /// Readers of persisted trades should use this rather than a stored
    /// price column. Returns `None` if the share amount is zero.
    pub fn recompute_price(&self) -> Option<f64> {
        decoder::price_from_amounts(self.collateral_raw(), self.shares_raw())
    }

    pub fn is_enriched(&self) -> bool {
        self.market_slug.is_some()
    }

    pub fn apply_enrichment(&mut self, enrichment: Enrichment) {
        self.market_slug = Some(enrichment.market_slug);
        self.condition_id = Some(enrichment.condition_id);
        self.outcome = Some(enrichment.outcome);
    }
}

// ─── Market ───────────────────────────────────────────────────────────────────

/// A binary market's identity, maintained by the metadata-sync process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub condition_id: B256,
    pub slug: String,
    pub yes_token_id: U256,
    pub no_token_id: U256,
    pub oracle: Address,
    pub collateral_token: Address,
}

impl Market {
    /// Build a market whose token ids are derived from its condition.
    pub fn derive(
        condition_id: B256,
        slug: impl Into<String>,
        oracle: Address,
        collateral_token: Address,
    ) -> Self {
        let positions = ctf::derive_binary_positions(collateral_token, condition_id);
        Self {
            condition_id,
            slug: slug.into(),
            yes_token_id: positions.position_yes,
            no_token_id: positions.position_no,
            oracle,
            collateral_token,
        }
    }

    /// Which side of this market `token_id` represents, if any.
    pub fn outcome_of(&self, token_id: U256) -> Option<Outcome> {
        if token_id == self.yes_token_id {
            Some(Outcome::Yes)
        } else if token_id == self.no_token_id {
            Some(Outcome::No)
        } else {
            None
        }
    }
}

// ─── RawLog ───────────────────────────────────────────────────────────────────

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    /// Some providers include the block timestamp in log responses.
    #[serde(rename = "blockTimestamp", default, skip_serializing_if = "Option::is_none")]
    pub block_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Option<u64> {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u64(&self) -> Option<u64> {
        parse_hex_u64(&self.log_index)
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.block_timestamp
            .as_deref()
            .and_then(parse_hex_u64)
            .map(|t| t as i64)
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// Decode the `data` field into bytes.
    pub fn data_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(strip_0x(&self.data))
    }
}

/// Parse a hex-encoded quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = strip_0x(s);
    if s.is_empty() {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

/// Encode a quantity the way JSON-RPC expects (`0x`-prefixed, no leading zeros).
pub fn to_hex_quantity(n: u64) -> String {
    format!("0x{n:x}")
}

/// `0x`-prefixed lowercase hex of raw bytes.
pub fn to_hex_0x(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
