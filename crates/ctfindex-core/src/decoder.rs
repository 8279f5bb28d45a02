//! Byte-exact decoder for the exchange `OrderFilled` event.
//!
//! Only one event layout is ever decoded, so there is no ABI framework here:
//! the non-indexed payload is a fixed run of 32-byte big-endian words read at
//! explicit offsets after the total length has been checked.
//!
//! | word | offset | field            |
//! |------|--------|------------------|
//! | 0    | 0      | order hash       |
//! | 1    | 32     | maker            |
//! | 2    | 64     | taker            |
//! | 3    | 96     | maker asset id   |
//! | 4    | 128    | taker asset id   |
//! | 5    | 160    | maker amount     |
//! | 6    | 192    | taker amount     |
//! | 7    | 224    | fee (optional)   |

use std::str::FromStr;

use alloy_primitives::{address, b256, Address, B256, U256};

use crate::error::DecodeError;
use crate::types::{RawLog, Side, Trade};

// ─── Constants ────────────────────────────────────────────────────────────────

/// CTF Exchange on Polygon.
pub const CTF_EXCHANGE: Address = address!("4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E");
/// NegRisk CTF Exchange on Polygon.
pub const NEG_RISK_EXCHANGE: Address = address!("C5d563A36AE78145C45a50134d48A1215220f80a");

pub const ORDER_FILLED_SIGNATURE: &str =
    "OrderFilled(bytes32,address,address,uint256,uint256,uint256,uint256,uint256)";
/// `keccak256(ORDER_FILLED_SIGNATURE)`.
pub const ORDER_FILLED_TOPIC: B256 =
    b256!("d0a08e8c493f9c94f29311604c9de1b4e8c8d4c06bd0c789af57f2d65bfec0f6");

const WORD: usize = 32;

const OFFSET_ORDER_HASH: usize = 0;
const OFFSET_MAKER: usize = WORD;
const OFFSET_TAKER: usize = 2 * WORD;
const OFFSET_MAKER_ASSET_ID: usize = 3 * WORD;
const OFFSET_TAKER_ASSET_ID: usize = 4 * WORD;
const OFFSET_MAKER_AMOUNT: usize = 5 * WORD;
const OFFSET_TAKER_AMOUNT: usize = 6 * WORD;
const OFFSET_FEE: usize = 7 * WORD;

/// Payload length without the trailing fee word.
pub const MIN_PAYLOAD_LEN: usize = 7 * WORD;
/// Payload length with the fee word.
pub const FULL_PAYLOAD_LEN: usize = 8 * WORD;

/// Collateral and outcome shares both use 6 decimals.
const COLLATERAL_UNIT: u64 = 1_000_000;

/// Fixed-point scale used for price division before converting to `f64`.
const PRICE_SCALE: u64 = 1_000_000_000_000_000_000;

// ─── Payload ──────────────────────────────────────────────────────────────────

/// The decoded non-indexed fields of one `OrderFilled` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFilled {
    pub order_hash: B256,
    pub maker: Address,
    pub taker: Address,
    pub maker_asset_id: U256,
    pub taker_asset_id: U256,
    pub maker_amount: U256,
    pub taker_amount: U256,
    pub fee: U256,
}

impl OrderFilled {
    pub fn from_payload(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != MIN_PAYLOAD_LEN && data.len() != FULL_PAYLOAD_LEN {
            return Err(DecodeError::PayloadLength { actual: data.len() });
        }

        let fee = if data.len() == FULL_PAYLOAD_LEN {
            read_u256(data, OFFSET_FEE)
        } else {
            U256::ZERO
        };

        Ok(Self {
            order_hash: B256::from_slice(word(data, OFFSET_ORDER_HASH)),
            maker: read_address(data, OFFSET_MAKER, "maker")?,
            taker: read_address(data, OFFSET_TAKER, "taker")?,
            maker_asset_id: read_u256(data, OFFSET_MAKER_ASSET_ID),
            taker_asset_id: read_u256(data, OFFSET_TAKER_ASSET_ID),
            maker_amount: read_u256(data, OFFSET_MAKER_AMOUNT),
            taker_amount: read_u256(data, OFFSET_TAKER_AMOUNT),
            fee,
        })
    }
}

fn word(data: &[u8], offset: usize) -> &[u8] {
    &data[offset..offset + WORD]
}

fn read_u256(data: &[u8], offset: usize) -> U256 {
    U256::from_be_slice(word(data, offset))
}

fn read_address(data: &[u8], offset: usize, field: &'static str) -> Result<Address, DecodeError> {
    let slot = word(data, offset);
    if slot[..12].iter().any(|b| *b != 0) {
        return Err(DecodeError::MalformedField {
            field,
            reason: "non-zero padding above the 20-byte address".into(),
        });
    }
    Ok(Address::from_slice(&slot[12..]))
}

// ─── Side / price ─────────────────────────────────────────────────────────────

/// Classify a fill by which asset id is the collateral sentinel (zero).
///
/// Returns the maker's side and the outcome token traded.
pub fn infer_side(maker_asset_id: U256, taker_asset_id: U256) -> Result<(Side, U256), DecodeError> {
    match (maker_asset_id.is_zero(), taker_asset_id.is_zero()) {
        (true, true) => Err(DecodeError::BothCollateral),
        (true, false) => Ok((Side::Buy, taker_asset_id)),
        (false, true) => Ok((Side::Sell, maker_asset_id)),
        (false, false) => Err(DecodeError::NotCollateralTrade),
    }
}

/// `numerator / denominator` computed in 18-decimal fixed point on U256.
///
/// Returns `None` when the denominator is zero.
pub fn price_from_amounts(numerator: U256, denominator: U256) -> Option<f64> {
    if denominator.is_zero() {
        return None;
    }
    let scale = U256::from(PRICE_SCALE);
    let whole = numerator / denominator;
    let mut rem = numerator % denominator;
    let mut den = denominator;

    // rem < den, so rem * 1e18 only overflows for denominators above ~2^196.
    let frac = match rem.checked_mul(scale) {
        Some(scaled) => scaled / den,
        None => {
            let shift = den.bit_len().saturating_sub(128);
            rem >>= shift;
            den >>= shift;
            rem * scale / den
        }
    };

    Some(u256_to_f64(whole) + u256_to_f64(frac) / PRICE_SCALE as f64)
}

/// Raw collateral amount in whole units (`x / 10^6`).
pub fn collateral_amount(raw: U256) -> f64 {
    let unit = U256::from(COLLATERAL_UNIT);
    let whole = raw / unit;
    let rem = raw % unit;
    u256_to_f64(whole) + u256_to_f64(rem) / COLLATERAL_UNIT as f64
}

/// A price is meaningful when it lies in `(0, 1]`.
pub fn price_in_bounds(price: f64) -> bool {
    price > 0.0 && price <= 1.0
}

fn u256_to_f64(value: U256) -> f64 {
    match u128::try_from(value) {
        Ok(v) => v as f64,
        Err(_) => f64::INFINITY,
    }
}

// ─── Decoder ──────────────────────────────────────────────────────────────────

/// Outcome of decoding one `eth_getLogs` batch.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub trades: Vec<Trade>,
    /// Logs flagged `removed` by the provider.
    pub removed: usize,
    /// Share-for-share fills, an expected occurrence.
    pub non_collateral: usize,
    /// Anomalous records that failed validation.
    pub rejected: usize,
}

/// Turns tracked `OrderFilled` logs into candidate trades.
#[derive(Debug, Clone)]
pub struct TradeLogDecoder {
    exchanges: Vec<Address>,
    topic0: B256,
}

impl TradeLogDecoder {
    pub fn new(exchanges: Vec<Address>, topic0: B256) -> Self {
        Self { exchanges, topic0 }
    }

    /// Decoder for the two production exchanges.
    pub fn polymarket() -> Self {
        Self::new(vec![CTF_EXCHANGE, NEG_RISK_EXCHANGE], ORDER_FILLED_TOPIC)
    }

    pub fn exchanges(&self) -> &[Address] {
        &self.exchanges
    }

    pub fn topic0(&self) -> B256 {
        self.topic0
    }

    /// Decode a single log.
    ///
    /// `fallback_timestamp` is used when the provider did not include the
    /// block time in the log.
    pub fn decode(&self, log: &RawLog, fallback_timestamp: i64) -> Result<Trade, DecodeError> {
        let exchange = Address::from_str(&log.address)
            .map_err(|e| malformed("address", e.to_string()))?;
        if !self.exchanges.contains(&exchange) {
            return Err(DecodeError::UnexpectedSource(log.address.clone()));
        }

        let topic0 = log
            .topics
            .first()
            .ok_or_else(|| DecodeError::UnexpectedTopic("<none>".into()))?;
        let topic0_parsed =
            B256::from_str(topic0).map_err(|e| malformed("topics[0]", e.to_string()))?;
        if topic0_parsed != self.topic0 {
            return Err(DecodeError::UnexpectedTopic(topic0.clone()));
        }

        let tx_hash = B256::from_str(&log.tx_hash)
            .map_err(|e| malformed("transactionHash", e.to_string()))?;
        let block_number = log
            .block_number_u64()
            .ok_or_else(|| malformed("blockNumber", log.block_number.clone()))?;
        let log_index = log
            .log_index_u64()
            .ok_or_else(|| malformed("logIndex", log.log_index.clone()))?;
        let data = log
            .data_bytes()
            .map_err(|e| malformed("data", e.to_string()))?;

        let fill = OrderFilled::from_payload(&data)?;
        let (side, token_id) = infer_side(fill.maker_asset_id, fill.taker_asset_id)?;

        let (collateral, shares, shares_field) = match side {
            Side::Buy => (fill.maker_amount, fill.taker_amount, "taker"),
            Side::Sell => (fill.taker_amount, fill.maker_amount, "maker"),
        };
        let price =
            price_from_amounts(collateral, shares).ok_or(DecodeError::ZeroAmount(shares_field))?;
        let price_valid = price_in_bounds(price);
        if !price_valid {
            tracing::warn!(
                tx = %tx_hash,
                log_index,
                price,
                "OrderFilled price outside (0, 1]; keeping trade flagged invalid"
            );
        }

        Ok(Trade {
            tx_hash,
            log_index,
            exchange,
            order_hash: fill.order_hash,
            maker: fill.maker,
            taker: fill.taker,
            maker_asset_id: fill.maker_asset_id,
            taker_asset_id: fill.taker_asset_id,
            maker_amount: fill.maker_amount,
            taker_amount: fill.taker_amount,
            fee: fill.fee,
            side,
            token_id,
            price,
            price_valid,
            block_number,
            timestamp: log.timestamp().unwrap_or(fallback_timestamp),
            market_slug: None,
            condition_id: None,
            outcome: None,
        })
    }

    /// Decode a batch, skipping removed logs and records that fail validation.
    pub fn decode_batch(&self, logs: &[RawLog], fallback_timestamp: i64) -> DecodedBatch {
        let mut batch = DecodedBatch::default();
        for log in logs {
            if log.is_removed() {
                batch.removed += 1;
                continue;
            }
            match self.decode(log, fallback_timestamp) {
                Ok(trade) => batch.trades.push(trade),
                Err(e) if e.is_expected() => {
                    tracing::debug!(tx = %log.tx_hash, log_index = %log.log_index, "{e}");
                    batch.non_collateral += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        tx = %log.tx_hash,
                        log_index = %log.log_index,
                        error = %e,
                        "Skipping undecodable OrderFilled log"
                    );
                    batch.rejected += 1;
                }
            }
        }
        batch
    }
}

impl TradeLogDecoder {
    /// Whether `log` comes from a tracked exchange with the tracked topic0.
    pub fn tracks(&self, log: &RawLog) -> bool {
        let source = Address::from_str(&log.address)
            .map(|a| self.exchanges.contains(&a))
            .unwrap_or(false);
        let topic = log
            .topics
            .first()
            .and_then(|t| B256::from_str(t).ok())
            .is_some_and(|t| t == self.topic0);
        source && topic
    }

    /// Decode the fills in one transaction receipt.
    ///
    /// A receipt carries every log the transaction emitted (collateral
    /// transfers, token transfers, ...), so untracked logs are dropped
    /// silently before decoding instead of being counted as rejected.
    pub fn decode_receipt(&self, logs: &[RawLog], fallback_timestamp: i64) -> DecodedBatch {
        let tracked: Vec<RawLog> = logs.iter().filter(|l| self.tracks(l)).cloned().collect();
        tracing::debug!(logs = logs.len(), tracked = tracked.len(), "Decoding receipt logs");
        self.decode_batch(&tracked, fallback_timestamp)
    }
}

fn malformed(field: &'static str, reason: String) -> DecodeError {
    DecodeError::MalformedField { field, reason }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
