//! Conditional-token identifier derivation.
//!
//! Position (token) ids are not deployed contracts; they are computed from the
//! condition and the collateral with two keccak-256 rounds over fixed-width,
//! big-endian, tightly packed inputs:
//!
//! ```text
//! collectionId = keccak256(parentCollectionId[32] ‖ conditionId[32] ‖ indexSet[32, big-endian])
//! positionId   = keccak256(collateralToken[20] ‖ collectionId[32])
//! ```
//!
//! Any deviation in hash, width or byte order yields a well-formed but wrong
//! id with no runtime error, so these functions are pinned by golden vectors
//! in `tests/golden.rs`.

use alloy_primitives::{address, Address, B256, U256};
use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Keccak};

/// Index set of the YES outcome of a binary condition.
pub const INDEX_SET_YES: u64 = 1;
/// Index set of the NO outcome of a binary condition.
pub const INDEX_SET_NO: u64 = 2;

/// Top-level positions have an all-zero parent collection.
pub const PARENT_COLLECTION_ID: B256 = B256::ZERO;

/// USDC.e on Polygon, the protocol's collateral token.
pub const USDC_E: Address = address!("2791Bca1f2de4661ED88A30C99A7a9449Aa84174");

/// YES/NO identifiers of a binary condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryPositions {
    pub collection_id_yes: B256,
    pub collection_id_no: B256,
    pub position_yes: U256,
    pub position_no: U256,
}

pub(crate) fn keccak256(chunks: &[&[u8]]) -> B256 {
    let mut hasher = Keccak::v256();
    for chunk in chunks {
        hasher.update(chunk);
    }
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    B256::from(output)
}

/// Collection id of `index_set` under `condition_id` (top-level parent).
pub fn collection_id(condition_id: B256, index_set: u64) -> B256 {
    let index_set = U256::from(index_set).to_be_bytes::<32>();
    keccak256(&[
        PARENT_COLLECTION_ID.as_slice(),
        condition_id.as_slice(),
        &index_set,
    ])
}

/// Position id of `collection_id` backed by `collateral`.
pub fn position_id(collateral: Address, collection_id: B256) -> U256 {
    let hash = keccak256(&[collateral.as_slice(), collection_id.as_slice()]);
    U256::from_be_bytes(hash.0)
}

/// Position id for `index_set` of `condition_id`, in one step.
pub fn derive_position_id(collateral: Address, condition_id: B256, index_set: u64) -> U256 {
    position_id(collateral, collection_id(condition_id, index_set))
}

/// Both outcome ids of a binary condition.
pub fn derive_binary_positions(collateral: Address, condition_id: B256) -> BinaryPositions {
    let collection_id_yes = collection_id(condition_id, INDEX_SET_YES);
    let collection_id_no = collection_id(condition_id, INDEX_SET_NO);
    BinaryPositions {
        position_yes: position_id(collateral, collection_id_yes),
        position_no: position_id(collateral, collection_id_no),
        collection_id_yes,
        collection_id_no,
    }
}
