//! Pinned derivation vectors.
//!
//! Each vector fixes (collateral, condition id, index set) and the expected
//! collection and position ids byte-for-byte. A change in hash function,
//! padding or byte order breaks these even though the output stays 32 bytes.

use std::str::FromStr;

use alloy_primitives::{B256, U256};
use ctfindex_core::ctf::{self, USDC_E};
use ctfindex_core::decoder::ORDER_FILLED_TOPIC;

struct Vector {
    condition: &'static str,
    index_set: u64,
    collection: &'static str,
    position_hex: &'static str,
    position_dec: &'static str,
}

const VECTORS: &[Vector] = &[
    Vector {
        condition: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        index_set: 1,
        collection: "0xb97c7da8a180a1020eef6def88a3ea3741d6611688e36b0d6734a001b3a4026b",
        position_hex: "0x5212d049ca22d27a636cb92c3e4bf092d3785a2abe2c807a6fb8553dae3d807c",
        position_dec: "37122894383597501834828946563002528497568835875331893454160494222895715549308",
    },
    Vector {
        condition: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        index_set: 2,
        collection: "0x9e087aa81c938364280bad6454b0b6ddc39b5f6459cda7a099c8eecc068c4e48",
        position_hex: "0x0d7e2adadb3ffa0d184b5d477f86175623a6ae87bbf718668bfb2e9cccceef5f",
        position_dec: "6102985535449188505800174014791209567663492865619297344470809667466303565663",
    },
    Vector {
        condition: "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        index_set: 1,
        collection: "0xaf618cf6bfd54ab100e72bda90172c7057ed7098502f622369d4fe68f3de2e40",
        position_hex: "0x8771811bb526469604d852a23e7657f3b389110ab95aefb62fe6f78d62e29498",
        position_dec: "61262779349335486368088087791199231577657006945559622768240691518762446394520",
    },
    Vector {
        condition: "0x0000000000000000000000000000000000000000000000000000000000000001",
        index_set: 2,
        collection: "0xe682b7c401097344fed1af3e3492f018caf2a2491b45159ba612453495164301",
        position_hex: "0x7c59e65f592e0cd064ad949d5c9e7fa695c6154cc53878154c49369a7dce1ec2",
        position_dec: "56245632585336741424880093959056062727349967493305567634761780334883993689794",
    },
];

#[test]
fn collection_ids_match_pinned_vectors() {
    for v in VECTORS {
        let condition = B256::from_str(v.condition).unwrap();
        let collection = ctf::collection_id(condition, v.index_set);
        assert_eq!(
            collection,
            B256::from_str(v.collection).unwrap(),
            "collection id mismatch for {} / {}",
            v.condition,
            v.index_set
        );
    }
}

#[test]
fn position_ids_match_pinned_vectors() {
    for v in VECTORS {
        let condition = B256::from_str(v.condition).unwrap();
        let position = ctf::derive_position_id(USDC_E, condition, v.index_set);
        assert_eq!(position, U256::from_str(v.position_hex).unwrap());
        assert_eq!(position.to_string(), v.position_dec);
    }
}

#[test]
fn binary_positions_match_pinned_vectors() {
    let condition = B256::from_str(VECTORS[0].condition).unwrap();
    let positions = ctf::derive_binary_positions(USDC_E, condition);
    assert_eq!(positions.position_yes.to_string(), VECTORS[0].position_dec);
    assert_eq!(positions.position_no.to_string(), VECTORS[1].position_dec);
}

#[test]
fn order_filled_topic_is_keccak_of_signature() {
    assert_eq!(
        ORDER_FILLED_TOPIC,
        B256::from_str("0xd0a08e8c493f9c94f29311604c9de1b4e8c8d4c06bd0c789af57f2d65bfec0f6").unwrap()
    );
}
