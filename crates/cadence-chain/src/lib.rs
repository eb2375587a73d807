//! Cadence chain records
//!
//! Signed blocks and transactions with their canonical big-endian encoding.
//!
//! # Hashing
//!
//! A block's hash is the double BLAKE3 digest of its signature, not of the
//! full block. Signature and hash can then be checked independently, and
//! hashing cost does not grow with the transaction count.
//!
//! # Derived data
//!
//! Each [`Block`] carries once-only caches for its signature validity,
//! [`CycleInformation`] and settled [`ContinuityState`]. They are never part
//! of the encoding and are filled in by `cadence-consensus`.

pub mod block;
pub mod codec;
pub mod crypto;
pub mod cycle;
pub mod error;
pub mod ids;
pub mod transaction;

pub use block::{
    limit_blockchain_version, Block, BLOCK_DURATION_MS, MAXIMUM_BLOCKCHAIN_VERSION,
    MINIMUM_BLOCKCHAIN_VERSION, MINIMUM_VERIFICATION_INTERVAL_MS,
};
pub use codec::Reader;
pub use crypto::{double_hash, hash_long, identifier_for_seed, sign_bytes};
pub use cycle::{ContinuityState, CycleInformation};
pub use error::{Error, Result};
pub use ids::{BlockHash, Identifier, Signature};
pub use transaction::{Transaction, TransactionType, Transfer};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arbitrary_block() -> impl Strategy<Value = Block> {
        (
            0u16..=1,
            1u64..(1 << 48),
            any::<[u8; 32]>(),
            0u64..u64::MAX / 2,
            0u64..10_000,
            proptest::collection::vec((0u64..BLOCK_DURATION_MS, 0u64..1_000_000_000), 0..4),
            any::<[u8; 32]>(),
            any::<[u8; 32]>(),
        )
            .prop_map(|(version, height, previous, start, delay, txs, balance, seed)| {
                let transactions = txs
                    .into_iter()
                    .map(|(offset, amount)| {
                        Transaction::standard(
                            Transfer {
                                timestamp: start + offset,
                                amount,
                                receiver: Identifier([7u8; 32]),
                                previous_hash_height: height - 1,
                                previous_block_hash: BlockHash(previous),
                                sender_data: vec![1, 2, 3],
                            },
                            &[8u8; 32],
                        )
                    })
                    .collect();
                let mut block = Block::new(
                    version,
                    height,
                    BlockHash(previous),
                    start,
                    transactions,
                    BlockHash(balance),
                );
                block.sign(&seed, start + delay);
                block
            })
    }

    proptest! {
        #[test]
        fn block_roundtrip(block in arbitrary_block()) {
            let bytes = block.to_bytes(true);
            let decoded = Block::from_bytes(&bytes, false, &|_| None).unwrap();
            prop_assert_eq!(&decoded, &block);
            prop_assert!(decoded.signature_is_valid());
        }

        #[test]
        fn unsigned_encoding_is_signed_prefix(block in arbitrary_block()) {
            let unsigned = block.to_bytes(false);
            let signed = block.to_bytes(true);
            prop_assert_eq!(&signed[..unsigned.len()], &unsigned[..]);
            prop_assert_eq!(signed.len() - unsigned.len(), 96);
        }
    }
}
