//! Signed block records.
//!
//! A block is immutable once signed. The only mutation after construction is
//! [`Block::sign`], which must happen before the block is shared. Cycle
//! information and continuity are derived from the ancestor chain by
//! `cadence-consensus` and cached here once settled.

use std::collections::HashSet;
use std::sync::OnceLock;

use crate::codec::{pack_version_and_height, unpack_version_and_height, Reader};
use crate::crypto::{double_hash, identifier_for_seed, sign_bytes, signature_is_valid};
use crate::cycle::{ContinuityState, CycleInformation};
use crate::error::Result;
use crate::ids::{BlockHash, Identifier, Signature, HASH_BYTES, IDENTIFIER_BYTES, SIGNATURE_BYTES};
use crate::transaction::{Transaction, TransactionType};

/// Nominal time between consecutive block start timestamps.
pub const BLOCK_DURATION_MS: u64 = 7_000;

/// A block's verification timestamp must trail its predecessor's by at least this much.
pub const MINIMUM_VERIFICATION_INTERVAL_MS: u64 = 1_500;

pub const MINIMUM_BLOCKCHAIN_VERSION: u16 = 0;
pub const MAXIMUM_BLOCKCHAIN_VERSION: u16 = 1;

/// Clamp a blockchain version into the supported range.
pub fn limit_blockchain_version(version: u16) -> u16 {
    version.clamp(MINIMUM_BLOCKCHAIN_VERSION, MAXIMUM_BLOCKCHAIN_VERSION)
}

/// A block in the verifier chain.
#[derive(Debug, Clone)]
pub struct Block {
    blockchain_version: u16,
    height: u64,
    previous_block_hash: BlockHash,
    start_timestamp: u64,
    verification_timestamp: u64,
    transactions: Vec<Transaction>,
    balance_list_hash: BlockHash,
    verifier_identifier: Identifier,
    verifier_signature: Signature,

    signature_state: OnceLock<bool>,
    cycle_information: OnceLock<CycleInformation>,
    continuity_state: OnceLock<ContinuityState>,
}

impl Block {
    /// Create an unsigned block. The version is clamped into the supported range.
    pub fn new(
        blockchain_version: u16,
        height: u64,
        previous_block_hash: BlockHash,
        start_timestamp: u64,
        transactions: Vec<Transaction>,
        balance_list_hash: BlockHash,
    ) -> Self {
        Self {
            blockchain_version: limit_blockchain_version(blockchain_version),
            height,
            previous_block_hash,
            start_timestamp,
            verification_timestamp: start_timestamp,
            transactions,
            balance_list_hash,
            verifier_identifier: Identifier::default(),
            verifier_signature: Signature::ZERO,
            signature_state: OnceLock::new(),
            cycle_information: OnceLock::new(),
            continuity_state: OnceLock::new(),
        }
    }

    /// Hash of the Genesis block: the double digest of empty input.
    pub fn genesis_hash() -> BlockHash {
        double_hash(&[])
    }

    /// Sign the block with the verifier key derived from `seed`.
    ///
    /// Sets the verifier identifier, verification timestamp and signature.
    pub fn sign(&mut self, seed: &[u8; 32], verification_timestamp: u64) {
        self.verifier_identifier = identifier_for_seed(seed);
        self.verification_timestamp = verification_timestamp;
        self.verifier_signature = sign_bytes(&self.to_bytes(false), seed);
        self.signature_state = OnceLock::new();
    }

    pub fn blockchain_version(&self) -> u16 {
        self.blockchain_version
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn previous_block_hash(&self) -> &BlockHash {
        &self.previous_block_hash
    }

    pub fn start_timestamp(&self) -> u64 {
        self.start_timestamp
    }

    pub fn verification_timestamp(&self) -> u64 {
        self.verification_timestamp
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn balance_list_hash(&self) -> &BlockHash {
        &self.balance_list_hash
    }

    pub fn verifier_identifier(&self) -> &Identifier {
        &self.verifier_identifier
    }

    pub fn verifier_signature(&self) -> &Signature {
        &self.verifier_signature
    }

    /// Block hash. The Genesis block hashes to [`Block::genesis_hash`];
    /// every other block to the double digest of its signature.
    pub fn hash(&self) -> BlockHash {
        if self.height == 0 {
            Self::genesis_hash()
        } else {
            double_hash(self.verifier_signature.as_bytes())
        }
    }

    /// Exclusive end of the window transaction timestamps must fall in.
    pub fn end_timestamp(&self) -> u64 {
        self.start_timestamp.saturating_add(BLOCK_DURATION_MS)
    }

    /// Sum of transaction fees.
    pub fn transaction_fees(&self) -> u64 {
        self.transactions.iter().map(Transaction::fee).fold(0, u64::saturating_add)
    }

    /// Whether the verifier signature covers the unsigned encoding. Memoized.
    pub fn signature_is_valid(&self) -> bool {
        *self.signature_state.get_or_init(|| {
            signature_is_valid(
                &self.verifier_signature,
                &self.to_bytes(false),
                &self.verifier_identifier,
            )
        })
    }

    /// Cached cycle information, if it has been computed.
    pub fn cycle_information(&self) -> Option<&CycleInformation> {
        self.cycle_information.get()
    }

    /// Cache cycle information. The first value stored wins and is returned.
    pub fn cache_cycle_information(&self, info: CycleInformation) -> &CycleInformation {
        self.cycle_information.get_or_init(|| info)
    }

    /// Cached continuity state, if settled.
    pub fn continuity_state(&self) -> Option<ContinuityState> {
        self.continuity_state.get().copied()
    }

    /// Cache a continuity verdict. `Undetermined` is returned unchanged and
    /// never stored; a settled verdict is stored once and the stored value
    /// returned.
    pub fn cache_continuity_state(&self, state: ContinuityState) -> ContinuityState {
        if !state.is_settled() {
            return state;
        }
        *self.continuity_state.get_or_init(|| state)
    }

    /// Canonical encoding. The unsigned form (`include_signature = false`)
    /// is what the verifier signs.
    pub fn to_bytes(&self, include_signature: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_size(include_signature));
        let version_and_height = pack_version_and_height(self.blockchain_version, self.height);
        out.extend_from_slice(&version_and_height.to_be_bytes());
        out.extend_from_slice(self.previous_block_hash.as_bytes());
        out.extend_from_slice(&self.start_timestamp.to_be_bytes());
        out.extend_from_slice(&self.verification_timestamp.to_be_bytes());
        out.extend_from_slice(&(self.transactions.len() as u32).to_be_bytes());
        for tx in &self.transactions {
            tx.write_to(&mut out);
        }
        out.extend_from_slice(self.balance_list_hash.as_bytes());
        if include_signature {
            out.extend_from_slice(self.verifier_identifier.as_bytes());
            out.extend_from_slice(self.verifier_signature.as_bytes());
        }
        out
    }

    /// Size of the canonical encoding in bytes.
    pub fn byte_size(&self, include_signature: bool) -> usize {
        let mut size = 8 + HASH_BYTES + 8 + 8 + 4 + HASH_BYTES;
        size += self.transactions.iter().map(Transaction::byte_size).sum::<usize>();
        if include_signature {
            size += IDENTIFIER_BYTES + SIGNATURE_BYTES;
        }
        size
    }

    /// Decode a complete signed block from `bytes`, rejecting trailing data.
    pub fn from_bytes(
        bytes: &[u8],
        validate_transactions: bool,
        resolve_hash: &dyn Fn(u64) -> Option<BlockHash>,
    ) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let block = Self::decode(&mut reader, validate_transactions, resolve_hash)?;
        reader.finish()?;
        Ok(block)
    }

    /// Decode a signed block.
    ///
    /// `resolve_hash` supplies block hashes for transaction previous-hash
    /// heights; the block's own previous hash is used for the height just
    /// below it. With `validate_transactions`, transactions outside the
    /// block's time window or with invalid signatures are dropped, as are
    /// duplicates by signature.
    pub fn decode(
        reader: &mut Reader<'_>,
        validate_transactions: bool,
        resolve_hash: &dyn Fn(u64) -> Option<BlockHash>,
    ) -> Result<Self> {
        let (version, height) = unpack_version_and_height(reader.u64()?);
        let previous_block_hash = BlockHash(reader.array()?);
        let start_timestamp = reader.u64()?;
        let verification_timestamp = reader.u64()?;

        let resolve_for_block = |hash_height: u64| {
            if height.checked_sub(1) == Some(hash_height) {
                Some(previous_block_hash)
            } else {
                resolve_hash(hash_height)
            }
        };

        let count = reader.u32()?;
        let mut transactions = Vec::with_capacity((count as usize).min(reader.remaining()));
        for _ in 0..count {
            transactions.push(Transaction::decode(reader, &resolve_for_block)?);
        }

        let balance_list_hash = BlockHash(reader.array()?);
        let verifier_identifier = Identifier(reader.array()?);
        let verifier_signature = Signature(reader.array()?);

        if validate_transactions {
            transactions = valid_transactions(transactions, start_timestamp);
        }

        let mut block = Self::new(
            version,
            height,
            previous_block_hash,
            start_timestamp,
            transactions,
            balance_list_hash,
        );
        block.verification_timestamp = verification_timestamp;
        block.verifier_identifier = verifier_identifier;
        block.verifier_signature = verifier_signature;
        Ok(block)
    }
}

fn valid_transactions(transactions: Vec<Transaction>, start_timestamp: u64) -> Vec<Transaction> {
    let end_timestamp = start_timestamp.saturating_add(BLOCK_DURATION_MS);
    let mut seen = HashSet::new();
    transactions
        .into_iter()
        .filter(|tx| tx.kind() == TransactionType::CoinGeneration || tx.signature_is_valid())
        .filter(|tx| tx.timestamp() >= start_timestamp && tx.timestamp() < end_timestamp)
        .filter(|tx| seen.insert(tx.deduplication_key()))
        .collect()
}

/// Equality is over the signed encoding; caches are not compared.
impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes(true) == other.to_bytes(true)
    }
}

impl Eq for Block {}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[Block:v={},height={},hash={},id={}]",
            self.blockchain_version,
            self.height,
            self.hash(),
            self.verifier_identifier
        )
    }
}
