//! Transactions carried in blocks.
//!
//! # Layout
//!
//! Every transaction begins with a type byte and a timestamp. The rest
//! depends on the type:
//!
//! ```text
//! coin generation (0)  amount | receiver
//! seed (1)             amount | receiver | prev-hash height | sender | data len | data | signature
//! standard (2)         same as seed
//! cycle (3)            same as seed | signature count | (identifier | signature)*
//! cycle signature (4)  sender | vote | cycle transaction signature | signature
//! ```
//!
//! Signing bytes differ from the wire bytes in two places: the previous-block
//! hash replaces its height, and the double digest of the sender data
//! replaces the raw data. That lets sender data be scrubbed later without
//! invalidating the signature.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::codec::Reader;
use crate::crypto::{double_hash, identifier_for_seed, sign_bytes, signature_is_valid};
use crate::error::{Error, Result};
use crate::ids::{BlockHash, Identifier, Signature, SIGNATURE_BYTES};

/// Maximum length of the free-form sender data field.
pub const MAXIMUM_SENDER_DATA_BYTES: usize = 32;

/// Transaction kinds, with their wire type bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransactionType {
    CoinGeneration = 0,
    Seed = 1,
    Standard = 2,
    Cycle = 3,
    CycleSignature = 4,
}

impl TransactionType {
    /// Parse a wire type byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::CoinGeneration),
            1 => Ok(Self::Seed),
            2 => Ok(Self::Standard),
            3 => Ok(Self::Cycle),
            4 => Ok(Self::CycleSignature),
            other => Err(Error::UnknownTransactionType(other)),
        }
    }

    /// Seed, standard and cycle transactions move funds from a sender.
    fn is_transfer(self) -> bool {
        matches!(self, Self::Seed | Self::Standard | Self::Cycle)
    }
}

/// Fields shared by seed, standard and cycle transactions.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub timestamp: u64,
    pub amount: u64,
    pub receiver: Identifier,
    pub previous_hash_height: u64,
    pub previous_block_hash: BlockHash,
    pub sender_data: Vec<u8>,
}

/// A signed transaction.
#[derive(Debug, Clone)]
pub struct Transaction {
    kind: TransactionType,
    timestamp: u64,
    amount: u64,
    receiver: Identifier,
    previous_hash_height: u64,
    /// Resolved from `previous_hash_height`; never written to the wire.
    previous_block_hash: BlockHash,
    sender: Identifier,
    sender_data: Vec<u8>,
    signature: Signature,
    cycle_signatures: BTreeMap<Identifier, Signature>,
    cycle_transaction_signature: Signature,
    cycle_transaction_vote: bool,
    signature_state: OnceLock<bool>,
}

impl Transaction {
    fn empty(kind: TransactionType, timestamp: u64) -> Self {
        Self {
            kind,
            timestamp,
            amount: 0,
            receiver: Identifier::default(),
            previous_hash_height: 0,
            previous_block_hash: BlockHash::ZERO,
            sender: Identifier::default(),
            sender_data: Vec::new(),
            signature: Signature::ZERO,
            cycle_signatures: BTreeMap::new(),
            cycle_transaction_signature: Signature::ZERO,
            cycle_transaction_vote: false,
            signature_state: OnceLock::new(),
        }
    }

    /// An unsigned coin-generation transaction. Only valid in the Genesis block.
    pub fn coin_generation(timestamp: u64, amount: u64, receiver: Identifier) -> Self {
        let mut tx = Self::empty(TransactionType::CoinGeneration, timestamp);
        tx.amount = amount;
        tx.receiver = receiver;
        tx
    }

    /// A seed transaction signed with `seed`. Sender and receiver must match.
    pub fn seed(transfer: Transfer, seed: &[u8; 32]) -> Self {
        Self::signed_transfer(TransactionType::Seed, transfer, seed)
    }

    /// A standard transaction signed with `seed`.
    pub fn standard(transfer: Transfer, seed: &[u8; 32]) -> Self {
        Self::signed_transfer(TransactionType::Standard, transfer, seed)
    }

    /// A cycle transaction signed by its initiator.
    pub fn cycle(transfer: Transfer, seed: &[u8; 32]) -> Self {
        Self::signed_transfer(TransactionType::Cycle, transfer, seed)
    }

    fn signed_transfer(kind: TransactionType, transfer: Transfer, seed: &[u8; 32]) -> Self {
        let mut tx = Self::empty(kind, transfer.timestamp);
        tx.amount = transfer.amount;
        tx.receiver = transfer.receiver;
        tx.previous_hash_height = transfer.previous_hash_height;
        tx.previous_block_hash = transfer.previous_block_hash;
        tx.sender = identifier_for_seed(seed);
        tx.sender_data = transfer.sender_data;
        tx.sender_data.truncate(MAXIMUM_SENDER_DATA_BYTES);
        tx.signature = sign_bytes(&tx.signing_bytes(), seed);
        tx
    }

    /// A vote on a cycle transaction, signed by a cycle verifier.
    pub fn cycle_signature(
        timestamp: u64,
        vote: bool,
        cycle_transaction_signature: Signature,
        seed: &[u8; 32],
    ) -> Self {
        let mut tx = Self::empty(TransactionType::CycleSignature, timestamp);
        tx.sender = identifier_for_seed(seed);
        tx.cycle_transaction_vote = vote;
        tx.cycle_transaction_signature = cycle_transaction_signature;
        tx.signature = sign_bytes(&tx.signing_bytes(), seed);
        tx
    }

    pub fn kind(&self) -> TransactionType {
        self.kind
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn receiver(&self) -> &Identifier {
        &self.receiver
    }

    pub fn sender(&self) -> &Identifier {
        &self.sender
    }

    pub fn sender_data(&self) -> &[u8] {
        &self.sender_data
    }

    pub fn previous_hash_height(&self) -> u64 {
        self.previous_hash_height
    }

    pub fn previous_block_hash(&self) -> &BlockHash {
        &self.previous_block_hash
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn cycle_signatures(&self) -> &BTreeMap<Identifier, Signature> {
        &self.cycle_signatures
    }

    pub fn cycle_transaction_vote(&self) -> bool {
        self.cycle_transaction_vote
    }

    /// Fee in the smallest unit: amount / 400, rounded up. Cycle and
    /// cycle-signature transactions are fee-free.
    pub fn fee(&self) -> u64 {
        match self.kind {
            TransactionType::Cycle | TransactionType::CycleSignature => 0,
            _ => self.amount.div_ceil(400),
        }
    }

    /// Key used to drop duplicate transactions from a block. Coin-generation
    /// transactions carry no signature and share the all-zero key.
    pub fn deduplication_key(&self) -> [u8; SIGNATURE_BYTES] {
        match self.kind {
            TransactionType::CoinGeneration => [0u8; SIGNATURE_BYTES],
            _ => *self.signature.as_bytes(),
        }
    }

    /// Add a cycle verifier's signature to a cycle transaction.
    ///
    /// Rejects non-cycle transactions, the initiator's own signature and
    /// signatures that do not verify. Cycle membership is the caller's check.
    pub fn add_cycle_signature(&mut self, identifier: Identifier, signature: Signature) -> bool {
        if self.kind != TransactionType::Cycle
            || identifier == self.sender
            || !signature_is_valid(&signature, &self.signing_bytes(), &identifier)
        {
            return false;
        }
        self.cycle_signatures.insert(identifier, signature);
        true
    }

    /// Whether the sender's signature verifies. Coin-generation transactions
    /// are unsigned and always report false. The result is memoized.
    pub fn signature_is_valid(&self) -> bool {
        if self.kind == TransactionType::CoinGeneration {
            return false;
        }
        *self.signature_state.get_or_init(|| {
            signature_is_valid(&self.signature, &self.signing_bytes(), &self.sender)
        })
    }

    /// Bytes covered by the sender's signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(160);
        out.push(self.kind as u8);
        out.extend_from_slice(&self.timestamp.to_be_bytes());

        match self.kind {
            TransactionType::CycleSignature => {
                out.extend_from_slice(self.sender.as_bytes());
                out.push(self.cycle_transaction_vote as u8);
                out.extend_from_slice(self.cycle_transaction_signature.as_bytes());
            }
            _ => {
                out.extend_from_slice(&self.amount.to_be_bytes());
                out.extend_from_slice(self.receiver.as_bytes());
            }
        }

        if self.kind.is_transfer() {
            out.extend_from_slice(self.previous_block_hash.as_bytes());
            out.extend_from_slice(self.sender.as_bytes());
            out.extend_from_slice(double_hash(&self.sender_data).as_bytes());
        }

        out
    }

    /// Canonical wire encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_size());
        self.write_to(&mut out);
        out
    }

    /// Append the canonical wire encoding to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.kind as u8);
        out.extend_from_slice(&self.timestamp.to_be_bytes());

        match self.kind {
            TransactionType::CycleSignature => {
                out.extend_from_slice(self.sender.as_bytes());
                out.push(self.cycle_transaction_vote as u8);
                out.extend_from_slice(self.cycle_transaction_signature.as_bytes());
                out.extend_from_slice(self.signature.as_bytes());
            }
            _ => {
                out.extend_from_slice(&self.amount.to_be_bytes());
                out.extend_from_slice(self.receiver.as_bytes());
            }
        }

        if self.kind.is_transfer() {
            out.extend_from_slice(&self.previous_hash_height.to_be_bytes());
            out.extend_from_slice(self.sender.as_bytes());
            out.push(self.sender_data.len() as u8);
            out.extend_from_slice(&self.sender_data);
            out.extend_from_slice(self.signature.as_bytes());

            if self.kind == TransactionType::Cycle {
                out.extend_from_slice(&(self.cycle_signatures.len() as u32).to_be_bytes());
                for (identifier, signature) in &self.cycle_signatures {
                    out.extend_from_slice(identifier.as_bytes());
                    out.extend_from_slice(signature.as_bytes());
                }
            }
        }
    }

    /// Size of the wire encoding in bytes.
    pub fn byte_size(&self) -> usize {
        let mut size = 1 + 8;
        match self.kind {
            TransactionType::CycleSignature => size += 32 + 1 + 64 + 64,
            _ => size += 8 + 32,
        }
        if self.kind.is_transfer() {
            size += 8 + 32 + 1 + self.sender_data.len() + 64;
            if self.kind == TransactionType::Cycle {
                size += 4 + self.cycle_signatures.len() * (32 + 64);
            }
        }
        size
    }

    /// Decode one transaction. `resolve_hash` maps a previous-hash height to
    /// the block hash at that height; unresolved heights use the zero hash.
    pub fn decode(
        reader: &mut Reader<'_>,
        resolve_hash: &dyn Fn(u64) -> Option<BlockHash>,
    ) -> Result<Self> {
        let kind = TransactionType::from_byte(reader.u8()?)?;
        let timestamp = reader.u64()?;
        let mut tx = Self::empty(kind, timestamp);

        match kind {
            TransactionType::CycleSignature => {
                tx.sender = Identifier(reader.array()?);
                tx.cycle_transaction_vote = reader.u8()? == 1;
                tx.cycle_transaction_signature = Signature(reader.array()?);
                tx.signature = Signature(reader.array()?);
                return Ok(tx);
            }
            _ => {
                tx.amount = reader.u64()?;
                tx.receiver = Identifier(reader.array()?);
            }
        }

        if kind.is_transfer() {
            tx.previous_hash_height = reader.u64()?;
            tx.previous_block_hash =
                resolve_hash(tx.previous_hash_height).unwrap_or(BlockHash::ZERO);
            tx.sender = Identifier(reader.array()?);

            let data_len = reader.u8()? as usize;
            if data_len > MAXIMUM_SENDER_DATA_BYTES {
                return Err(Error::SenderDataTooLong(data_len));
            }
            tx.sender_data = reader.vec(data_len)?;
            tx.signature = Signature(reader.array()?);

            if kind == TransactionType::Cycle {
                let count = reader.u32()?;
                for _ in 0..count {
                    let identifier = Identifier(reader.array()?);
                    let signature = Signature(reader.array()?);
                    if identifier != tx.sender {
                        tx.cycle_signatures.insert(identifier, signature);
                    }
                }
            }
        }

        Ok(tx)
    }
}

/// Equality is over the wire encoding; the resolved previous-block hash and
/// memoized signature state are not part of a transaction's identity.
impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for Transaction {}

impl std::fmt::Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[Transaction:type={},timestamp={},sender={},receiver={},amount={}]",
            self.kind as u8, self.timestamp, self.sender, self.receiver, self.amount
        )
    }
}
