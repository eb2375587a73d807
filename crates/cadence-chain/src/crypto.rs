//! Digests and Ed25519 signing.
//!
//! Hashes on the chain are double-BLAKE3: `H(H(data))`. A verifier's
//! 32-byte seed is its signing key; its identifier is the verifying key.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};

use crate::ids::{BlockHash, Identifier, Signature};

/// Double-BLAKE3 digest of `data`.
pub fn double_hash(data: &[u8]) -> BlockHash {
    let first = blake3::hash(data);
    let second = blake3::hash(first.as_bytes());
    BlockHash(*second.as_bytes())
}

/// The first 8 bytes of `BLAKE3(data)` as a big-endian signed integer.
///
/// Used where a deterministic, locally computable number is needed
/// without favoring any particular input.
pub fn hash_long(data: &[u8]) -> i64 {
    let hash = blake3::hash(data);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    i64::from_be_bytes(prefix)
}

/// The identifier (verifying key) for a signing seed.
pub fn identifier_for_seed(seed: &[u8; 32]) -> Identifier {
    let signing_key = SigningKey::from_bytes(seed);
    Identifier(signing_key.verifying_key().to_bytes())
}

/// Sign `message` with the key derived from `seed`.
pub fn sign_bytes(message: &[u8], seed: &[u8; 32]) -> Signature {
    let signing_key = SigningKey::from_bytes(seed);
    Signature(signing_key.sign(message).to_bytes())
}

/// Verify `signature` over `message` against `identifier`.
///
/// Malformed identifiers verify as false.
pub fn signature_is_valid(signature: &Signature, message: &[u8], identifier: &Identifier) -> bool {
    let verifying_key = match VerifyingKey::from_bytes(identifier.as_bytes()) {
        Ok(k) => k,
        Err(_) => return false,
    };

    let signature = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    verifying_key.verify(message, &signature).is_ok()
}
