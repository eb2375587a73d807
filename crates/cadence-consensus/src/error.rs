//! Error types for cadence-consensus.
//!
//! Indeterminate and invalid outcomes are values ([`crate::ChainScore`],
//! [`cadence_chain::ContinuityState`]), not errors. Errors here are
//! transient: a malformed inbound message is dropped and processing goes on.

use thiserror::Error;

/// Result type for consensus operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A chain record failed to decode.
    #[error("chain record error: {0}")]
    Chain(#[from] cadence_chain::Error),

    /// A vote message was structurally valid bytes but semantically unusable.
    #[error("malformed vote message: {0}")]
    MalformedVote(String),
}
