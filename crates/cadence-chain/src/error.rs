//! Error types for cadence-chain.

use thiserror::Error;

/// Result type for cadence-chain operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding or constructing chain records.
#[derive(Debug, Error)]
pub enum Error {
    /// The input ended before a complete field could be read.
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A transaction carried a type byte this software does not know.
    #[error("unknown transaction type: {0}")]
    UnknownTransactionType(u8),

    /// Sender data is limited to 32 bytes.
    #[error("sender data too long: {0} bytes")]
    SenderDataTooLong(usize),

    /// Bytes remained after a complete record was decoded.
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),

    /// A hex string could not be parsed into a fixed-size value.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}
