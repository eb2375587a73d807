//! Block vote messages.
//!
//! ```text
//! height (8) | block hash (32) | votes to save (4) | votes to cancel (4)
//! ```
//!
//! A non-zero cancel count retroactively cancels the sender's votes for the
//! `votes_to_cancel` heights that end `votes_to_save` heights below this
//! vote's height.

use cadence_chain::{BlockHash, Reader};
use serde::Serialize;

use crate::error::{Error, Result};

/// Encoded size of a [`BlockVote`].
pub const BLOCK_VOTE_BYTES: usize = 8 + 32 + 4 + 4;

/// A verifier's vote for one block at one height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlockVote {
    pub height: u64,
    pub hash: BlockHash,
    pub votes_to_save: u32,
    pub votes_to_cancel: u32,
}

impl BlockVote {
    pub fn new(height: u64, hash: BlockHash) -> Self {
        Self {
            height,
            hash,
            votes_to_save: 0,
            votes_to_cancel: 0,
        }
    }

    /// Attach a retroactive cancellation range.
    pub fn with_cancellation(mut self, votes_to_save: u32, votes_to_cancel: u32) -> Self {
        self.votes_to_save = votes_to_save;
        self.votes_to_cancel = votes_to_cancel;
        self
    }

    /// Heights whose votes this message cancels, clipped to heights above
    /// `frozen_edge`. Empty when nothing is cancelled.
    pub fn cancelled_heights(&self, frozen_edge: u64) -> std::ops::RangeInclusive<u64> {
        if self.votes_to_cancel == 0 {
            return 1..=0;
        }
        let save = self.votes_to_save as u64;
        let cancel = self.votes_to_cancel as u64;
        let start = (frozen_edge + 1).max(self.height.saturating_sub(save + cancel));
        match self.height.checked_sub(save + 1) {
            Some(end) => start..=end,
            None => 1..=0,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BLOCK_VOTE_BYTES);
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(self.hash.as_bytes());
        out.extend_from_slice(&self.votes_to_save.to_be_bytes());
        out.extend_from_slice(&self.votes_to_cancel.to_be_bytes());
        out
    }

    /// Decode a vote. The all-zero hash never names a block and is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let height = reader.u64()?;
        let hash = BlockHash(reader.array()?);
        let votes_to_save = reader.u32()?;
        let votes_to_cancel = reader.u32()?;
        reader.finish()?;

        if hash.is_zero() {
            return Err(Error::MalformedVote(format!("zero hash at height {}", height)));
        }

        Ok(Self {
            height,
            hash,
            votes_to_save,
            votes_to_cancel,
        })
    }
}

impl std::fmt::Display for BlockVote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[BlockVote:height={},hash={}", self.height, self.hash)?;
        if self.votes_to_cancel > 0 {
            write!(f, ",save={},cancel={}", self.votes_to_save, self.votes_to_cancel)?;
        }
        write!(f, "]")
    }
}
