//! Cadence consensus core
//!
//! Decides whether a block legitimately extends the chain, which of several
//! competing blocks at a height is preferred, and which block the verifier
//! cluster freezes at each height.
//!
//! # Proof of diversity
//!
//! Verifiers take turns in a fixed rotation. The **cycle** is the run of
//! consecutive blocks from distinct verifiers after which the rotation
//! repeats. New verifiers may join only when spaced apart from other new
//! verifiers (rule 1), and no block may shrink the cycle below roughly half
//! its recent maximum (rule 2). See [`cycle`] and [`continuity`].
//!
//! # Fork choice
//!
//! [`ChainScorer`] scores a candidate relative to a reference height; lower
//! is better. [`ChainScore`] orders definite scores before
//! `Indeterminate` before `Invalid`.
//!
//! # Voting
//!
//! [`BlockVoteManager`] collects votes per height. A hash wins once it holds
//! strictly more than 3/4 of the voting set:
//! - 5 verifiers → 4 votes win, 3 do not
//! - during the Genesis cycle the whole mesh votes

pub mod chain;
pub mod collaborators;
pub mod continuity;
pub mod cycle;
mod error;
pub mod score;
pub mod tally;
mod threshold;
pub mod vote;

#[cfg(test)]
mod testing;

pub use chain::{BlockRef, ChainView, FrozenChain, InMemoryFrozenChain, UnfrozenBlocks};
pub use collaborators::{
    Collaborators, FixedSpam, Membership, MeshNode, PeerMessenger, SpamDetector, StaticMembership,
    StaticPolicy, VerifierPolicy,
};
pub use continuity::continuity_state;
pub use cycle::cycle_information;
pub use error::{Error, Result};
pub use score::{genesis_cycle_offset, ChainScore, ChainScorer};
pub use tally::{BlockVoteManager, BlockVoteTally, VoteChoice, VoteOutcome, VoteSummary};
pub use threshold::{meets_quorum, quorum_threshold, votes_needed};
pub use vote::BlockVote;
