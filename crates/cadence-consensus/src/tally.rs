//! Block vote tallying.
//!
//! Votes from the verifier cluster are kept per height, for heights above
//! the frozen edge and below the open edge. A verifier that votes for two
//! different hashes at one height has its vote there cancelled for good.
//! Tallies are built level by level from the frozen edge: a candidate at
//! height `h + 1` is counted only if it extends a hash tallied at `h`.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use cadence_chain::{BlockHash, Identifier};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chain::ChainView;
use crate::collaborators::{Membership, PeerMessenger};
use crate::cycle::cycle_information;
use crate::error::Result;
use crate::threshold::{meets_quorum, quorum_threshold};
use crate::vote::BlockVote;

/// Length of the local recent-vote log.
pub const RECENT_VOTE_LOG_LENGTH: usize = 10;

/// Heights this far below the open edge are checked for missing votes.
pub const MISSING_VOTE_REQUEST_LAG: u64 = 4;

/// What a verifier's vote at one height currently counts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "choice", content = "hash", rename_all = "snake_case")]
pub enum VoteChoice {
    Block(BlockHash),
    /// Inconsistent or explicitly cancelled.
    Cancelled,
}

impl VoteChoice {
    pub fn block_hash(&self) -> Option<BlockHash> {
        match self {
            VoteChoice::Block(hash) => Some(*hash),
            VoteChoice::Cancelled => None,
        }
    }
}

/// Result of registering one vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Recorded,
    /// The verifier had already voted for a different hash at this height.
    Cancelled,
    /// The height is at or below the frozen edge, or at or above the open edge.
    OutsideWindow,
}

/// Votes for one choice at one height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockVoteTally {
    pub height: u64,
    pub choice: VoteChoice,
    pub votes: usize,
    /// Cancelled votes at this height.
    pub cancelled_votes: usize,
    pub threshold: usize,
}

impl BlockVoteTally {
    /// The starting level for extension: the frozen-edge block itself.
    pub fn frozen_edge(height: u64, hash: BlockHash) -> Self {
        Self {
            height,
            choice: VoteChoice::Block(hash),
            votes: 0,
            cancelled_votes: 0,
            threshold: 0,
        }
    }

    pub fn block_hash(&self) -> Option<BlockHash> {
        self.choice.block_hash()
    }
}

/// Voter count and the size of the largest bloc at one height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteSummary {
    pub height: u64,
    pub voters: usize,
    pub leading_votes: usize,
}

impl std::fmt::Display for VoteSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.voters, self.leading_votes)
    }
}

#[derive(Debug, Default)]
struct VoteState {
    votes: BTreeMap<u64, HashMap<Identifier, VoteChoice>>,
    local_votes: BTreeMap<u64, BlockVote>,
    recent_votes: VecDeque<String>,
}

impl VoteState {
    fn count(&self, height: u64, voters: &HashSet<Identifier>) -> HashMap<VoteChoice, usize> {
        let mut counts = HashMap::new();
        if let Some(votes) = self.votes.get(&height) {
            for (identifier, choice) in votes {
                if voters.contains(identifier) {
                    *counts.entry(*choice).or_insert(0) += 1;
                }
            }
        }
        counts
    }
}

/// Process-wide vote state for one verifier.
///
/// Every operation takes the state lock once for its whole duration.
pub struct BlockVoteManager {
    view: ChainView,
    membership: Arc<dyn Membership>,
    messenger: Arc<dyn PeerMessenger>,
    state: Mutex<VoteState>,
}

impl BlockVoteManager {
    pub fn new(
        view: ChainView,
        membership: Arc<dyn Membership>,
        messenger: Arc<dyn PeerMessenger>,
    ) -> Self {
        Self {
            view,
            membership,
            messenger,
            state: Mutex::new(VoteState::default()),
        }
    }

    /// Record `vote` from `identifier`.
    ///
    /// Votes outside the open window are dropped. Local votes are also kept
    /// in the local-vote table and recent-vote log regardless of the window.
    pub async fn register_vote(
        &self,
        identifier: Identifier,
        vote: BlockVote,
        is_local: bool,
    ) -> VoteOutcome {
        let frozen_edge = self.view.frozen_edge_height();
        let open_edge = self.view.open_edge_height(true);

        let mut state = self.state.lock().await;

        let outcome = if vote.height > frozen_edge && vote.height < open_edge {
            let votes = state.votes.entry(vote.height).or_default();
            let outcome = match votes.get(&identifier) {
                Some(existing) if *existing != VoteChoice::Block(vote.hash) => {
                    warn!(
                        verifier = %identifier,
                        height = vote.height,
                        "cancelling vote due to inconsistent votes"
                    );
                    votes.insert(identifier, VoteChoice::Cancelled);
                    VoteOutcome::Cancelled
                }
                _ => {
                    votes.insert(identifier, VoteChoice::Block(vote.hash));
                    debug!(
                        verifier = %identifier,
                        height = vote.height,
                        hash = %vote.hash,
                        "vote registered"
                    );
                    VoteOutcome::Recorded
                }
            };

            let cancelled = vote.cancelled_heights(frozen_edge);
            if !cancelled.is_empty() {
                warn!(
                    verifier = %identifier,
                    from = cancelled.start(),
                    to = cancelled.end(),
                    "cancelling votes due to explicit cancellation"
                );
                for height in cancelled {
                    state
                        .votes
                        .entry(height)
                        .or_default()
                        .insert(identifier, VoteChoice::Cancelled);
                }
            }

            outcome
        } else {
            debug!(
                verifier = %identifier,
                height = vote.height,
                frozen_edge,
                open_edge,
                "vote outside open window"
            );
            VoteOutcome::OutsideWindow
        };

        if is_local {
            state.local_votes.insert(vote.height, vote);
            state.recent_votes.push_back(format!("@{} for {}", vote.height, vote.hash));
            while state.recent_votes.len() > RECENT_VOTE_LOG_LENGTH {
                state.recent_votes.pop_front();
            }
        }

        outcome
    }

    /// Decode and register a vote received from a peer. Malformed messages
    /// are logged and returned as errors without touching the vote state.
    pub async fn register_vote_message(
        &self,
        identifier: Identifier,
        bytes: &[u8],
    ) -> Result<VoteOutcome> {
        match BlockVote::from_bytes(bytes) {
            Ok(vote) => Ok(self.register_vote(identifier, vote, false).await),
            Err(e) => {
                warn!(verifier = %identifier, error = %e, "dropping malformed vote");
                Err(e)
            }
        }
    }

    /// Drop votes at or below the frozen edge.
    pub async fn remove_old_votes(&self) {
        let frozen_edge = self.view.frozen_edge_height();
        let mut state = self.state.lock().await;
        state.votes.retain(|height, _| *height > frozen_edge);
        state.local_votes.retain(|height, _| *height > frozen_edge);
    }

    /// Verifiers whose votes count: the current cycle, or the whole mesh
    /// while the frozen edge is still in the Genesis cycle.
    pub fn voting_verifiers(&self) -> HashSet<Identifier> {
        let frozen_edge = self.view.frozen_edge_height();
        let in_genesis_cycle = self
            .view
            .frozen()
            .frozen_block_at_height(frozen_edge)
            .and_then(|block| cycle_information(&self.view, &block))
            .map(|info| info.in_genesis_cycle)
            .unwrap_or(false);

        if in_genesis_cycle {
            self.membership
                .mesh_members()
                .into_iter()
                .map(|node| node.identifier)
                .collect()
        } else {
            self.membership.current_cycle_verifiers()
        }
    }

    /// Tallies at the height above `prior`, for candidates extending one of
    /// the prior hashes.
    ///
    /// All of `prior` must be at one height. If more votes were cancelled
    /// at that height than its threshold, every candidate is accepted.
    /// Candidates whose block is unknown are requested from peers and left
    /// out. Cancelled votes are tallied as their own choice so extension can
    /// continue past a level where only cancellations exist.
    pub async fn tallies_extending(&self, prior: &[BlockVoteTally]) -> Vec<BlockVoteTally> {
        let Some(first) = prior.first() else {
            return Vec::new();
        };
        let height = first.height + 1;

        let voters = self.voting_verifiers();
        let state = self.state.lock().await;
        if !state.votes.contains_key(&height) {
            return Vec::new();
        }

        let counts = state.count(height, &voters);
        let hashes_to_extend: HashSet<BlockHash> =
            prior.iter().filter_map(BlockVoteTally::block_hash).collect();
        let cancelled_votes = counts.get(&VoteChoice::Cancelled).copied().unwrap_or(0);
        let accept_all = first.cancelled_votes > first.threshold;
        let threshold = quorum_threshold(voters.len());

        let mut choices: Vec<_> = counts.into_iter().collect();
        choices.sort();

        let mut result = Vec::new();
        for (choice, votes) in choices {
            let include = match choice {
                VoteChoice::Cancelled => true,
                VoteChoice::Block(hash) => match self.view.unfrozen().block(height, &hash) {
                    None => {
                        debug!(height, %hash, "fetching missing block");
                        self.messenger.fetch_missing_block(height, hash);
                        false
                    }
                    Some(block) => {
                        accept_all || hashes_to_extend.contains(block.previous_block_hash())
                    }
                },
            };

            if include {
                result.push(BlockVoteTally {
                    height,
                    choice,
                    votes,
                    cancelled_votes,
                    threshold,
                });
            }
        }

        result
    }

    /// The hash holding strictly more than 3/4 of the voting set at
    /// `height`, if any. Cancelled votes never win.
    pub async fn winning_hash_for_height(&self, height: u64) -> Option<BlockHash> {
        let voters = self.voting_verifiers();
        let state = self.state.lock().await;
        let winner = state
            .count(height, &voters)
            .into_iter()
            .filter(|(_, votes)| meets_quorum(*votes, voters.len()))
            .find_map(|(choice, _)| choice.block_hash());

        if let Some(hash) = winner {
            info!(height, %hash, "winning hash");
        }
        winner
    }

    /// Ask voting verifiers for votes they have not cast at heights more
    /// than [`MISSING_VOTE_REQUEST_LAG`] below the open edge. Returns the
    /// number of requests sent.
    pub async fn request_missing_votes(&self) -> usize {
        let open_edge = self.view.open_edge_height(false);
        let state = self.state.lock().await;

        let mut lagging = state
            .votes
            .iter()
            .filter(|(height, _)| **height + MISSING_VOTE_REQUEST_LAG < open_edge)
            .peekable();
        if lagging.peek().is_none() {
            return 0;
        }

        let voters = self.voting_verifiers();
        let nodes: Vec<_> = self
            .membership
            .mesh_members()
            .into_iter()
            .filter(|node| voters.contains(&node.identifier))
            .collect();

        let mut sent = 0;
        for (height, votes) in lagging {
            for node in nodes.iter().filter(|n| !votes.contains_key(&n.identifier)) {
                self.messenger.request_block_vote(node, *height);
                sent += 1;
            }
        }

        if sent > 0 {
            debug!(sent, open_edge, "requested missing votes");
        }
        sent
    }

    /// Heights with at least one vote, ascending.
    pub async fn heights(&self) -> Vec<u64> {
        self.state.lock().await.votes.keys().copied().collect()
    }

    pub async fn vote_summary(&self, height: u64) -> VoteSummary {
        let state = self.state.lock().await;
        let votes = state.votes.get(&height);
        let mut per_choice: HashMap<VoteChoice, usize> = HashMap::new();
        for choice in votes.into_iter().flat_map(|v| v.values()) {
            *per_choice.entry(*choice).or_insert(0) += 1;
        }

        VoteSummary {
            height,
            voters: votes.map(HashMap::len).unwrap_or(0),
            leading_votes: per_choice.values().copied().max().unwrap_or(0),
        }
    }

    /// The choice `identifier` currently holds at `height`.
    pub async fn vote_of(&self, identifier: &Identifier, height: u64) -> Option<VoteChoice> {
        let state = self.state.lock().await;
        state.votes.get(&height)?.get(identifier).copied()
    }

    pub async fn local_votes(&self) -> Vec<BlockVote> {
        self.state.lock().await.local_votes.values().copied().collect()
    }

    pub async fn local_vote_for_height(&self, height: u64) -> Option<BlockVote> {
        self.state.lock().await.local_votes.get(&height).copied()
    }

    /// The local recent-vote log, oldest first.
    pub async fn recent_votes(&self) -> Vec<String> {
        self.state.lock().await.recent_votes.iter().cloned().collect()
    }
}
