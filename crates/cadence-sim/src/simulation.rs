//! Verifier-cluster simulation with event recording.
//!
//! Each height, the next verifier in the rotation proposes a block, every
//! verifier scores the candidates and votes for the best one, and the
//! observing verifier (the first in the rotation) tallies the votes and
//! freezes the winner. Vote order is shuffled from the configured seed.

use std::collections::HashMap;
use std::sync::Arc;

use cadence_chain::{identifier_for_seed, Block, BlockHash, Identifier, BLOCK_DURATION_MS};
use cadence_consensus::tally::MISSING_VOTE_REQUEST_LAG;
use cadence_consensus::{
    continuity_state, cycle_information, BlockVote, BlockVoteManager, BlockVoteTally, ChainScorer,
    ChainView, Collaborators, FixedSpam, FrozenChain, InMemoryFrozenChain, MeshNode, StaticPolicy,
    UnfrozenBlocks, VoteChoice, VoteOutcome,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cluster::{simulated_address, ChainMembership, ChannelMessenger, PeerRequest};
use crate::config::SimulationConfig;
use crate::events::{SimEvent, SimulationReport};

/// Start time of the simulated Genesis block.
pub const GENESIS_START_TIMESTAMP: u64 = 1_600_000_000_000;

/// Seed of the verifier that tries to join at `new_verifier_at`.
pub const OUTSIDER_SEED: [u8; 32] = [0xee; 32];

#[derive(Debug, Clone, Copy)]
struct Verifier {
    seed: [u8; 32],
    identifier: Identifier,
}

impl Verifier {
    fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            seed,
            identifier: identifier_for_seed(&seed),
        }
    }
}

/// Seed of the `index`th verifier in the initial rotation.
pub fn verifier_seed(index: usize) -> [u8; 32] {
    let mut seed = [0x5a; 32];
    seed[..8].copy_from_slice(&(index as u64 + 1).to_be_bytes());
    seed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Honest,
    /// Votes for a different hash first, then for its real choice.
    DoubleVote,
    /// The vote is not delivered until someone asks for it.
    LostVote,
}

/// What one verifier did at one height.
struct Ballot {
    position: usize,
    identifier: Identifier,
    delivered: Vec<(BlockVote, VoteOutcome)>,
    /// The vote this verifier stands by, delivered or not.
    vote: Option<BlockVote>,
}

struct BallotTask {
    position: usize,
    verifier: Verifier,
    local: bool,
    fault: Fault,
    height: u64,
    candidates: Arc<Vec<Arc<Block>>>,
    scorer: ChainScorer,
    manager: Arc<BlockVoteManager>,
}

impl BallotTask {
    async fn cast(self) -> Ballot {
        let identifier = self.verifier.identifier;
        let mut ballot = Ballot {
            position: self.position,
            identifier,
            delivered: Vec::new(),
            vote: None,
        };

        let choice = self
            .candidates
            .iter()
            .filter_map(|block| {
                self.scorer
                    .score(block, self.height - 1)
                    .definite()
                    .map(|score| (score, block.hash()))
            })
            .min();
        let Some((score, hash)) = choice else {
            debug!(verifier = %identifier, height = self.height, "no votable candidate");
            return ballot;
        };

        let vote = BlockVote::new(self.height, hash);
        ballot.vote = Some(vote);

        let outgoing = match self.fault {
            Fault::Honest => vec![vote],
            Fault::DoubleVote => vec![BlockVote::new(self.height, decoy(hash)), vote],
            Fault::LostVote => {
                debug!(verifier = %identifier, height = self.height, "vote lost in transit");
                Vec::new()
            }
        };

        for vote in outgoing {
            debug!(
                verifier = %identifier,
                height = self.height,
                score,
                hash = %vote.hash,
                "casting vote"
            );
            if let Some(outcome) = deliver(&self.manager, identifier, vote, self.local).await {
                ballot.delivered.push((vote, outcome));
            }
        }

        ballot
    }
}

fn decoy(hash: BlockHash) -> BlockHash {
    let mut bytes = hash.0;
    bytes[0] ^= 0xff;
    BlockHash(bytes)
}

/// Hand `vote` to the observer: local votes directly, remote ones over the
/// wire encoding.
async fn deliver(
    manager: &BlockVoteManager,
    identifier: Identifier,
    vote: BlockVote,
    local: bool,
) -> Option<VoteOutcome> {
    if local {
        return Some(manager.register_vote(identifier, vote, true).await);
    }
    match manager.register_vote_message(identifier, &vote.to_bytes()).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!(verifier = %identifier, error = %e, "vote rejected");
            None
        }
    }
}

/// Simulates a verifier cluster extending the chain.
pub struct Simulation {
    config: SimulationConfig,
    rng: StdRng,
    frozen: Arc<InMemoryFrozenChain>,
    view: ChainView,
    membership: Arc<ChainMembership>,
    collaborators: Collaborators,
    manager: Arc<BlockVoteManager>,
    requests: mpsc::UnboundedReceiver<PeerRequest>,
    rotation: Vec<Verifier>,
    observer: Identifier,
    outsider: Verifier,
    cast: HashMap<(Identifier, u64), BlockVote>,
    events: Vec<SimEvent>,
    last_tallies: Vec<BlockVoteTally>,
    last_freeze_timestamp: u64,
}

impl Simulation {
    /// Create a simulation with a frozen Genesis block verified by the
    /// first verifier in the rotation.
    pub fn new(config: SimulationConfig) -> Self {
        let rotation: Vec<Verifier> = (0..config.verifiers.max(1))
            .map(|i| Verifier::from_seed(verifier_seed(i)))
            .collect();
        let outsider = Verifier::from_seed(OUTSIDER_SEED);

        let frozen = Arc::new(InMemoryFrozenChain::new(GENESIS_START_TIMESTAMP));
        let view = ChainView::new(frozen.clone(), Arc::new(UnfrozenBlocks::new()));

        let mut genesis = Block::new(
            0,
            0,
            BlockHash::ZERO,
            GENESIS_START_TIMESTAMP,
            Vec::new(),
            BlockHash::ZERO,
        );
        genesis.sign(&rotation[0].seed, GENESIS_START_TIMESTAMP + BLOCK_DURATION_MS);
        let last_freeze_timestamp = genesis.verification_timestamp();
        frozen.freeze(Arc::new(genesis));
        frozen.set_open_edge(1);

        let mesh = rotation
            .iter()
            .enumerate()
            .map(|(i, v)| MeshNode {
                identifier: v.identifier,
                address: simulated_address(i),
            })
            .collect();
        let membership = Arc::new(ChainMembership::new(view.clone(), mesh));
        let (messenger, requests) = ChannelMessenger::new();
        let messenger = Arc::new(messenger);

        let policy = StaticPolicy {
            top_pending_new_verifier: config.new_verifier_at.map(|_| outsider.identifier),
            likely_accepting_new_verifiers: config.new_verifier_at.is_some(),
            ..StaticPolicy::default()
        };
        let collaborators = Collaborators {
            membership: membership.clone(),
            policy: Arc::new(policy),
            spam: Arc::new(FixedSpam(0)),
            messenger: messenger.clone(),
        };
        let manager = Arc::new(BlockVoteManager::new(view.clone(), membership.clone(), messenger));

        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            frozen,
            view,
            membership,
            collaborators,
            manager,
            requests,
            observer: rotation[0].identifier,
            rotation,
            outsider,
            cast: HashMap::new(),
            events: Vec::new(),
            last_tallies: Vec::new(),
            last_freeze_timestamp,
        }
    }

    /// Run until `config.blocks` heights are frozen or a height stalls.
    pub async fn run(mut self) -> SimulationReport {
        info!(
            verifiers = self.rotation.len(),
            blocks = self.config.blocks,
            seed = self.config.seed,
            "starting simulation"
        );

        let mut stalled_at = None;
        for height in 1..=self.config.blocks {
            if !self.advance(height).await {
                stalled_at = Some(height);
                break;
            }
        }

        let frozen_edge = self.frozen.frozen_edge_height();
        let final_cycle = self
            .frozen
            .frozen_block_at_height(frozen_edge)
            .and_then(|block| cycle_information(&self.view, &block));
        let mut vote_summaries = Vec::new();
        for height in self.manager.heights().await {
            vote_summaries.push(self.manager.vote_summary(height).await);
        }
        let recent_votes = self.manager.recent_votes().await;

        info!(frozen_edge, events = self.events.len(), "simulation finished");

        SimulationReport {
            frozen_edge,
            stalled_at,
            events: self.events,
            final_cycle,
            last_tallies: self.last_tallies,
            vote_summaries,
            recent_votes,
        }
    }

    /// Propose, vote on and freeze one height. Returns false if no block
    /// could be frozen.
    async fn advance(&mut self, height: u64) -> bool {
        // Each height starts at its nominal slot.
        self.frozen.set_open_edge(height + 1);

        let Some(previous) = self.frozen.frozen_block_at_height(height - 1) else {
            warn!(height, "no frozen block to extend");
            return false;
        };

        let mut candidates = vec![self.propose(self.next_proposer(&previous), &previous)];
        if self.config.new_verifier_at == Some(height)
            && !self.is_in_rotation(&self.outsider.identifier)
        {
            candidates.push(self.propose(self.outsider, &previous));
        }
        for block in &candidates {
            self.view.unfrozen().insert(block.clone());
            self.record_proposal(block);
        }

        for ballot in self.collect_ballots(height, Arc::new(candidates)).await {
            if let Some(vote) = ballot.vote {
                self.cast.insert((ballot.identifier, height), vote);
            }
            for (vote, outcome) in ballot.delivered {
                self.record_delivery(ballot.identifier, vote, outcome);
            }
        }

        let mut winner = self.tally(&previous).await;
        if winner.is_none() {
            // Wait long enough for missing votes to be requested.
            self.frozen.set_open_edge(height + 1 + MISSING_VOTE_REQUEST_LAG);
            self.manager.request_missing_votes().await;
            self.service_requests().await;
            winner = self.tally(&previous).await;
        }
        self.service_requests().await;

        match winner.and_then(|hash| self.view.unfrozen().block(height, &hash)) {
            Some(block) => {
                self.freeze(block).await;
                true
            }
            None => {
                let summary = self.manager.vote_summary(height).await;
                warn!(
                    height,
                    voters = summary.voters,
                    leading = summary.leading_votes,
                    "no block reached the vote threshold"
                );
                self.events.push(SimEvent::HeightStalled {
                    height,
                    voters: summary.voters,
                    leading_votes: summary.leading_votes,
                });
                false
            }
        }
    }

    fn next_proposer(&self, previous: &Block) -> Verifier {
        let position = self
            .rotation
            .iter()
            .position(|v| v.identifier == *previous.verifier_identifier())
            .map(|p| (p + 1) % self.rotation.len())
            .unwrap_or(0);
        self.rotation[position]
    }

    fn is_in_rotation(&self, identifier: &Identifier) -> bool {
        self.rotation.iter().any(|v| v.identifier == *identifier)
    }

    fn propose(&self, verifier: Verifier, previous: &Block) -> Arc<Block> {
        let start = previous.start_timestamp() + BLOCK_DURATION_MS;
        let mut block = Block::new(
            previous.blockchain_version(),
            previous.height() + 1,
            previous.hash(),
            start,
            Vec::new(),
            BlockHash::ZERO,
        );
        block.sign(&verifier.seed, start + BLOCK_DURATION_MS);
        Arc::new(block)
    }

    fn scorer(&self, identifier: Identifier) -> ChainScorer {
        ChainScorer::new(self.view.clone(), self.collaborators.clone(), identifier)
            .with_now(self.frozen.now())
    }

    fn record_proposal(&mut self, block: &Block) {
        let scorer = self.scorer(self.observer);
        let score = scorer.score(block, block.height() - 1);
        let continuity = continuity_state(&self.view, block);
        let min_vote_timestamp = scorer.minimum_vote_timestamp(block, self.last_freeze_timestamp);

        info!(
            height = block.height(),
            verifier = %block.verifier_identifier(),
            %score,
            ?continuity,
            "block proposed"
        );
        self.events.push(SimEvent::BlockProposed {
            height: block.height(),
            hash: block.hash(),
            verifier: *block.verifier_identifier(),
            score,
            continuity,
            min_vote_timestamp,
        });
    }

    /// Pick a verifier other than the observer to misbehave at `height`.
    fn faulty_voter(&mut self, height: u64, every: Option<u64>) -> Option<usize> {
        let every = every?;
        if height % every != 0 || self.rotation.len() < 2 {
            return None;
        }
        Some(self.rng.gen_range(1..self.rotation.len()))
    }

    async fn collect_ballots(
        &mut self,
        height: u64,
        candidates: Arc<Vec<Arc<Block>>>,
    ) -> Vec<Ballot> {
        let double_voter = self.faulty_voter(height, self.config.cancel_every);
        let lost_voter = self.faulty_voter(height, self.config.lose_vote_every);

        let mut order: Vec<usize> = (0..self.rotation.len()).collect();
        order.shuffle(&mut self.rng);

        let mut tasks = JoinSet::new();
        for (position, index) in order.into_iter().enumerate() {
            let verifier = self.rotation[index];
            let fault = if Some(index) == double_voter {
                Fault::DoubleVote
            } else if Some(index) == lost_voter {
                Fault::LostVote
            } else {
                Fault::Honest
            };
            let task = BallotTask {
                position,
                verifier,
                local: verifier.identifier == self.observer,
                fault,
                height,
                candidates: candidates.clone(),
                scorer: self.scorer(verifier.identifier),
                manager: self.manager.clone(),
            };
            tasks.spawn(task.cast());
        }

        let mut ballots = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(ballot) => ballots.push(ballot),
                Err(e) => warn!(height, error = %e, "voter task failed"),
            }
        }
        ballots.sort_by_key(|b| b.position);
        ballots
    }

    fn record_delivery(&mut self, verifier: Identifier, vote: BlockVote, outcome: VoteOutcome) {
        match outcome {
            VoteOutcome::OutsideWindow => {
                debug!(verifier = %verifier, height = vote.height, "vote fell outside the window");
            }
            VoteOutcome::Recorded | VoteOutcome::Cancelled => {
                self.events.push(SimEvent::VoteCast {
                    height: vote.height,
                    verifier,
                    hash: vote.hash,
                });
                if outcome == VoteOutcome::Cancelled {
                    self.events.push(SimEvent::VoteCancelled {
                        height: vote.height,
                        verifier,
                    });
                }
            }
        }
    }

    async fn tally(&mut self, previous: &Block) -> Option<BlockHash> {
        let edge = BlockVoteTally::frozen_edge(previous.height(), previous.hash());
        self.last_tallies = self.manager.tallies_extending(&[edge]).await;
        self.manager.winning_hash_for_height(previous.height() + 1).await
    }

    /// Answer queued peer requests. Vote requests are answered with the
    /// vote the verifier already cast, if any.
    async fn service_requests(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            match request {
                PeerRequest::FetchBlock { height, hash } => {
                    debug!(height, %hash, "block requested from peers");
                    self.events.push(SimEvent::MissingBlockRequested { height, hash });
                }
                PeerRequest::BlockVote { identifier, height } => {
                    self.events.push(SimEvent::MissingVotesRequested {
                        height,
                        verifier: identifier,
                    });
                    let Some(vote) = self.cast.get(&(identifier, height)).copied() else {
                        continue;
                    };
                    let local = identifier == self.observer;
                    if let Some(outcome) = deliver(&self.manager, identifier, vote, local).await {
                        self.record_delivery(identifier, vote, outcome);
                    }
                }
            }
        }
    }

    async fn freeze(&mut self, block: Arc<Block>) {
        let height = block.height();
        let hash = block.hash();
        let verifier = *block.verifier_identifier();
        let (votes, threshold) = self
            .last_tallies
            .iter()
            .find(|t| t.choice == VoteChoice::Block(hash))
            .map(|t| (t.votes, t.threshold))
            .unwrap_or_default();

        self.frozen.freeze(block.clone());
        self.view.unfrozen().remove_at_or_below(height);
        self.manager.remove_old_votes().await;
        self.cast.retain(|(_, h), _| *h > height);
        self.last_freeze_timestamp = self.frozen.now();

        if verifier == self.outsider.identifier && !self.is_in_rotation(&verifier) {
            self.admit(&block);
        }

        info!(height, %hash, verifier = %verifier, votes, threshold, "block frozen");
        self.events.push(SimEvent::BlockFrozen {
            height,
            hash,
            verifier,
            votes,
            threshold,
        });
    }

    /// Insert the outsider into the rotation in the slot it took.
    fn admit(&mut self, block: &Block) {
        let position = self
            .view
            .previous_block(block)
            .and_then(|p| {
                self.rotation
                    .iter()
                    .position(|v| v.identifier == *p.verifier_identifier())
            })
            .map(|p| p + 1)
            .unwrap_or(self.rotation.len());
        self.rotation.insert(position, self.outsider);
        self.membership.join(MeshNode {
            identifier: self.outsider.identifier,
            address: simulated_address(self.rotation.len()),
        });
        info!(verifier = %self.outsider.identifier, position, "new verifier joined the rotation");
    }
}
