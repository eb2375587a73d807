//! End-to-end scenarios across the chain model, consensus core and simulator.

use std::net::SocketAddr;
use std::sync::Arc;

use cadence_chain::{
    identifier_for_seed, Block, BlockHash, ContinuityState, Identifier, Transaction, Transfer,
    BLOCK_DURATION_MS,
};
use cadence_consensus::{
    continuity_state, BlockVote, BlockVoteManager, BlockVoteTally, ChainScore, ChainScorer,
    ChainView, Collaborators, FixedSpam, InMemoryFrozenChain, MeshNode, PeerMessenger,
    StaticMembership, StaticPolicy, UnfrozenBlocks, VoteChoice, VoteOutcome,
};
use cadence_sim::{SimEvent, Simulation, SimulationConfig};

const GENESIS_START: u64 = 1_600_000_000_000;
const LATE_NOW: u64 = GENESIS_START + 1_000 * BLOCK_DURATION_MS;

struct Quiet;

impl PeerMessenger for Quiet {
    fn fetch_missing_block(&self, _height: u64, _hash: BlockHash) {}

    fn request_block_vote(&self, _node: &MeshNode, _height: u64) {}
}

fn seeds(count: u8) -> Vec<[u8; 32]> {
    (1..=count).map(|i| [i; 32]).collect()
}

fn ids(seeds: &[[u8; 32]]) -> Vec<Identifier> {
    seeds.iter().map(identifier_for_seed).collect()
}

fn mesh(seeds: &[[u8; 32]]) -> Vec<MeshNode> {
    ids(seeds)
        .into_iter()
        .enumerate()
        .map(|(i, identifier)| MeshNode {
            identifier,
            address: SocketAddr::from(([10, 0, 0, 1], 9444 + i as u16)),
        })
        .collect()
}

fn next_block(previous: Option<&Block>, seed: &[u8; 32], transactions: Vec<Transaction>) -> Block {
    let height = previous.map(|p| p.height() + 1).unwrap_or(0);
    let previous_hash = previous.map(|p| p.hash()).unwrap_or(BlockHash::ZERO);
    let start = GENESIS_START + height * BLOCK_DURATION_MS;
    let mut block = Block::new(0, height, previous_hash, start, transactions, BlockHash::ZERO);
    block.sign(seed, start + BLOCK_DURATION_MS);
    block
}

fn rotation(seeds: &[[u8; 32]], length: usize) -> Vec<Arc<Block>> {
    let mut blocks: Vec<Arc<Block>> = Vec::new();
    for height in 0..length {
        let seed = &seeds[height % seeds.len()];
        let block = next_block(blocks.last().map(|b| b.as_ref()), seed, Vec::new());
        blocks.push(Arc::new(block));
    }
    blocks
}

fn view(blocks: &[Arc<Block>], frozen_through: u64, open_edge: u64) -> ChainView {
    let frozen = Arc::new(InMemoryFrozenChain::new(GENESIS_START));
    let unfrozen = Arc::new(UnfrozenBlocks::new());
    for block in blocks {
        if block.height() <= frozen_through {
            frozen.freeze(block.clone());
        } else {
            unfrozen.insert(block.clone());
        }
    }
    frozen.set_open_edge(open_edge);
    ChainView::new(frozen, unfrozen)
}

fn scorer(view: ChainView, cycle: &[[u8; 32]]) -> ChainScorer {
    let collaborators = Collaborators {
        membership: Arc::new(StaticMembership::new(ids(cycle), mesh(cycle))),
        policy: Arc::new(StaticPolicy::default()),
        spam: Arc::new(FixedSpam(0)),
        messenger: Arc::new(Quiet),
    };
    ChainScorer::new(view, collaborators, Identifier([0xab; 32])).with_now(LATE_NOW)
}

fn manager(view: ChainView, cycle: &[[u8; 32]]) -> BlockVoteManager {
    let membership = Arc::new(StaticMembership::new(ids(cycle), mesh(cycle)));
    BlockVoteManager::new(view, membership, Arc::new(Quiet))
}

#[test]
fn established_verifier_beats_intruder_after_twelve_blocks() {
    let seeds = seeds(4);
    let blocks = rotation(&seeds, 12);
    let view = view(&blocks, 11, 13);
    for block in &blocks {
        assert_eq!(continuity_state(&view, block), ContinuityState::Continuous);
    }

    let scorer = scorer(view, &seeds);
    let established = next_block(Some(&blocks[11]), &seeds[0], Vec::new());
    let intruder = next_block(Some(&blocks[11]), &[0x77; 32], Vec::new());

    let established_score = scorer.score(&established, 11);
    let intruder_score = scorer.score(&intruder, 11);
    assert_eq!(established_score, ChainScore::Definite(0));
    assert!(intruder_score > established_score);
    assert!(intruder_score.as_sentinel() >= established_score.as_sentinel() + 10_000);
}

#[test]
fn block_received_over_the_wire_scores_like_the_sent_block() {
    let seeds = seeds(4);
    let blocks = rotation(&seeds, 12);
    let previous = &blocks[11];

    // The transfer anchors to a frozen block two behind its parent, so the
    // decoder has to look the hash up in the frozen chain.
    let sender = [0x42; 32];
    let transfer = Transfer {
        timestamp: GENESIS_START + 12 * BLOCK_DURATION_MS + 250,
        amount: 1_000,
        receiver: identifier_for_seed(&[0x43; 32]),
        previous_hash_height: 9,
        previous_block_hash: blocks[9].hash(),
        sender_data: b"rent".to_vec(),
    };
    let sent = next_block(
        Some(previous),
        &seeds[0],
        vec![Transaction::standard(transfer, &sender)],
    );

    let view = view(&blocks, 11, 13);
    let bytes = sent.to_bytes(true);
    let received = Block::from_bytes(&bytes, true, &|h| view.frozen_hash_at_height(h)).unwrap();
    assert_eq!(received, sent);
    assert_eq!(received.transactions().len(), 1);
    assert_eq!(*received.transactions()[0].previous_block_hash(), blocks[9].hash());
    assert!(received.transactions()[0].signature_is_valid());
    assert!(received.signature_is_valid());

    let unresolved = Block::from_bytes(&bytes, false, &|_| None).unwrap();
    assert!(!unresolved.transactions()[0].signature_is_valid());

    let scorer = scorer(view, &seeds);
    assert_eq!(scorer.score(&received, 11), ChainScore::Definite(0));
}

#[tokio::test]
async fn four_of_five_votes_freeze_a_height() {
    let seeds = seeds(5);
    let voters = ids(&seeds);
    let blocks = rotation(&seeds, 20);
    let manager = manager(view(&blocks, 10, 21), &seeds);
    let hash = blocks[11].hash();

    for voter in &voters[..3] {
        let outcome = manager
            .register_vote_message(*voter, &BlockVote::new(11, hash).to_bytes())
            .await
            .unwrap();
        assert_eq!(outcome, VoteOutcome::Recorded);
    }
    assert_eq!(manager.winning_hash_for_height(11).await, None);

    manager.register_vote(voters[3], BlockVote::new(11, hash), true).await;
    assert_eq!(manager.winning_hash_for_height(11).await, Some(hash));

    let tallies = manager
        .tallies_extending(&[BlockVoteTally::frozen_edge(10, blocks[10].hash())])
        .await;
    assert_eq!(tallies.len(), 1);
    assert_eq!(tallies[0].choice, VoteChoice::Block(hash));
    assert_eq!(tallies[0].votes, 4);
    assert_eq!(tallies[0].threshold, 3);
}

#[tokio::test]
async fn inconsistent_vote_stays_cancelled() {
    let seeds = seeds(5);
    let voters = ids(&seeds);
    let blocks = rotation(&seeds, 20);
    let view = view(&blocks, 10, 21);
    let fork = Arc::new(next_block(Some(&blocks[10]), &[0x99; 32], Vec::new()));
    view.unfrozen().insert(fork.clone());
    let manager = manager(view, &seeds);
    let hash = blocks[11].hash();

    assert_eq!(
        manager.register_vote(voters[0], BlockVote::new(11, hash), false).await,
        VoteOutcome::Recorded
    );
    assert_eq!(
        manager.register_vote(voters[0], BlockVote::new(11, fork.hash()), false).await,
        VoteOutcome::Cancelled
    );
    // Returning to the first choice does not restore the vote.
    assert_eq!(
        manager.register_vote(voters[0], BlockVote::new(11, hash), false).await,
        VoteOutcome::Cancelled
    );
    assert_eq!(manager.vote_of(&voters[0], 11).await, Some(VoteChoice::Cancelled));

    for voter in &voters[1..4] {
        manager.register_vote(*voter, BlockVote::new(11, hash), false).await;
    }
    assert_eq!(manager.winning_hash_for_height(11).await, None);

    manager.register_vote(voters[4], BlockVote::new(11, hash), false).await;
    assert_eq!(manager.winning_hash_for_height(11).await, Some(hash));
}

#[tokio::test]
async fn explicit_cancellation_reaches_back() {
    let seeds = seeds(5);
    let voters = ids(&seeds);
    let blocks = rotation(&seeds, 20);
    let manager = manager(view(&blocks, 10, 21), &seeds);

    manager.register_vote(voters[2], BlockVote::new(11, blocks[11].hash()), false).await;
    let retraction = BlockVote::new(12, blocks[12].hash()).with_cancellation(0, 1);
    manager
        .register_vote_message(voters[2], &retraction.to_bytes())
        .await
        .unwrap();

    assert_eq!(manager.vote_of(&voters[2], 11).await, Some(VoteChoice::Cancelled));
    assert_eq!(
        manager.vote_of(&voters[2], 12).await,
        Some(VoteChoice::Block(blocks[12].hash()))
    );
}

#[tokio::test]
async fn malformed_vote_leaves_state_untouched() {
    let seeds = seeds(5);
    let voters = ids(&seeds);
    let blocks = rotation(&seeds, 20);
    let manager = manager(view(&blocks, 10, 21), &seeds);

    let zero = BlockVote::new(11, BlockHash::ZERO).to_bytes();
    assert!(manager.register_vote_message(voters[0], &zero).await.is_err());
    let truncated = BlockVote::new(11, blocks[11].hash()).to_bytes();
    assert!(manager.register_vote_message(voters[0], &truncated[..30]).await.is_err());

    assert!(manager.heights().await.is_empty());
}

#[tokio::test]
async fn simulated_cluster_survives_double_votes() {
    let report = Simulation::new(SimulationConfig {
        verifiers: 5,
        blocks: 15,
        cancel_every: Some(5),
        ..SimulationConfig::default()
    })
    .run()
    .await;

    assert_eq!(report.stalled_at, None);
    assert_eq!(report.frozen_edge, 15);
    assert_eq!(report.final_cycle.map(|c| c.current_cycle_length()), Some(5));
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, SimEvent::VoteCancelled { height: 5, .. })));
}
