//! Chain fixtures shared by unit tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use cadence_chain::{identifier_for_seed, Block, BlockHash, Identifier, BLOCK_DURATION_MS};

use crate::chain::{ChainView, InMemoryFrozenChain, UnfrozenBlocks};
use crate::collaborators::{MeshNode, PeerMessenger};

pub const GENESIS_START: u64 = 1_600_000_000_000;

pub const VERIFIER_SEEDS: [[u8; 32]; 4] = [[1u8; 32], [2u8; 32], [3u8; 32], [4u8; 32]];

pub const NEW_VERIFIER_SEED: [u8; 32] = [5u8; 32];

/// A clock well past any fixture timestamp.
pub const LATE_NOW: u64 = GENESIS_START + 1_000 * BLOCK_DURATION_MS;

pub fn identifiers(seeds: &[[u8; 32]]) -> Vec<Identifier> {
    seeds.iter().map(identifier_for_seed).collect()
}

fn signed(previous_hash: BlockHash, height: u64, version: u16, seed: &[u8; 32]) -> Block {
    let start = GENESIS_START + height * BLOCK_DURATION_MS;
    let balance_hash = BlockHash([height as u8; 32]);
    let mut block = Block::new(version, height, previous_hash, start, Vec::new(), balance_hash);
    block.sign(seed, start + BLOCK_DURATION_MS);
    block
}

/// A chain of `length` blocks from Genesis, verified in rotation by `seeds`.
pub fn chain_of(seeds: &[[u8; 32]], length: u64) -> Vec<Arc<Block>> {
    let mut blocks: Vec<Arc<Block>> = Vec::new();
    for height in 0..length {
        let previous_hash = blocks.last().map(|b| b.hash()).unwrap_or(BlockHash::ZERO);
        let seed = &seeds[(height as usize) % seeds.len()];
        blocks.push(Arc::new(signed(previous_hash, height, 0, seed)));
    }
    blocks
}

/// A block extending `previous`, verified by `seed`.
pub fn block_after(previous: &Block, seed: &[u8; 32]) -> Block {
    signed(previous.hash(), previous.height() + 1, previous.blockchain_version(), seed)
}

/// Like [`block_after`] with an explicit version and verification timestamp.
pub fn block_after_with(
    previous: &Block,
    seed: &[u8; 32],
    version: u16,
    verification_timestamp: u64,
) -> Block {
    let mut block = Block::new(
        version,
        previous.height() + 1,
        previous.hash(),
        previous.start_timestamp() + BLOCK_DURATION_MS,
        Vec::new(),
        BlockHash::ZERO,
    );
    block.sign(seed, verification_timestamp);
    block
}

/// A view over `blocks`, freezing every block at or below `frozen_through`
/// and pooling the rest as unfrozen. The open edge sits just past the tip.
pub fn view_of(
    blocks: &[Arc<Block>],
    frozen_through: u64,
) -> (ChainView, Arc<InMemoryFrozenChain>) {
    let frozen = Arc::new(InMemoryFrozenChain::new(GENESIS_START));
    let unfrozen = Arc::new(UnfrozenBlocks::new());
    for block in blocks {
        if block.height() <= frozen_through {
            frozen.freeze(block.clone());
        } else {
            unfrozen.insert(block.clone());
        }
    }
    let tip = blocks.last().map(|b| b.height()).unwrap_or(0);
    frozen.set_open_edge(tip + 2);
    (ChainView::new(frozen.clone(), unfrozen), frozen)
}

pub fn mesh_node(identifier: Identifier, port: u16) -> MeshNode {
    MeshNode {
        identifier,
        address: SocketAddr::from(([127, 0, 0, 1], port)),
    }
}

/// Records every request instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingMessenger {
    pub block_fetches: Mutex<Vec<(u64, BlockHash)>>,
    pub vote_requests: Mutex<Vec<(Identifier, u64)>>,
}

impl PeerMessenger for RecordingMessenger {
    fn fetch_missing_block(&self, height: u64, hash: BlockHash) {
        self.block_fetches.lock().unwrap().push((height, hash));
    }

    fn request_block_vote(&self, node: &MeshNode, height: u64) {
        self.vote_requests.lock().unwrap().push((node.identifier, height));
    }
}
