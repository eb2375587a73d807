//! Ancestor lookup across frozen and unfrozen blocks.
//!
//! Blocks at or below the frozen edge come from persistent storage, keyed
//! by height alone. Blocks above it live in memory, keyed by height and
//! hash, since several competing candidates may exist at one height.
//! [`ChainView::previous_block`] picks the store by height so callers walk
//! the chain without caring where a block lives.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use cadence_chain::{Block, BlockHash, BLOCK_DURATION_MS};

/// Persistent storage of frozen blocks.
pub trait FrozenChain: Send + Sync {
    /// The frozen block at `height`, if stored.
    fn frozen_block_at_height(&self, height: u64) -> Option<Arc<Block>>;

    /// Highest frozen height.
    fn frozen_edge_height(&self) -> u64;

    /// Lowest height still eligible for new blocks and votes. With
    /// `include_grace`, the edge is computed slightly ahead of the clock to
    /// tolerate peers whose clocks run fast.
    fn open_edge_height(&self, include_grace: bool) -> u64;
}

/// Candidate blocks above the frozen edge, by height and hash.
#[derive(Debug, Default)]
pub struct UnfrozenBlocks {
    blocks: RwLock<HashMap<u64, HashMap<BlockHash, Arc<Block>>>>,
}

impl UnfrozenBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a candidate. Returns false if a block with the same hash was
    /// already present at that height.
    pub fn insert(&self, block: Arc<Block>) -> bool {
        let mut blocks = self.blocks.write().unwrap_or_else(|e| e.into_inner());
        blocks
            .entry(block.height())
            .or_default()
            .insert(block.hash(), block)
            .is_none()
    }

    pub fn block(&self, height: u64, hash: &BlockHash) -> Option<Arc<Block>> {
        let blocks = self.blocks.read().unwrap_or_else(|e| e.into_inner());
        blocks.get(&height)?.get(hash).cloned()
    }

    /// All candidates at `height`, ordered by hash.
    pub fn blocks_at_height(&self, height: u64) -> Vec<Arc<Block>> {
        let blocks = self.blocks.read().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<_> = blocks
            .get(&height)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        found.sort_by_key(|b| b.hash());
        found
    }

    /// Drop every candidate at or below `height`.
    pub fn remove_at_or_below(&self, height: u64) {
        let mut blocks = self.blocks.write().unwrap_or_else(|e| e.into_inner());
        blocks.retain(|h, _| *h > height);
    }

    pub fn len(&self) -> usize {
        let blocks = self.blocks.read().unwrap_or_else(|e| e.into_inner());
        blocks.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A block reached during a backward walk: the caller's starting block or a
/// shared ancestor from one of the stores.
pub enum BlockRef<'a> {
    Borrowed(&'a Block),
    Shared(Arc<Block>),
}

impl std::ops::Deref for BlockRef<'_> {
    type Target = Block;

    fn deref(&self) -> &Block {
        match self {
            BlockRef::Borrowed(block) => block,
            BlockRef::Shared(block) => block,
        }
    }
}

/// A combined view of frozen and unfrozen blocks.
#[derive(Clone)]
pub struct ChainView {
    frozen: Arc<dyn FrozenChain>,
    unfrozen: Arc<UnfrozenBlocks>,
}

impl ChainView {
    pub fn new(frozen: Arc<dyn FrozenChain>, unfrozen: Arc<UnfrozenBlocks>) -> Self {
        Self { frozen, unfrozen }
    }

    pub fn frozen(&self) -> &dyn FrozenChain {
        self.frozen.as_ref()
    }

    pub fn unfrozen(&self) -> &UnfrozenBlocks {
        &self.unfrozen
    }

    pub fn frozen_edge_height(&self) -> u64 {
        self.frozen.frozen_edge_height()
    }

    pub fn open_edge_height(&self, include_grace: bool) -> u64 {
        self.frozen.open_edge_height(include_grace)
    }

    /// The logical predecessor of `block`: the block one height down whose
    /// hash equals `block`'s previous-block hash. `None` for the Genesis
    /// block or when the predecessor is not known locally.
    pub fn previous_block(&self, block: &Block) -> Option<Arc<Block>> {
        let height = block.height();
        if height == 0 {
            return None;
        }

        if height <= self.frozen.frozen_edge_height() + 1 {
            self.frozen
                .frozen_block_at_height(height - 1)
                .filter(|b| b.hash() == *block.previous_block_hash())
        } else {
            self.unfrozen.block(height - 1, block.previous_block_hash())
        }
    }

    /// A block at `height` with `hash`, frozen or not.
    pub fn block(&self, height: u64, hash: &BlockHash) -> Option<Arc<Block>> {
        if height <= self.frozen.frozen_edge_height() {
            self.frozen
                .frozen_block_at_height(height)
                .filter(|b| b.hash() == *hash)
        } else {
            self.unfrozen.block(height, hash)
        }
    }

    /// Hash of the frozen block at `height`. Used to resolve transaction
    /// previous-hash heights when decoding.
    pub fn frozen_hash_at_height(&self, height: u64) -> Option<BlockHash> {
        self.frozen.frozen_block_at_height(height).map(|b| b.hash())
    }
}

impl std::fmt::Debug for ChainView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainView")
            .field("frozen_edge", &self.frozen.frozen_edge_height())
            .field("unfrozen", &self.unfrozen.len())
            .finish()
    }
}

/// Grace added to the clock for [`FrozenChain::open_edge_height`] with
/// `include_grace`.
pub const OPEN_EDGE_GRACE_MS: u64 = 2_000;

/// An in-memory frozen chain with a settable clock.
///
/// The open edge is derived from the clock the same way a live node derives
/// it: the number of whole block durations since the Genesis start time.
#[derive(Debug)]
pub struct InMemoryFrozenChain {
    blocks: RwLock<BTreeMap<u64, Arc<Block>>>,
    genesis_start_timestamp: u64,
    now_millis: AtomicU64,
}

impl InMemoryFrozenChain {
    pub fn new(genesis_start_timestamp: u64) -> Self {
        Self {
            blocks: RwLock::new(BTreeMap::new()),
            genesis_start_timestamp,
            now_millis: AtomicU64::new(genesis_start_timestamp),
        }
    }

    /// Freeze `block`. Replaces any frozen block at the same height.
    pub fn freeze(&self, block: Arc<Block>) {
        let mut blocks = self.blocks.write().unwrap_or_else(|e| e.into_inner());
        blocks.insert(block.height(), block);
    }

    pub fn set_now(&self, now_millis: u64) {
        self.now_millis.store(now_millis, Ordering::SeqCst);
    }

    pub fn now(&self) -> u64 {
        self.now_millis.load(Ordering::SeqCst)
    }

    /// Move the clock so that `open_edge_height(false)` returns `height`.
    pub fn set_open_edge(&self, height: u64) {
        self.set_now(self.genesis_start_timestamp + height * BLOCK_DURATION_MS);
    }
}

impl FrozenChain for InMemoryFrozenChain {
    fn frozen_block_at_height(&self, height: u64) -> Option<Arc<Block>> {
        let blocks = self.blocks.read().unwrap_or_else(|e| e.into_inner());
        blocks.get(&height).cloned()
    }

    fn frozen_edge_height(&self) -> u64 {
        let blocks = self.blocks.read().unwrap_or_else(|e| e.into_inner());
        blocks.keys().next_back().copied().unwrap_or(0)
    }

    fn open_edge_height(&self, include_grace: bool) -> u64 {
        let grace = if include_grace { OPEN_EDGE_GRACE_MS } else { 0 };
        let elapsed = (self.now() + grace).saturating_sub(self.genesis_start_timestamp);
        elapsed / BLOCK_DURATION_MS
    }
}
