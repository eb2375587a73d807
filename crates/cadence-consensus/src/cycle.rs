//! Cycle analysis.
//!
//! Walking backward from a block, a cycle closes when the verifier about to
//! be added to the window is already in it; the window size at that moment
//! is the cycle length. Four consecutive "primary" cycles are measured
//! starting from the block itself. In a stable rotation every verifier
//! closes the cycle it started, so a block whose own cycle is closed by a
//! different verifier comes from a new verifier.

use std::collections::{HashSet, VecDeque};

use cadence_chain::{Block, CycleInformation, Identifier};
use tracing::trace;

use crate::chain::{BlockRef, ChainView};

/// Cycle information for `block`, computed on first success and cached on
/// the block. `None` when the known chain is too short to close four cycles
/// and does not reach the Genesis block; retry once more blocks are known.
pub fn cycle_information(view: &ChainView, block: &Block) -> Option<CycleInformation> {
    if let Some(info) = block.cycle_information() {
        return Some(*info);
    }

    let info = analyze(view, block)?;
    trace!(height = block.height(), %info, "cycle information computed");
    Some(*block.cache_cycle_information(info))
}

fn analyze(view: &ChainView, block: &Block) -> Option<CycleInformation> {
    let height = block.height() as i64;

    // Front is the lowest height; back is the highest still in the window.
    let mut window: VecDeque<Identifier> = VecDeque::new();
    let mut members: HashSet<Identifier> = HashSet::new();

    let mut lengths = [0i64; 4];
    let mut index = 0usize;
    let mut primary_end = height;
    let mut cycle_end = height;
    let mut maximum = 0i64;
    let mut new_verifier = false;
    let mut in_genesis_cycle = false;
    let mut reached_genesis = false;

    let mut current = Some(BlockRef::Borrowed(block));
    while index < 4 {
        let Some(b) = current else { break };
        let identifier = *b.verifier_identifier();

        // One pass per cycle end height. When a new verifier joined, several
        // end heights share a start block.
        while index < 4 && members.contains(&identifier) {
            let length = window.len() as i64;

            if index == 0 {
                new_verifier = identifier != *block.verifier_identifier();
            }

            if cycle_end == primary_end {
                lengths[index] = length;
                primary_end -= length;
                index += 1;
            }

            // The cycle ending at the block itself is added at the end; the
            // final primary closure lies outside the lookback.
            if index < 4 && cycle_end != height {
                maximum = maximum.max(length);
            }

            cycle_end -= 1;
            if let Some(removed) = window.pop_back() {
                members.remove(&removed);
            }
        }

        window.push_front(identifier);
        members.insert(identifier);

        if b.height() == 0 && index < 4 {
            reached_genesis = true;

            let length = primary_end + 1;
            lengths[index] = length;
            maximum = maximum.max(length - 1);

            if index == 0 {
                in_genesis_cycle = true;
                new_verifier = true;
            } else if index < 3 || cycle_end != primary_end {
                // The window holds a cycle not yet closed by the walk.
                maximum = maximum.max(window.len() as i64);
            }
        }

        current = view.previous_block(&b).map(BlockRef::Shared);
    }

    if index < 4 && !reached_genesis {
        return None;
    }

    maximum = maximum.max(lengths[0]);

    Some(CycleInformation {
        height: block.height(),
        maximum_cycle_length: maximum as u32,
        cycle_lengths: lengths.map(|l| l as u32),
        new_verifier,
        in_genesis_cycle,
    })
}
