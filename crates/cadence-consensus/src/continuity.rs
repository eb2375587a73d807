//! Proof-of-diversity continuity.
//!
//! Rule 1 (spacing): a new verifier outside the Genesis cycle is admitted
//! only if no block in its own cycle, the previous cycle, or the block just
//! before those was itself from a new verifier.
//!
//! Rule 2 (minimum cycle length): past the Genesis block, a block's cycle
//! must be longer than half of one more than the maximum cycle length.

use cadence_chain::{Block, ContinuityState};
use tracing::trace;

use crate::chain::{BlockRef, ChainView};
use crate::cycle::cycle_information;

/// Continuity of `block`. Settled verdicts are cached on the block;
/// `Undetermined` is recomputed on every call.
pub fn continuity_state(view: &ChainView, block: &Block) -> ContinuityState {
    if let Some(state) = block.continuity_state() {
        return state;
    }

    let state = evaluate(view, block);
    trace!(height = block.height(), ?state, "continuity evaluated");
    block.cache_continuity_state(state)
}

fn evaluate(view: &ChainView, block: &Block) -> ContinuityState {
    let Some(info) = cycle_information(view, block) else {
        return ContinuityState::Undetermined;
    };

    let mut rule_1_pass = true;
    let mut sufficient_information = true;

    if !info.in_genesis_cycle && info.new_verifier {
        let start_check_height = block.height() as i64
            - info.cycle_length(0) as i64
            - info.cycle_length(1) as i64
            - 1;

        let mut current = view.previous_block(block).map(BlockRef::Shared);
        sufficient_information = current.is_some();

        while let Some(b) = current {
            if (b.height() as i64) < start_check_height || !rule_1_pass || !sufficient_information {
                break;
            }

            match cycle_information(view, &b) {
                None => sufficient_information = false,
                Some(ancestor) if ancestor.new_verifier => rule_1_pass = false,
                Some(_) => {}
            }

            let previous = view.previous_block(&b);
            if (b.height() as i64) > start_check_height && previous.is_none() {
                sufficient_information = false;
            }

            current = previous.map(BlockRef::Shared);
        }
    }

    if !sufficient_information {
        ContinuityState::Undetermined
    } else if !rule_1_pass {
        ContinuityState::Discontinuous
    } else {
        let threshold = (info.maximum_cycle_length as u64 + 1) / 2;
        let rule_2_pass = block.height() == 0 || info.current_cycle_length() as u64 > threshold;
        if rule_2_pass {
            ContinuityState::Continuous
        } else {
            ContinuityState::Discontinuous
        }
    }
}
