//! Per-block cycle facts and continuity verdicts.
//!
//! Both are computed in `cadence-consensus` and cached on the block once
//! settled.

use serde::Serialize;

/// The shape of the verifier cycle as seen from one block.
///
/// `cycle_lengths[0]` is the cycle ending at this block, `[1]` the cycle
/// before that, and so on. Lengths that reach back to the Genesis block
/// count the Genesis block itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleInformation {
    pub height: u64,
    pub maximum_cycle_length: u32,
    pub cycle_lengths: [u32; 4],
    pub new_verifier: bool,
    pub in_genesis_cycle: bool,
}

impl CycleInformation {
    /// Length of the cycle `index` positions back (0..=3).
    pub fn cycle_length(&self, index: usize) -> u32 {
        self.cycle_lengths[index]
    }

    /// Length of the cycle ending at this block.
    pub fn current_cycle_length(&self) -> u32 {
        self.cycle_lengths[0]
    }
}

impl std::fmt::Display for CycleInformation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[CycleInformation:height={},max={},lengths={:?},new={},genesis={}]",
            self.height,
            self.maximum_cycle_length,
            self.cycle_lengths,
            self.new_verifier,
            self.in_genesis_cycle
        )
    }
}

/// Whether a block keeps the chain's verifier cycle continuous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuityState {
    /// Not enough chain information to decide yet.
    Undetermined,
    Discontinuous,
    Continuous,
}

impl ContinuityState {
    /// Settled states never change and may be cached.
    pub fn is_settled(self) -> bool {
        self != ContinuityState::Undetermined
    }
}
