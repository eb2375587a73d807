//! Simulation events and the final report.

use cadence_chain::{BlockHash, ContinuityState, CycleInformation, Identifier};
use cadence_consensus::{BlockVoteTally, ChainScore, VoteSummary};
use serde::Serialize;

/// Events recorded while the cluster extends the chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum SimEvent {
    /// A verifier produced a candidate block
    BlockProposed {
        height: u64,
        hash: BlockHash,
        verifier: Identifier,
        score: ChainScore,
        continuity: ContinuityState,
        min_vote_timestamp: u64,
    },

    /// A verifier voted for a block
    VoteCast {
        height: u64,
        verifier: Identifier,
        hash: BlockHash,
    },

    /// A verifier's vote at a height was cancelled by a conflicting vote
    VoteCancelled { height: u64, verifier: Identifier },

    /// A block reached the vote threshold and was frozen
    BlockFrozen {
        height: u64,
        hash: BlockHash,
        verifier: Identifier,
        votes: usize,
        threshold: usize,
    },

    /// No block at the height could reach the threshold
    HeightStalled {
        height: u64,
        voters: usize,
        leading_votes: usize,
    },

    /// Votes were requested from verifiers that had not voted
    MissingVotesRequested { height: u64, verifier: Identifier },

    /// A voted-for block was unknown and requested from peers
    MissingBlockRequested { height: u64, hash: BlockHash },
}

impl SimEvent {
    pub fn height(&self) -> u64 {
        match self {
            SimEvent::BlockProposed { height, .. }
            | SimEvent::VoteCast { height, .. }
            | SimEvent::VoteCancelled { height, .. }
            | SimEvent::BlockFrozen { height, .. }
            | SimEvent::HeightStalled { height, .. }
            | SimEvent::MissingVotesRequested { height, .. }
            | SimEvent::MissingBlockRequested { height, .. } => *height,
        }
    }
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub frozen_edge: u64,
    /// The height at which the cluster could not agree, if any.
    pub stalled_at: Option<u64>,
    pub events: Vec<SimEvent>,
    /// Cycle information of the frozen-edge block.
    pub final_cycle: Option<CycleInformation>,
    /// Tallies at the last height voted on.
    pub last_tallies: Vec<BlockVoteTally>,
    /// Vote counts at heights still holding votes.
    pub vote_summaries: Vec<VoteSummary>,
    /// The observing verifier's recent-vote log.
    pub recent_votes: Vec<String>,
}

impl SimulationReport {
    pub fn frozen_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, SimEvent::BlockFrozen { .. }))
            .count()
    }

    pub fn frozen_verifier_at(&self, height: u64) -> Option<Identifier> {
        self.events.iter().find_map(|e| match e {
            SimEvent::BlockFrozen { height: h, verifier, .. } if *h == height => Some(*verifier),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged() {
        let event = SimEvent::VoteCancelled {
            height: 3,
            verifier: Identifier([1u8; 32]),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "VoteCancelled");
        assert_eq!(json["height"], 3);
        assert_eq!(event.height(), 3);
    }
}
