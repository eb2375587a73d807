//! Cluster-side collaborators for the simulation.
//!
//! Membership is read from the simulated chain itself. Peer requests are
//! queued on a channel and serviced by the simulation between heights.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::RwLock;

use cadence_chain::{BlockHash, Identifier};
use cadence_consensus::{cycle_information, ChainView, Membership, MeshNode, PeerMessenger};
use tokio::sync::mpsc;
use tracing::debug;

/// A request a verifier sent to its peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRequest {
    FetchBlock { height: u64, hash: BlockHash },
    BlockVote { identifier: Identifier, height: u64 },
}

/// Queues peer requests for the simulation loop.
#[derive(Debug)]
pub struct ChannelMessenger {
    tx: mpsc::UnboundedSender<PeerRequest>,
}

impl ChannelMessenger {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PeerRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, request: PeerRequest) {
        if self.tx.send(request).is_err() {
            debug!("peer request dropped; simulation finished");
        }
    }
}

impl PeerMessenger for ChannelMessenger {
    fn fetch_missing_block(&self, height: u64, hash: BlockHash) {
        self.send(PeerRequest::FetchBlock { height, hash });
    }

    fn request_block_vote(&self, node: &MeshNode, height: u64) {
        self.send(PeerRequest::BlockVote {
            identifier: node.identifier,
            height,
        });
    }
}

/// Membership derived from the frozen chain.
///
/// The current cycle is the run of verifiers ending at the frozen edge.
/// When the frozen edge has no cycle information the whole mesh is used.
pub struct ChainMembership {
    view: ChainView,
    mesh: RwLock<Vec<MeshNode>>,
}

impl ChainMembership {
    pub fn new(view: ChainView, mesh: Vec<MeshNode>) -> Self {
        Self {
            view,
            mesh: RwLock::new(mesh),
        }
    }

    /// Add a node to the mesh. Returns false if it was already known.
    pub fn join(&self, node: MeshNode) -> bool {
        let mut mesh = self.mesh.write().unwrap_or_else(|e| e.into_inner());
        if mesh.iter().any(|n| n.identifier == node.identifier) {
            return false;
        }
        mesh.push(node);
        true
    }

    fn mesh_identifiers(&self) -> HashSet<Identifier> {
        let mesh = self.mesh.read().unwrap_or_else(|e| e.into_inner());
        mesh.iter().map(|n| n.identifier).collect()
    }
}

impl Membership for ChainMembership {
    fn current_cycle_verifiers(&self) -> HashSet<Identifier> {
        let frozen = self.view.frozen();
        let edge = frozen.frozen_edge_height();
        let Some(info) = frozen
            .frozen_block_at_height(edge)
            .and_then(|block| cycle_information(&self.view, &block))
        else {
            return self.mesh_identifiers();
        };

        let length = u64::from(info.current_cycle_length()).min(edge + 1);
        let mut cycle = HashSet::new();
        for height in (edge + 1 - length)..=edge {
            match frozen.frozen_block_at_height(height) {
                Some(block) => {
                    cycle.insert(*block.verifier_identifier());
                }
                None => return self.mesh_identifiers(),
            }
        }
        cycle
    }

    fn is_verifier_in_cycle(&self, identifier: &Identifier) -> bool {
        self.current_cycle_verifiers().contains(identifier)
    }

    fn mesh_members(&self) -> Vec<MeshNode> {
        self.mesh.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// A loopback mesh address for the `index`th simulated verifier.
pub fn simulated_address(index: usize) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9444 + index as u16))
}
