//! Services the consensus core consumes but does not own.
//!
//! Membership tracking, new-verifier and upgrade policy, spam detection and
//! peer messaging live elsewhere in a node. The core only calls the
//! operations below. Fixed implementations are provided for simulations
//! and tests.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use cadence_chain::{Block, Identifier};

/// A node known to the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeshNode {
    pub identifier: Identifier,
    pub address: SocketAddr,
}

/// Who is verifying and who is reachable.
pub trait Membership: Send + Sync {
    /// Verifiers in the cycle ending at the frozen edge.
    fn current_cycle_verifiers(&self) -> HashSet<Identifier>;

    fn is_verifier_in_cycle(&self, identifier: &Identifier) -> bool;

    /// Every node currently known to the mesh.
    fn mesh_members(&self) -> Vec<MeshNode>;
}

/// Cluster policy on new verifiers, removals and version upgrades.
pub trait VerifierPolicy: Send + Sync {
    /// The pending new verifier with the most cycle votes, if any.
    fn top_pending_new_verifier(&self) -> Option<Identifier>;

    fn should_penalize_verifier_for_removal(&self, identifier: &Identifier) -> bool;

    /// `block` stayed at `prior_version` when an upgrade was allowed.
    fn is_missed_upgrade_opportunity(&self, block: &Block, prior_version: u16) -> bool;

    /// `block` upgraded from `prior_version` when no upgrade was expected.
    fn is_improperly_timed_upgrade(&self, block: &Block, prior_version: u16) -> bool;

    /// Whether the cluster is likely to admit a new verifier soon.
    fn likely_accepting_new_verifiers(&self) -> bool;
}

/// Counts balance-list spam transactions.
pub trait SpamDetector: Send + Sync {
    fn spam_transaction_count(&self, block: &Block) -> u32;
}

/// Fire-and-forget requests to peers. Responses, if any, arrive later
/// through the normal registration paths.
pub trait PeerMessenger: Send + Sync {
    fn fetch_missing_block(&self, height: u64, hash: cadence_chain::BlockHash);

    fn request_block_vote(&self, node: &MeshNode, height: u64);
}

/// The collaborators a verifier's consensus core needs, shared.
#[derive(Clone)]
pub struct Collaborators {
    pub membership: Arc<dyn Membership>,
    pub policy: Arc<dyn VerifierPolicy>,
    pub spam: Arc<dyn SpamDetector>,
    pub messenger: Arc<dyn PeerMessenger>,
}

/// Fixed cycle and mesh.
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    pub cycle: HashSet<Identifier>,
    pub mesh: Vec<MeshNode>,
}

impl StaticMembership {
    pub fn new(cycle: impl IntoIterator<Item = Identifier>, mesh: Vec<MeshNode>) -> Self {
        Self {
            cycle: cycle.into_iter().collect(),
            mesh,
        }
    }
}

impl Membership for StaticMembership {
    fn current_cycle_verifiers(&self) -> HashSet<Identifier> {
        self.cycle.clone()
    }

    fn is_verifier_in_cycle(&self, identifier: &Identifier) -> bool {
        self.cycle.contains(identifier)
    }

    fn mesh_members(&self) -> Vec<MeshNode> {
        self.mesh.clone()
    }
}

/// Fixed policy answers.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy {
    pub top_pending_new_verifier: Option<Identifier>,
    pub penalized: HashSet<Identifier>,
    pub missed_upgrade: bool,
    pub improperly_timed_upgrade: bool,
    pub likely_accepting_new_verifiers: bool,
}

impl VerifierPolicy for StaticPolicy {
    fn top_pending_new_verifier(&self) -> Option<Identifier> {
        self.top_pending_new_verifier
    }

    fn should_penalize_verifier_for_removal(&self, identifier: &Identifier) -> bool {
        self.penalized.contains(identifier)
    }

    fn is_missed_upgrade_opportunity(&self, block: &Block, prior_version: u16) -> bool {
        self.missed_upgrade && block.blockchain_version() == prior_version
    }

    fn is_improperly_timed_upgrade(&self, block: &Block, prior_version: u16) -> bool {
        self.improperly_timed_upgrade && block.blockchain_version() > prior_version
    }

    fn likely_accepting_new_verifiers(&self) -> bool {
        self.likely_accepting_new_verifiers
    }
}

/// A spam detector that reports the same count for every block.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSpam(pub u32);

impl SpamDetector for FixedSpam {
    fn spam_transaction_count(&self, _block: &Block) -> u32 {
        self.0
    }
}
