//! Simulation configuration.

use std::str::FromStr;

use tracing::warn;

/// Configuration for a simulated verifier cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Verifiers in the rotation
    pub verifiers: usize,
    /// Heights to produce after Genesis
    pub blocks: u64,
    /// Seed for deterministic vote ordering
    pub seed: u64,
    /// Height at which an outside verifier proposes a competing block
    pub new_verifier_at: Option<u64>,
    /// Every this many heights, one verifier votes twice
    pub cancel_every: Option<u64>,
    /// Every this many heights, one verifier's vote is lost until requested
    pub lose_vote_every: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            verifiers: 4,
            blocks: 24,
            seed: 42,
            new_verifier_at: None,
            cancel_every: None,
            lose_vote_every: None,
        }
    }
}

impl SimulationConfig {
    /// Create config from environment variables with defaults.
    ///
    /// Unparseable values are logged and replaced by the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            verifiers: parse_var("CADENCE_VERIFIERS").unwrap_or(defaults.verifiers).max(1),
            blocks: parse_var("CADENCE_BLOCKS").unwrap_or(defaults.blocks),
            seed: parse_var("CADENCE_SEED").unwrap_or(defaults.seed),
            new_verifier_at: parse_var("CADENCE_NEW_VERIFIER_AT"),
            cancel_every: parse_var::<u64>("CADENCE_CANCEL_EVERY").filter(|n| *n > 0),
            lose_vote_every: parse_var::<u64>("CADENCE_LOSE_VOTE_EVERY").filter(|n| *n > 0),
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(variable = name, value = %value, "ignoring unparseable setting");
            None
        }
    }
}
