//! Cadence cluster simulation
//!
//! Drives the consensus core with a small in-process verifier cluster and
//! records what happens as a timeline of events.
//!
//! # Architecture
//!
//! - **Simulation**: proposes, scores, votes on and freezes one height at a time
//! - **Cluster**: membership read from the frozen chain, peer requests over a channel
//! - **Events**: serializable timeline and final report
//!
//! # Usage
//!
//! ```ignore
//! let report = Simulation::new(SimulationConfig::from_env()).run().await;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! ```

mod cluster;
mod config;
mod events;
mod simulation;

pub use cluster::{simulated_address, ChainMembership, ChannelMessenger, PeerRequest};
pub use config::SimulationConfig;
pub use events::{SimEvent, SimulationReport};
pub use simulation::{verifier_seed, Simulation, GENESIS_START_TIMESTAMP, OUTSIDER_SEED};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn report_serializes() {
        let report = Simulation::new(SimulationConfig {
            blocks: 3,
            ..SimulationConfig::default()
        })
        .run()
        .await;

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["frozen_edge"], 3);
        assert!(json["stalled_at"].is_null());
        assert_eq!(json["events"][0]["type"], "BlockProposed");
    }
}
