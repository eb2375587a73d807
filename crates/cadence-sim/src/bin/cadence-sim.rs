//! Cadence cluster simulator
//!
//! Runs a simulated verifier cluster and prints the report as JSON.
//! Configured through `CADENCE_*` environment variables.

use cadence_sim::{Simulation, SimulationConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_sim=info,cadence_consensus=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = SimulationConfig::from_env();
    let report = Simulation::new(config).run().await;

    if let Some(height) = report.stalled_at {
        tracing::warn!(height, "cluster stalled");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
