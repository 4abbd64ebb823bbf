//! Example: double-DQN signal control on the synthetic grid

use signal_rl_agent::{DqnAgent, DqnConfig, RunConfig, Runner, ValueLearning};
use signal_rl_core::{AgentConfig, PhaseTable};
use signal_rl_env::{GridConfig, GridSimulator};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let simulator = GridSimulator::new(GridConfig {
        arrival_rate: 0.12,
        ..GridConfig::default()
    })?;

    let mut agent = DqnAgent::new(DqnConfig {
        base: AgentConfig {
            learning_rate: 0.001,
            batch_size: 64,
            buffer_size: 10_000,
            ..AgentConfig::default()
        },
        variant: ValueLearning::Ddqn,
        seed: Some(7),
        ..DqnConfig::default()
    })?;

    let config = RunConfig {
        episodes: 10,
        steps: 1_000,
        ..RunConfig::default()
    };
    let mut runner = Runner::new(config, PhaseTable::default(), simulator);
    let report = runner.run(&mut agent).await?;

    for (episode, total) in report.totals() {
        println!("Episode {}: total waiting time = {:.0} s", episode + 1, total);
    }
    if let Some(best) = report.best {
        println!(
            "\nBest episode: {} ({:.0} s), final epsilon {:.3}",
            best.episode + 1,
            best.total_waiting_time,
            agent.epsilon()
        );
    }

    Ok(())
}
