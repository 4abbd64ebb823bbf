// Train and evaluate command implementations

use anyhow::{Context, Result};
use tracing::info;

use signal_rl_agent::{Checkpoint, DqnAgent, ModelStore, NetworkWeights, RunReport, Runner};
use signal_rl_core::Agent;
use signal_rl_env::AnySimulator;

use crate::config::ControllerConfig;
use crate::{report, RunArgs};

fn runner(config: &ControllerConfig) -> Result<Runner<AnySimulator>> {
    let simulator = config
        .simulator
        .build(&config.sumo, &config.grid)
        .context("Failed to set up the simulator")?;
    let runner = Runner::new(config.run.clone(), config.phases.clone(), simulator);
    attach_relay(runner, config)
}

#[cfg(feature = "serial")]
fn attach_relay(runner: Runner<AnySimulator>, config: &ControllerConfig) -> Result<Runner<AnySimulator>> {
    if !config.serial.enabled {
        return Ok(runner);
    }
    let relay = crate::serial::SerialRelay::open(&config.serial)?;
    Ok(runner.with_observer(Box::new(relay)))
}

#[cfg(not(feature = "serial"))]
fn attach_relay(runner: Runner<AnySimulator>, config: &ControllerConfig) -> Result<Runner<AnySimulator>> {
    if config.serial.enabled {
        anyhow::bail!("--ard needs signalctl built with the `serial` feature");
    }
    Ok(runner)
}

fn print_summary(report: &RunReport) {
    for (episode, total) in report.totals() {
        println!("   Episode {:>3}: total waiting time {:>12.1} s", episode + 1, total);
    }
    if let Some(best) = report.best {
        println!(
            "\n🏁 Best episode: {} ({:.1} s)",
            best.episode + 1,
            best.total_waiting_time
        );
    }
}

pub async fn train(args: RunArgs) -> Result<()> {
    let config = ControllerConfig::resolve(&args, true)?;
    let name = config.run.model_name.clone();

    println!("🚦 Training signal controller");
    println!("   Model: {name}");
    println!("   Variant: {}", config.agent.variant);
    println!("   Simulator: {}", config.simulator);
    println!("   Episodes: {}", config.run.episodes);
    println!("   Steps per episode: {}", config.run.steps + 1);

    let mut agent = DqnAgent::new(config.agent.clone()).context("Failed to build the agent")?;
    let store = ModelStore::new(&config.output.models_dir);
    let mut runner = runner(&config)?.with_store(store.clone(), config.agent.variant.to_string());

    let report = runner.run(&mut agent).await.context("Training run failed")?;
    print_summary(&report);

    let written = report::write_training(&config.output.output_dir, &name, &report)?;
    for path in &written {
        info!(path = %path.display(), "wrote report");
    }
    if report.best.is_some() {
        println!("💾 Model saved to {}", store.path(&name)?.display());
    }
    Ok(())
}

pub async fn evaluate(args: RunArgs) -> Result<()> {
    let config = ControllerConfig::resolve(&args, false)?;
    let name = config.run.model_name.clone();

    let store = ModelStore::new(&config.output.models_dir);
    let checkpoint: Checkpoint<NetworkWeights> = store
        .load(&name)
        .await
        .with_context(|| format!("Failed to load model '{name}'"))?;

    println!("🚦 Evaluating signal controller");
    println!("   Model: {name} ({}, episode {:?})", checkpoint.variant, checkpoint.episode);
    println!("   Simulator: {}", config.simulator);
    println!("   Steps: {}", config.run.steps + 1);

    let mut agent = DqnAgent::new(config.agent.clone()).context("Failed to build the agent")?;
    agent
        .restore(checkpoint.weights)
        .context("Checkpoint does not fit the configured network")?;
    agent.set_epsilon(0.0);

    let mut runner = runner(&config)?;
    let report = runner.run(&mut agent).await.context("Evaluation run failed")?;
    print_summary(&report);

    for path in report::write_evaluation(&config.output.output_dir, &name, &report)? {
        info!(path = %path.display(), "wrote report");
    }
    Ok(())
}
