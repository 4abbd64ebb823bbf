// Signal controller CLI
// Trains and evaluates reinforcement-learning traffic-signal controllers

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use signal_rl_agent::ValueLearning;
use signal_rl_env::SimulatorKind;

mod commands;
mod config;
mod report;
#[cfg(feature = "serial")]
mod serial;

#[derive(Parser)]
#[command(name = "signalctl")]
#[command(about = "Adaptive traffic-signal control with DQN and double DQN", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a controller and keep the best episode's weights
    Train(RunArgs),

    /// Run one greedy episode with a trained controller
    Evaluate(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Model name; weights live at <models-dir>/<name>.json
    #[arg(short, long, default_value = "model")]
    model: String,

    /// Number of training episodes
    #[arg(short, long)]
    episodes: Option<usize>,

    /// Last step index of an episode
    #[arg(short, long)]
    steps: Option<usize>,

    /// Relay phase decisions to a serial controller board
    #[arg(long)]
    ard: bool,

    /// Serial device for --ard
    #[arg(long)]
    serial_port: Option<String>,

    /// Value learning variant (dqn, ddqn)
    #[arg(long)]
    variant: Option<ValueLearning>,

    /// JSON controller configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Simulator back-end (sumo, synthetic)
    #[arg(long)]
    simulator: Option<SimulatorKind>,

    /// SUMO scenario file
    #[arg(long)]
    sumo_config: Option<PathBuf>,

    /// Launch sumo-gui instead of sumo
    #[arg(long)]
    gui: bool,

    /// Seed for the agent and the synthetic grid
    #[arg(long)]
    seed: Option<u64>,

    /// Rewind replay memories at the start of every episode
    #[arg(long)]
    reset_memory: bool,

    /// Checkpoint directory
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Directory for plots_training/ and plots_testing/
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => commands::train(args).await?,
        Commands::Evaluate(args) => commands::evaluate(args).await?,
    }

    Ok(())
}
