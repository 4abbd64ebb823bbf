// Controller configuration document and command-line overrides

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use signal_rl_agent::{DqnConfig, RunConfig};
use signal_rl_core::PhaseTable;
use signal_rl_env::{GridConfig, SimulatorKind, SumoConfig};

use crate::RunArgs;

/// Where checkpoints and reports go
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub models_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            output_dir: PathBuf::from("."),
        }
    }
}

/// Serial relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Relay phase decisions at all
    pub enabled: bool,
    /// Device path; auto-detected when unset
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    /// Only relay decisions of this junction
    pub junction: Option<String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: None,
            baud_rate: 9600,
            timeout_ms: 500,
            junction: None,
        }
    }
}

/// Everything a train or evaluate run needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub agent: DqnConfig,
    pub run: RunConfig,
    pub phases: PhaseTable,
    pub simulator: SimulatorKind,
    pub sumo: SumoConfig,
    pub grid: GridConfig,
    pub output: OutputConfig,
    pub serial: SerialConfig,
}

impl ControllerConfig {
    /// Read a JSON configuration document
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Start from `--config` (or defaults) and apply the remaining flags
    pub fn resolve(args: &RunArgs, training: bool) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        config.run.model_name = args.model.clone();
        config.run.training = training;
        if let Some(episodes) = args.episodes {
            config.run.episodes = episodes;
        }
        if let Some(steps) = args.steps {
            config.run.steps = steps;
        }
        if args.reset_memory {
            config.run.reset_memory = true;
        }
        if let Some(variant) = args.variant {
            config.agent.variant = variant;
        }
        if let Some(seed) = args.seed {
            config.agent.seed = Some(seed);
            config.grid.seed = seed;
        }
        if let Some(kind) = args.simulator {
            config.simulator = kind;
        }
        if let Some(path) = &args.sumo_config {
            config.sumo.config_file = path.clone();
        }
        if args.gui {
            config.sumo.gui = true;
        }
        if let Some(dir) = &args.models_dir {
            config.output.models_dir = dir.clone();
        }
        if let Some(dir) = &args.output_dir {
            config.output.output_dir = dir.clone();
        }
        if args.ard {
            config.serial.enabled = true;
        }
        if let Some(port) = &args.serial_port {
            config.serial.port = Some(port.clone());
        }

        if !training {
            config.run = config.run.evaluation();
        }
        config.agent.validate().context("Invalid agent configuration")?;
        config
            .phases
            .validate(config.agent.network.n_actions)
            .context("Phase table does not match the agent")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use signal_rl_agent::ValueLearning;

    use crate::{Cli, Commands};

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Train(args) | Commands::Evaluate(args) => args,
        }
    }

    #[test]
    fn defaults_follow_the_reference_setup() {
        let config = ControllerConfig::resolve(&run_args(&["signalctl", "train"]), true).unwrap();
        assert_eq!(config.run.episodes, 50);
        assert_eq!(config.run.steps, 500);
        assert_eq!(config.agent.base.batch_size, 1024);
        assert_eq!(config.phases.len(), 4);
        assert_eq!(config.simulator, SimulatorKind::Sumo);
        assert_eq!(config.serial.baud_rate, 9600);
    }

    #[test]
    fn flags_override_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.json");
        std::fs::write(
            &path,
            r#"{"run": {"episodes": 7, "steps": 100}, "agent": {"gamma": 0.9}, "simulator": "synthetic"}"#,
        )
        .unwrap();

        let args = run_args(&[
            "signalctl",
            "train",
            "--config",
            path.to_str().unwrap(),
            "-m",
            "grid",
            "-e",
            "3",
            "--variant",
            "ddqn",
            "--ard",
        ]);
        let config = ControllerConfig::resolve(&args, true).unwrap();
        assert_eq!(config.run.episodes, 3);
        assert_eq!(config.run.steps, 100);
        assert_eq!(config.run.model_name, "grid");
        assert!((config.agent.base.gamma - 0.9).abs() < 1e-12);
        assert_eq!(config.agent.variant, ValueLearning::Ddqn);
        assert_eq!(config.simulator, SimulatorKind::Synthetic);
        assert!(config.serial.enabled);
    }

    #[test]
    fn evaluation_runs_a_single_episode() {
        let args = run_args(&["signalctl", "evaluate", "-m", "grid", "-e", "9"]);
        let config = ControllerConfig::resolve(&args, false).unwrap();
        assert_eq!(config.run.episodes, 1);
        assert!(!config.run.training);
    }

    #[test]
    fn phase_table_must_match_the_action_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.json");
        std::fs::write(&path, r#"{"agent": {"network": {"n_actions": 3}}}"#).unwrap();
        let args = run_args(&["signalctl", "train", "--config", path.to_str().unwrap()]);
        assert!(ControllerConfig::resolve(&args, true).is_err());
    }
}
