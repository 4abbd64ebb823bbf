//! SUMO back-end
//!
//! Launches one SUMO process per episode with a TraCI port and drives it
//! through [`TraciClient`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use signal_rl_core::{RLError, Result, TrafficSimulator};

use crate::traci::TraciClient;

/// How to launch SUMO
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SumoConfig {
    /// Command-line binary name or path
    pub binary: String,
    /// Use `sumo-gui` instead of `binary`
    pub gui: bool,
    /// Scenario configuration file
    pub config_file: PathBuf,
    /// Trip information output file
    pub tripinfo: PathBuf,
    /// TraCI host
    pub host: String,
    /// TraCI port passed to SUMO as `--remote-port`
    pub port: u16,
    /// Connection attempts while SUMO starts up
    pub connect_retries: u32,
    /// Delay between connection attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Extra arguments appended to the command line
    pub extra_args: Vec<String>,
}

impl Default for SumoConfig {
    fn default() -> Self {
        Self {
            binary: "sumo".to_string(),
            gui: false,
            config_file: PathBuf::from("configuration.sumocfg"),
            tripinfo: PathBuf::from("tripinfo.xml"),
            host: "127.0.0.1".to_string(),
            port: 8813,
            connect_retries: 20,
            retry_delay_ms: 200,
            extra_args: Vec::new(),
        }
    }
}

impl SumoConfig {
    /// Binary to execute
    ///
    /// Bare names are resolved under `$SUMO_HOME/bin` when that variable is
    /// set and otherwise left to `PATH`.
    #[must_use]
    pub fn binary_path(&self) -> PathBuf {
        let name = if self.gui { "sumo-gui" } else { self.binary.as_str() };
        let path = PathBuf::from(name);
        if path.components().count() > 1 {
            return path;
        }
        match std::env::var_os("SUMO_HOME") {
            Some(home) => PathBuf::from(home).join("bin").join(name),
            None => path,
        }
    }

    /// Command-line arguments for one run
    #[must_use]
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            self.config_file.display().to_string(),
            "--tripinfo-output".to_string(),
            self.tripinfo.display().to_string(),
            "--remote-port".to_string(),
            self.port.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Check the configuration
    ///
    /// # Errors
    /// Returns [`RLError::Config`] for an empty binary name or port 0.
    pub fn validate(&self) -> Result<()> {
        if self.binary.is_empty() {
            return Err(RLError::Config("SUMO binary must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(RLError::Config("TraCI port must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Running SUMO instance and its connection
struct Session {
    child: Child,
    client: TraciClient<TcpStream>,
}

/// SUMO driven over TraCI
pub struct SumoSimulator {
    config: SumoConfig,
    session: Option<Session>,
}

impl std::fmt::Debug for SumoSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SumoSimulator")
            .field("config", &self.config)
            .field("running", &self.session.is_some())
            .finish()
    }
}

impl SumoSimulator {
    /// Create a simulator; SUMO is launched by [`TrafficSimulator::start`]
    ///
    /// # Errors
    /// Returns [`RLError::Config`] for an invalid configuration.
    pub fn new(config: SumoConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            session: None,
        })
    }

    /// Launch configuration
    #[must_use]
    pub fn config(&self) -> &SumoConfig {
        &self.config
    }

    /// Whether a SUMO instance is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    fn client(&mut self) -> Result<&mut TraciClient<TcpStream>> {
        self.session
            .as_mut()
            .map(|s| &mut s.client)
            .ok_or_else(|| RLError::Simulator("SUMO is not running".to_string()))
    }
}

#[async_trait]
impl TrafficSimulator for SumoSimulator {
    async fn start(&mut self, episode: usize) -> Result<()> {
        if self.session.is_some() {
            self.close().await?;
        }

        let binary = self.config.binary_path();
        let args = self.config.command_args();
        debug!(binary = %binary.display(), ?args, "launching SUMO");
        let child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RLError::Simulator(format!("failed to launch {}: {e}", binary.display()))
            })?;

        let client = TraciClient::connect(
            (self.config.host.as_str(), self.config.port),
            self.config.connect_retries,
            Duration::from_millis(self.config.retry_delay_ms),
        )
        .await?;
        let mut session = Session { child, client };
        let (api, version) = session.client.version().await?;
        info!(episode, api, %version, "SUMO started");

        self.session = Some(session);
        Ok(())
    }

    async fn step(&mut self) -> Result<()> {
        self.client()?.simulation_step().await
    }

    async fn junction_ids(&mut self) -> Result<Vec<String>> {
        self.client()?.traffic_light_ids().await
    }

    async fn controlled_lanes(&mut self, junction: &str) -> Result<Vec<String>> {
        self.client()?.controlled_lanes(junction).await
    }

    async fn vehicle_count(&mut self, lane: &str, min_position: f64) -> Result<usize> {
        let client = self.client()?;
        let mut count = 0;
        for vehicle in client.lane_vehicle_ids(lane).await? {
            if client.vehicle_lane_position(&vehicle).await? > min_position {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn waiting_time(&mut self, lane: &str) -> Result<f64> {
        self.client()?.lane_waiting_time(lane).await
    }

    async fn set_phase(&mut self, junction: &str, duration: f64, state: &str) -> Result<()> {
        let client = self.client()?;
        client.set_red_yellow_green_state(junction, state).await?;
        client.set_phase_duration(junction, duration).await
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let closed = session.client.close().await;
        if let Err(e) = &closed {
            warn!(error = %e, "TraCI close failed, killing SUMO");
            session.child.kill().await?;
        }
        let status = session.child.wait().await?;
        debug!(%status, "SUMO exited");
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_command_line() {
        let config = SumoConfig::default();
        assert_eq!(
            config.command_args(),
            vec![
                "-c",
                "configuration.sumocfg",
                "--tripinfo-output",
                "tripinfo.xml",
                "--remote-port",
                "8813"
            ]
        );
    }

    #[test]
    fn extra_args_are_appended() {
        let config = SumoConfig {
            extra_args: vec!["--no-warnings".to_string()],
            ..SumoConfig::default()
        };
        assert_eq!(config.command_args().last().unwrap(), "--no-warnings");
    }

    #[test]
    fn explicit_paths_are_kept() {
        let config = SumoConfig {
            binary: "/opt/sumo/bin/sumo".to_string(),
            ..SumoConfig::default()
        };
        assert_eq!(config.binary_path(), PathBuf::from("/opt/sumo/bin/sumo"));
    }

    #[test]
    fn gui_selects_the_gui_binary() {
        let config = SumoConfig {
            gui: true,
            ..SumoConfig::default()
        };
        assert!(config.binary_path().ends_with("sumo-gui"));
    }

    #[test]
    fn config_parses_with_defaults() {
        let config: SumoConfig = serde_json::from_str(r#"{"port": 9000, "gui": true}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert!(config.gui);
        assert_eq!(config.binary, "sumo");
        assert!(SumoConfig { port: 0, ..config }.validate().is_err());
    }

    #[tokio::test]
    async fn queries_before_start_fail() {
        let mut sim = SumoSimulator::new(SumoConfig::default()).unwrap();
        assert!(!sim.is_running());
        assert!(matches!(sim.step().await, Err(RLError::Simulator(_))));
        sim.close().await.unwrap();
    }
}
