// Serial relay of phase decisions to a signal-head controller board

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use serialport::{SerialPort, SerialPortType};
use tracing::{debug, info, warn};

use signal_rl_core::{PhaseEvent, PhaseObserver};

use crate::config::SerialConfig;

/// Code sent for an action: the index of its transition step in the board's
/// phase list, which alternates transition and green entries
pub fn phase_code(action: usize) -> String {
    (action * 2).to_string()
}

fn find_serial_port() -> Result<String> {
    if let Ok(port) = std::env::var("SIGNALCTL_SERIAL_PORT") {
        return Ok(port);
    }

    let ports = serialport::available_ports().context("Failed to list serial ports")?;
    if let Some(port) = ports
        .into_iter()
        .find(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
    {
        return Ok(port.port_name);
    }

    #[cfg(target_os = "linux")]
    {
        for candidate in ["/dev/ttyACM0", "/dev/ttyUSB0"] {
            if std::path::Path::new(candidate).exists() {
                return Ok(candidate.to_string());
            }
        }
    }

    anyhow::bail!("No suitable serial port found")
}

/// Writes every (optionally filtered) decision to a serial port
pub struct SerialRelay {
    port: Box<dyn SerialPort>,
    reader: BufReader<Box<dyn SerialPort>>,
    junction: Option<String>,
}

impl SerialRelay {
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port_name = match &config.port {
            Some(port) => port.clone(),
            None => find_serial_port()?,
        };
        let port = serialport::new(&port_name, config.baud_rate)
            .timeout(Duration::from_millis(config.timeout_ms))
            .open()
            .with_context(|| format!("Failed to open serial port {port_name}"))?;
        let reader = BufReader::new(port.try_clone().context("Failed to clone serial port")?);
        info!(port = %port_name, baud = config.baud_rate, "serial relay ready");

        Ok(Self {
            port,
            reader,
            junction: config.junction.clone(),
        })
    }
}

impl PhaseObserver for SerialRelay {
    fn on_phase(&mut self, event: &PhaseEvent<'_>) -> signal_rl_core::Result<()> {
        if self
            .junction
            .as_deref()
            .is_some_and(|wanted| wanted != event.junction_id)
        {
            return Ok(());
        }

        let code = phase_code(event.action.index());
        self.port.write_all(code.as_bytes())?;
        self.port.flush()?;

        let mut reply = String::new();
        match self.reader.read_line(&mut reply) {
            Ok(_) => debug!(junction = event.junction_id, %code, reply = reply.trim_end(), "relayed phase"),
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                warn!(junction = event.junction_id, %code, "no reply from serial device");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
