use crate::gpio::{LineMap, default_line_map};
use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::{fs, io, path::Path, time::Duration};

/// Subsystem name the supervisor registers with the restart orchestrator.
pub const EXTERNAL_MODEM: &str = "external_modem";

/// Board description and timing knobs for one supervised modem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub subsystem: String,
    pub lines: LineMap,
    /// Delay between asserting AP2MDM_ERRFATAL and powering the modem down.
    pub ramdump_delay_ms: u64,
    pub boot_timeout_ms: u64,
    pub ramdump_timeout_ms: u64,
    pub confirm_samples: u32,
    pub confirm_interval_ms: u64,
    pub sfr_max_retries: u32,
    pub sfr_retry_interval_ms: u64,
    pub status_poll_delay_ms: u64,
    /// Poll interval while waiting for a faulting line to de-assert.
    pub fault_release_poll_ms: u64,
    pub panic_ack_timeout_ms: u64,
    pub panic_poll_step_ms: u64,
    pub nv_pulse_ms: u64,
    pub mfg_mode: i32,
    pub debug_on: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            subsystem: EXTERNAL_MODEM.to_string(),
            lines: default_line_map(),
            ramdump_delay_ms: 0,
            boot_timeout_ms: 6_000,
            ramdump_timeout_ms: 180_000,
            confirm_samples: 10,
            confirm_interval_ms: 1,
            sfr_max_retries: 10,
            sfr_retry_interval_ms: 1_000,
            status_poll_delay_ms: 3_000,
            fault_release_poll_ms: 100,
            panic_ack_timeout_ms: 6_000,
            panic_poll_step_ms: 100,
            nv_pulse_ms: 1,
            mfg_mode: 0,
            debug_on: false,
        }
    }
}

impl SupervisorConfig {
    /// Load a config from `path`, falling back to defaults when the file does
    /// not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let config = match fs::read(path) {
            Ok(data) => serde_json::from_slice(&data)
                .with_context(|| format!("decode config {}", path.display()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("read config {}", path.display()));
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.subsystem.is_empty(), "subsystem name must not be empty");
        ensure!(self.confirm_samples > 0, "confirm_samples must be greater than zero");
        ensure!(self.sfr_max_retries > 0, "sfr_max_retries must be greater than zero");
        ensure!(
            self.fault_release_poll_ms > 0,
            "fault_release_poll_ms must be greater than zero"
        );
        ensure!(
            self.panic_poll_step_ms > 0,
            "panic_poll_step_ms must be greater than zero"
        );
        Ok(())
    }

    pub fn ramdump_delay(&self) -> Duration {
        Duration::from_millis(self.ramdump_delay_ms)
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_millis(self.boot_timeout_ms)
    }

    pub fn ramdump_timeout(&self) -> Duration {
        Duration::from_millis(self.ramdump_timeout_ms)
    }

    pub fn confirm_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_interval_ms)
    }

    pub fn sfr_retry_interval(&self) -> Duration {
        Duration::from_millis(self.sfr_retry_interval_ms)
    }

    pub fn status_poll_delay(&self) -> Duration {
        Duration::from_millis(self.status_poll_delay_ms)
    }

    pub fn fault_release_poll(&self) -> Duration {
        Duration::from_millis(self.fault_release_poll_ms)
    }

    pub fn panic_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.panic_ack_timeout_ms)
    }

    pub fn panic_poll_step(&self) -> Duration {
        Duration::from_millis(self.panic_poll_step_ms)
    }

    pub fn nv_pulse(&self) -> Duration {
        Duration::from_millis(self.nv_pulse_ms)
    }
}
