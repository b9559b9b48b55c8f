//! Signal line registry.
//!
//! The supervisor talks to the modem over a fixed set of named GPIO lines.
//! [`SignalLines`] resolves the board's line numbers, requests every line
//! from a [`GpioChip`], parks outputs at a defined level and releases
//! everything again on drop.

use crate::error::{MdmError, MdmErrorKind, MdmResult};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{debug, error, info, trace, warn};

/// Logical level of a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub const fn is_high(self) -> bool {
        matches!(self, Level::High)
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value { Level::High } else { Level::Low }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Named lines between the application processor and the modem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LineName {
    #[serde(rename = "AP2MDM_STATUS")]
    Ap2MdmStatus,
    #[serde(rename = "AP2MDM_ERRFATAL")]
    Ap2MdmErrfatal,
    #[serde(rename = "AP2MDM_PMIC_RESET_N")]
    Ap2MdmPmicResetN,
    #[serde(rename = "AP2MDM_WAKEUP")]
    Ap2MdmWakeup,
    #[serde(rename = "AP2MDM_IPC1")]
    Ap2MdmIpc1,
    #[serde(rename = "MDM2AP_STATUS")]
    Mdm2ApStatus,
    #[serde(rename = "MDM2AP_ERRFATAL")]
    Mdm2ApErrfatal,
    #[serde(rename = "MDM2AP_HSIC_READY")]
    Mdm2ApHsicReady,
}

impl LineName {
    pub const fn label(self) -> &'static str {
        match self {
            LineName::Ap2MdmStatus => "AP2MDM_STATUS",
            LineName::Ap2MdmErrfatal => "AP2MDM_ERRFATAL",
            LineName::Ap2MdmPmicResetN => "AP2MDM_PMIC_RESET_N",
            LineName::Ap2MdmWakeup => "AP2MDM_WAKEUP",
            LineName::Ap2MdmIpc1 => "AP2MDM_IPC1",
            LineName::Mdm2ApStatus => "MDM2AP_STATUS",
            LineName::Mdm2ApErrfatal => "MDM2AP_ERRFATAL",
            LineName::Mdm2ApHsicReady => "MDM2AP_HSIC_READY",
        }
    }
}

/// Board line numbering. Numbers `<= 0` mark a line as absent.
pub type LineMap = BTreeMap<LineName, i64>;

struct LineSpec {
    name: LineName,
    direction: Direction,
    required: bool,
}

const LINE_TABLE: &[LineSpec] = &[
    LineSpec {
        name: LineName::Ap2MdmStatus,
        direction: Direction::Output,
        required: true,
    },
    LineSpec {
        name: LineName::Ap2MdmErrfatal,
        direction: Direction::Output,
        required: true,
    },
    LineSpec {
        name: LineName::Ap2MdmPmicResetN,
        direction: Direction::Output,
        required: true,
    },
    LineSpec {
        name: LineName::Ap2MdmWakeup,
        direction: Direction::Output,
        required: false,
    },
    LineSpec {
        name: LineName::Ap2MdmIpc1,
        direction: Direction::Output,
        required: true,
    },
    LineSpec {
        name: LineName::Mdm2ApStatus,
        direction: Direction::Input,
        required: true,
    },
    LineSpec {
        name: LineName::Mdm2ApErrfatal,
        direction: Direction::Input,
        required: true,
    },
    LineSpec {
        name: LineName::Mdm2ApHsicReady,
        direction: Direction::Input,
        required: true,
    },
];

/// Line numbering used by the bench and by an empty config.
pub fn default_line_map() -> LineMap {
    LINE_TABLE
        .iter()
        .enumerate()
        .map(|(idx, spec)| {
            let number = if spec.required { idx as i64 + 1 } else { 0 };
            (spec.name, number)
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GpioError {
    #[error("gpio {0} is not available")]
    Unavailable(u32),
    #[error("gpio {0} is already requested")]
    Busy(u32),
    #[error("gpio {gpio}: {message}")]
    Backend { gpio: u32, message: String },
}

/// Raw access to the GPIO controller.
///
/// `get_value`/`set_value` are called from interrupt context and must not
/// block.
pub trait GpioChip: Send + Sync {
    fn request(&self, gpio: u32, label: &'static str) -> Result<(), GpioError>;
    fn free(&self, gpio: u32);
    fn direction_input(&self, gpio: u32) -> Result<(), GpioError>;
    fn direction_output(&self, gpio: u32, level: Level) -> Result<(), GpioError>;
    fn get_value(&self, gpio: u32) -> Level;
    fn set_value(&self, gpio: u32, level: Level);
}

/// An acquired line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineHandle {
    pub name: LineName,
    pub gpio: u32,
    pub direction: Direction,
}

/// One entry of a diagnostic line dump.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LineLevel {
    pub name: LineName,
    pub gpio: Option<u32>,
    pub level: Option<Level>,
}

/// Every line the supervisor owns. Dropping the registry frees them.
pub struct SignalLines {
    chip: Arc<dyn GpioChip>,
    lines: BTreeMap<LineName, LineHandle>,
    released: AtomicBool,
}

impl SignalLines {
    /// Requests every provisioned line. Fails with `NotProvisioned` when a
    /// required line is missing or cannot be acquired; lines acquired up to
    /// that point are released.
    pub fn acquire(chip: Arc<dyn GpioChip>, map: &LineMap) -> MdmResult<Self> {
        let mut registry = SignalLines {
            chip,
            lines: BTreeMap::new(),
            released: AtomicBool::new(false),
        };
        for spec in LINE_TABLE {
            let number = map.get(&spec.name).copied().unwrap_or(0);
            if number <= 0 {
                if spec.required {
                    error!(line = spec.name.label(), "required line not provisioned");
                    return Err(MdmError::with_message(
                        MdmErrorKind::NotProvisioned,
                        format!("{} not provisioned", spec.name.label()),
                    ));
                }
                debug!(line = spec.name.label(), "optional line absent");
                continue;
            }
            let gpio = u32::try_from(number).map_err(|_| {
                MdmError::with_message(
                    MdmErrorKind::NotProvisioned,
                    format!("{} number {number} out of range", spec.name.label()),
                )
            })?;
            registry.acquire_line(spec, gpio)?;
        }
        Ok(registry)
    }

    fn acquire_line(&mut self, spec: &LineSpec, gpio: u32) -> MdmResult<()> {
        let label = spec.name.label();
        self.chip.request(gpio, label).map_err(|err| {
            error!(line = label, gpio, error = %err, "failed to request line");
            MdmError::from(err)
        })?;
        let configured = match spec.direction {
            Direction::Output => self.chip.direction_output(gpio, Level::Low),
            Direction::Input => self.chip.direction_input(gpio),
        };
        if let Err(err) = configured {
            error!(line = label, gpio, error = %err, "failed to configure line");
            self.chip.free(gpio);
            return Err(err.into());
        }
        trace!(line = label, gpio, direction = ?spec.direction, "line acquired");
        self.lines.insert(
            spec.name,
            LineHandle {
                name: spec.name,
                gpio,
                direction: spec.direction,
            },
        );
        Ok(())
    }

    pub fn handle(&self, name: LineName) -> Option<LineHandle> {
        if self.is_released() {
            return None;
        }
        self.lines.get(&name).copied()
    }

    pub fn gpio(&self, name: LineName) -> Option<u32> {
        self.handle(name).map(|handle| handle.gpio)
    }

    pub fn is_present(&self, name: LineName) -> bool {
        self.handle(name).is_some()
    }

    /// Drives an output. Absent or released lines are skipped.
    pub fn set_output(&self, name: LineName, level: Level) {
        match self.handle(name) {
            Some(handle) => {
                trace!(line = name.label(), ?level, "set output");
                self.chip.set_value(handle.gpio, level);
            }
            None => trace!(line = name.label(), "set output skipped: line absent"),
        }
    }

    /// Samples a line. Absent or released lines read low.
    pub fn read_input(&self, name: LineName) -> Level {
        match self.handle(name) {
            Some(handle) => self.chip.get_value(handle.gpio),
            None => Level::Low,
        }
    }

    /// Logs the level of every line, provisioned or not.
    pub fn dump(&self) -> Vec<LineLevel> {
        LINE_TABLE
            .iter()
            .map(|spec| match self.handle(spec.name) {
                Some(handle) => {
                    let level = self.chip.get_value(handle.gpio);
                    info!(
                        line = spec.name.label(),
                        gpio = handle.gpio,
                        value = level.as_u8(),
                        "line level"
                    );
                    LineLevel {
                        name: spec.name,
                        gpio: Some(handle.gpio),
                        level: Some(level),
                    }
                }
                None => {
                    warn!(line = spec.name.label(), "line not provisioned");
                    LineLevel {
                        name: spec.name,
                        gpio: None,
                        level: None,
                    }
                }
            })
            .collect()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Frees every line. Later calls are no-ops.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        for handle in self.lines.values() {
            self.chip.free(handle.gpio);
        }
        debug!(count = self.lines.len(), "signal lines released");
    }
}

impl Drop for SignalLines {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimGpio;

    fn bench_lines() -> (Arc<SimGpio>, SignalLines) {
        let gpio = SimGpio::new();
        let lines = SignalLines::acquire(gpio.clone(), &default_line_map()).unwrap();
        (gpio, lines)
    }

    #[test]
    fn acquire_configures_directions() {
        let (gpio, lines) = bench_lines();
        let status = lines.gpio(LineName::Ap2MdmStatus).unwrap();
        assert_eq!(gpio.direction(status), Some(Direction::Output));
        assert_eq!(gpio.level(status), Level::Low);
        let input = lines.gpio(LineName::Mdm2ApErrfatal).unwrap();
        assert_eq!(gpio.direction(input), Some(Direction::Input));
        assert!(!lines.is_present(LineName::Ap2MdmWakeup));
    }

    #[test]
    fn optional_wakeup_is_acquired_when_numbered() {
        let gpio = SimGpio::new();
        let mut map = default_line_map();
        map.insert(LineName::Ap2MdmWakeup, 40);
        let lines = SignalLines::acquire(gpio.clone(), &map).unwrap();
        assert_eq!(lines.gpio(LineName::Ap2MdmWakeup), Some(40));
        assert!(gpio.is_requested(40));
    }

    #[test]
    fn missing_required_line_releases_everything() {
        let gpio = SimGpio::new();
        let mut map = default_line_map();
        map.insert(LineName::Mdm2ApErrfatal, -1);
        let err = SignalLines::acquire(gpio.clone(), &map)
            .err()
            .expect("acquire should fail");
        assert_eq!(err.kind(), MdmErrorKind::NotProvisioned);
        assert_eq!(gpio.requested_count(), 0);
    }

    #[test]
    fn unavailable_line_releases_everything() {
        let gpio = SimGpio::new();
        let map = default_line_map();
        gpio.mark_unavailable(map[&LineName::Mdm2ApStatus] as u32);
        let err = SignalLines::acquire(gpio.clone(), &map)
            .err()
            .expect("acquire should fail");
        assert_eq!(err.kind(), MdmErrorKind::NotProvisioned);
        assert_eq!(gpio.requested_count(), 0);
    }

    #[test]
    fn release_is_idempotent_and_silences_io() {
        let (gpio, lines) = bench_lines();
        let errfatal = lines.gpio(LineName::Ap2MdmErrfatal).unwrap();
        lines.release();
        lines.release();
        assert_eq!(gpio.requested_count(), 0);
        lines.set_output(LineName::Ap2MdmErrfatal, Level::High);
        assert_eq!(gpio.level(errfatal), Level::Low);
    }

    #[test]
    fn dump_covers_every_line() {
        let (_gpio, lines) = bench_lines();
        let dump = lines.dump();
        assert_eq!(dump.len(), LINE_TABLE.len());
        let wakeup = dump
            .iter()
            .find(|entry| entry.name == LineName::Ap2MdmWakeup)
            .unwrap();
        assert_eq!(wakeup.level, None);
    }
}
