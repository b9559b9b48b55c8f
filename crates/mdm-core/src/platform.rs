//! Seams between the supervisor and the rest of the system.

use crate::{
    error::MdmResult,
    gpio::{Level, SignalLines},
};
use async_trait::async_trait;
use std::time::Duration;

/// Board-specific power sequencing and notifications.
///
/// The required methods drive the modem's power rails through the supervisor's
/// lines; the rest default to no-ops for boards that do not care.
pub trait ModemOps: Send + Sync {
    fn power_on(&self, lines: &SignalLines);
    fn power_down(&self, lines: &SignalLines);

    fn normal_boot_done(&self, _lines: &SignalLines) {}

    /// Called with the confirmed level of MDM2AP_STATUS.
    fn status_changed(&self, _lines: &SignalLines, _level: Level) {}

    fn debug_state_changed(&self, _enabled: bool) {}
}

/// How a subsystem restart is carried out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestartLevel {
    /// Only the modem is restarted.
    #[default]
    Independent,
    /// The whole SoC is reset.
    ResetSoc,
}

/// System-wide subsystem restart service.
///
/// `subsystem_restart` must not block; the orchestrator later calls back into
/// the supervisor through [`SubsystemCallbacks`].
pub trait RestartOrchestrator: Send + Sync {
    fn restart_level(&self) -> RestartLevel;
    /// Records that the next SoC reset is caused by a modem fatal error.
    fn flag_errfatal_restart(&self);
    fn subsystem_restart(&self, subsystem: &str);
}

/// Callbacks the restart orchestrator invokes on a registered subsystem.
#[async_trait]
pub trait SubsystemCallbacks: Send + Sync {
    fn name(&self) -> &str;
    async fn shutdown(&self);
    async fn powerup(&self) -> MdmResult<()>;
    async fn ramdump(&self, want_dumps: bool) -> MdmResult<()>;
}

/// Queries the modem's own record of why it last failed.
#[async_trait]
pub trait DiagnosticService: Send + Sync {
    async fn restart_reason(&self, subsystem: &str) -> MdmResult<String>;
}

/// Primitives available while the system is panicking.
pub trait PanicPlatform: Send + Sync {
    fn pet_watchdog(&self);
    /// Busy-waits for `step`. Must not sleep or allocate.
    fn busy_delay(&self, step: Duration);
}
