//! Supervisor for the power, boot, crash and recovery lifecycle of an
//! external modem attached over a handful of GPIO lines.

pub mod config;
pub mod control;
pub mod debounce;
pub mod errmsg;
pub mod error;
pub mod gpio;
pub mod irq;
pub mod lifecycle;
pub mod metrics;
pub mod panic;
pub mod platform;
pub mod rendezvous;
pub mod sim;
pub mod supervisor;
pub mod workqueue;

pub use config::{EXTERNAL_MODEM, SupervisorConfig};
pub use control::{CONTROL_DEVICE_NAME, ControlArg, ControlFile, ControlTransport};
pub use error::{MdmError, MdmErrorKind, MdmResult};
pub use gpio::{GpioChip, GpioError, Level, LineMap, LineName, SignalLines};
pub use irq::{IrqChip, Trigger};
pub use lifecycle::LifecycleState;
pub use panic::{EmergencyShutdown, NotifyResult, install_panic_hook};
pub use platform::{
    DiagnosticService, ModemOps, PanicPlatform, RestartLevel, RestartOrchestrator,
    SubsystemCallbacks,
};
pub use rendezvous::{Rendezvous, WaitOutcome};
pub use supervisor::{Collaborators, RestartReason, StatusSnapshot, Supervisor};

pub use mdm_proto::BootType;
