//! Control surface used by the user-space boot agent.
//!
//! [`ControlFile`] decodes ioctl-style command codes and dispatches them to
//! the supervisor. The free functions at the bottom are the agent-side
//! helpers, written against [`ControlTransport`] so they work with any
//! handle that speaks the command vocabulary.

use crate::{
    error::{MdmError, MdmErrorKind, MdmResult},
    supervisor::Inner,
};
use async_trait::async_trait;
use mdm_proto::{BootType, Command, Transfer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Name the control surface is registered under.
pub const CONTROL_DEVICE_NAME: &str = "mdm";

/// Caller-side argument of a control command.
#[derive(Debug)]
pub enum ControlArg<'a> {
    None,
    In(i64),
    Out(&'a mut i64),
    Buffer(&'a [u8]),
}

impl ControlArg<'_> {
    fn transfer(&self) -> Transfer {
        match self {
            ControlArg::None => Transfer::None,
            ControlArg::In(_) | ControlArg::Buffer(_) => Transfer::Write,
            ControlArg::Out(_) => Transfer::Read,
        }
    }
}

fn transfer_fault(command: Command, arg: &ControlArg<'_>) -> MdmError {
    MdmError::with_message(
        MdmErrorKind::TransferFault,
        format!(
            "{command:?} expects {:?} argument, got {:?}",
            command.transfer(),
            arg.transfer()
        ),
    )
}

/// Anything that can carry control commands to a supervisor.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Issues one command. Only the reload wait observes `interrupt`.
    async fn ioctl(
        &self,
        code: u32,
        arg: ControlArg<'_>,
        interrupt: &CancellationToken,
    ) -> MdmResult<()>;
}

/// An open handle on the control surface.
pub struct ControlFile {
    inner: Arc<Inner>,
}

impl ControlFile {
    pub(crate) fn new(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    async fn dispatch(
        &self,
        code: u32,
        arg: ControlArg<'_>,
        interrupt: &CancellationToken,
    ) -> MdmResult<()> {
        let inner = &self.inner;
        if !inner.is_registered() {
            return Err(MdmError::with_message(
                MdmErrorKind::NotProvisioned,
                "control surface not registered",
            ));
        }
        let command = Command::try_from(code).map_err(|err| {
            error!(code, error = %err, "invalid ioctl");
            MdmError::from(err)
        })?;
        debug!(?command, "entering ioctl");

        match (command, arg) {
            (Command::PowerOn, ControlArg::None) => inner.wake(),
            (Command::CheckForBoot, ControlArg::Out(slot)) => {
                *slot = i64::from(inner.boot_pending());
            }
            (Command::NormalBootDone, ControlArg::In(status)) => {
                debug!("check if mdm is booted up");
                inner.report_normal_boot(status);
            }
            (Command::RamDumpDone, ControlArg::In(status)) => {
                debug!("mdm done collecting RAM dumps");
                inner.report_ramdump(status);
            }
            (Command::WaitForRestart, ControlArg::Out(slot)) => {
                let boot_type = inner.wait_for_reload(interrupt).await?;
                *slot = i64::from(boot_type);
            }
            (Command::GetMfgMode, ControlArg::Out(slot)) => {
                info!(mfg_mode = inner.config.mfg_mode, "board mfg mode");
                *slot = i64::from(inner.config.mfg_mode);
            }
            (Command::SetErrmsg, ControlArg::Buffer(bytes)) => {
                info!("set modem fatal errmsg");
                inner.errmsg.set(bytes);
            }
            (Command::EfsSyncDone, ControlArg::None) => info!("efs sync is done"),
            (Command::NvWriteDone, ControlArg::None) => inner.nv_write_done().await,
            (command, arg) => {
                let err = transfer_fault(command, &arg);
                error!(?command, error = %err, "bad ioctl argument");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Issues a command that cannot be interrupted.
    pub async fn ioctl_uninterruptible(&self, code: u32, arg: ControlArg<'_>) -> MdmResult<()> {
        self.dispatch(code, arg, &CancellationToken::new()).await
    }
}

#[async_trait]
impl ControlTransport for ControlFile {
    async fn ioctl(
        &self,
        code: u32,
        arg: ControlArg<'_>,
        interrupt: &CancellationToken,
    ) -> MdmResult<()> {
        self.dispatch(code, arg, interrupt).await
    }
}

async fn simple<T: ControlTransport + ?Sized>(
    transport: &T,
    command: Command,
    arg: ControlArg<'_>,
) -> MdmResult<()> {
    transport
        .ioctl(command.code(), arg, &CancellationToken::new())
        .await
}

async fn query<T: ControlTransport + ?Sized>(transport: &T, command: Command) -> MdmResult<i64> {
    let mut value = 0;
    simple(transport, command, ControlArg::Out(&mut value)).await?;
    Ok(value)
}

/// Ask the supervisor to power the modem on.
pub async fn power_on<T: ControlTransport + ?Sized>(transport: &T) -> MdmResult<()> {
    simple(transport, Command::PowerOn, ControlArg::None).await
}

/// Whether the modem still waits for its boot images.
pub async fn boot_pending<T: ControlTransport + ?Sized>(transport: &T) -> MdmResult<bool> {
    Ok(query(transport, Command::CheckForBoot).await? != 0)
}

/// Report the outcome of a normal boot. Zero means success.
pub async fn report_normal_boot<T: ControlTransport + ?Sized>(
    transport: &T,
    status: i64,
) -> MdmResult<()> {
    simple(transport, Command::NormalBootDone, ControlArg::In(status)).await
}

/// Report the outcome of a memory-dump collection. Zero means success.
pub async fn report_ramdump<T: ControlTransport + ?Sized>(
    transport: &T,
    status: i64,
) -> MdmResult<()> {
    simple(transport, Command::RamDumpDone, ControlArg::In(status)).await
}

/// Block until the supervisor requests a reload, or until `interrupt` fires.
pub async fn wait_for_reload<T: ControlTransport + ?Sized>(
    transport: &T,
    interrupt: &CancellationToken,
) -> MdmResult<BootType> {
    let mut value = 0;
    transport
        .ioctl(
            Command::WaitForRestart.code(),
            ControlArg::Out(&mut value),
            interrupt,
        )
        .await?;
    Ok(BootType::try_from(value)?)
}

pub async fn mfg_mode<T: ControlTransport + ?Sized>(transport: &T) -> MdmResult<i32> {
    let value = query(transport, Command::GetMfgMode).await?;
    i32::try_from(value).map_err(|_| {
        MdmError::with_message(
            MdmErrorKind::InvalidArgument,
            format!("mfg mode {value} out of range"),
        )
    })
}

/// Store a diagnostic message. Longer messages are truncated.
pub async fn set_errmsg<T: ControlTransport + ?Sized>(transport: &T, msg: &[u8]) -> MdmResult<()> {
    simple(transport, Command::SetErrmsg, ControlArg::Buffer(msg)).await
}

pub async fn efs_sync_done<T: ControlTransport + ?Sized>(transport: &T) -> MdmResult<()> {
    simple(transport, Command::EfsSyncDone, ControlArg::None).await
}

pub async fn nv_write_done<T: ControlTransport + ?Sized>(transport: &T) -> MdmResult<()> {
    simple(transport, Command::NvWriteDone, ControlArg::None).await
}
