//! The modem supervisor.
//!
//! One [`Supervisor`] owns the signal lines, both interrupts and the three
//! work queues for a single external modem. Interrupt handlers only sample
//! and enqueue; all sleeping happens on the queues or on the orchestrator's
//! callback task.

use crate::{
    config::SupervisorConfig,
    control::ControlFile,
    debounce::ConfirmWindow,
    errmsg::DiagnosticMessage,
    error::{MdmError, MdmErrorKind, MdmResult},
    gpio::{GpioChip, Level, LineLevel, LineName, SignalLines},
    irq::{IrqChip, IrqRegistration, ModemIrqs, Trigger},
    lifecycle::{LifecycleController, LifecycleState},
    metrics,
    platform::{DiagnosticService, ModemOps, RestartLevel, RestartOrchestrator, SubsystemCallbacks},
    rendezvous::{Rendezvous, WaitOutcome},
    workqueue::{WorkHandler, WorkQueue},
};
use async_trait::async_trait;
use mdm_proto::{BootType, STATUS_OK};
use serde::Serialize;
use std::sync::{
    Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// External collaborators a supervisor is attached to.
pub struct Collaborators {
    pub gpio: Arc<dyn GpioChip>,
    pub irq: Arc<dyn IrqChip>,
    pub ops: Arc<dyn ModemOps>,
    pub orchestrator: Arc<dyn RestartOrchestrator>,
    pub diagnostics: Arc<dyn DiagnosticService>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum PrimaryWork {
    ConfirmErrfatal,
    EvaluateStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum SfrWork {
    FetchReason,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum MonitorWork {
    StatusPoll,
    FaultRelease,
}

/// Why a restart was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartReason {
    Errfatal,
    StatusLost,
}

impl RestartReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            RestartReason::Errfatal => "errfatal",
            RestartReason::StatusLost => "status_lost",
        }
    }

    /// The input line that carries this fault and its faulted level.
    const fn fault_line(self) -> (LineName, Level) {
        match self {
            RestartReason::Errfatal => (LineName::Mdm2ApErrfatal, Level::High),
            RestartReason::StatusLost => (LineName::Mdm2ApStatus, Level::Low),
        }
    }
}

/// Point-in-time view of the supervisor for status readers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub subsystem: String,
    pub state: LifecycleState,
    pub ready: bool,
    pub debug: bool,
    pub boot_status: String,
    pub dump_status: String,
    pub errmsg: Option<String>,
    pub restarts: u32,
}

pub(crate) struct Inner {
    pub(crate) config: SupervisorConfig,
    pub(crate) lines: SignalLines,
    pub(crate) irqs: OnceLock<ModemIrqs>,
    ops: Arc<dyn ModemOps>,
    orchestrator: Arc<dyn RestartOrchestrator>,
    diagnostics: Arc<dyn DiagnosticService>,
    confirm: ConfirmWindow,

    ready: AtomicBool,
    debug_on: AtomicBool,
    first_boot: AtomicBool,
    status_change_observed: AtomicBool,
    restart_pending: Mutex<Option<RestartReason>>,
    control_registered: AtomicBool,
    boot_status: Mutex<MdmResult<()>>,
    dump_status: Mutex<MdmResult<()>>,
    boot_type: Mutex<BootType>,
    lifecycle: Mutex<LifecycleController>,
    pub(crate) errmsg: DiagnosticMessage,

    pub(crate) needs_reload: Rendezvous,
    boot_done: Rendezvous,
    dump_done: Rendezvous,

    primary: WorkQueue<PrimaryWork>,
    sfr: WorkQueue<SfrWork>,
    monitor: WorkQueue<MonitorWork>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn outcome_text(outcome: &MdmResult<()>) -> String {
    match outcome {
        Ok(()) => "ok".to_string(),
        Err(err) => err.to_string(),
    }
}

/// Handle to an attached supervisor. Clones share the same instance.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Acquires the lines, arms both interrupts, powers the modem on and
    /// opens the control surface. Must be called from within a tokio runtime.
    ///
    /// Any failure releases whatever was acquired and yields `NotProvisioned`.
    pub fn attach(config: SupervisorConfig, collaborators: Collaborators) -> MdmResult<Self> {
        config.validate().map_err(|err| {
            MdmError::with_message(MdmErrorKind::InvalidArgument, format!("{err:#}"))
        })?;
        let Collaborators {
            gpio,
            irq,
            ops,
            orchestrator,
            diagnostics,
        } = collaborators;

        ops.debug_state_changed(config.debug_on);
        let lines = SignalLines::acquire(gpio, &config.lines)?;
        let errfatal_gpio = required_gpio(&lines, LineName::Mdm2ApErrfatal)?;
        let status_gpio = required_gpio(&lines, LineName::Mdm2ApStatus)?;

        let confirm = ConfirmWindow::new(config.confirm_samples, config.confirm_interval());
        let debug_on = config.debug_on;
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
            config,
            lines,
            irqs: OnceLock::new(),
            ops,
            orchestrator,
            diagnostics,
            confirm,
            ready: AtomicBool::new(false),
            debug_on: AtomicBool::new(debug_on),
            first_boot: AtomicBool::new(true),
            status_change_observed: AtomicBool::new(false),
            restart_pending: Mutex::new(None),
            control_registered: AtomicBool::new(false),
            boot_status: Mutex::new(Ok(())),
            dump_status: Mutex::new(Ok(())),
            boot_type: Mutex::new(BootType::Normal),
            lifecycle: Mutex::new(LifecycleController::new()),
            errmsg: DiagnosticMessage::new(),
            needs_reload: Rendezvous::new("mdm_needs_reload"),
            boot_done: Rendezvous::new("mdm_boot"),
            dump_done: Rendezvous::new("mdm_ram_dumps"),
            primary: WorkQueue::spawn("mdm_queue", weak.clone()),
            sfr: WorkQueue::spawn("mdm_sfr_queue", weak.clone()),
            monitor: WorkQueue::spawn("mdm_gpio_monitor_queue", weak.clone()),
        });

        let irqs = match request_irqs(&inner, irq, errfatal_gpio, status_gpio) {
            Ok(irqs) => irqs,
            Err(err) => {
                inner.teardown();
                return Err(err);
            }
        };
        if inner.irqs.set(irqs).is_err() {
            warn!("modem irqs already armed");
        }
        metrics::record_ready(false);

        inner.power_on("first boot");
        inner.control_registered.store(true, Ordering::Release);
        info!(subsystem = %inner.config.subsystem, "registering mdm modem");
        Ok(Self { inner })
    }

    /// Disarms the interrupts, stops the work queues, releases every line and
    /// closes the control surface.
    pub fn detach(&self) {
        info!(subsystem = %self.inner.config.subsystem, "detaching mdm modem");
        self.inner.teardown();
    }

    /// Intentional teardown: masks both interrupts, drops AP2MDM_STATUS and
    /// powers the modem down.
    pub fn graceful_shutdown(&self) {
        let inner = &self.inner;
        info!("setting AP2MDM_STATUS low for a graceful restart");
        inner.disable_irqs();
        inner.set_ready(false);
        inner.transition(LifecycleController::on_shutdown);
        inner.lines.set_output(LineName::Ap2MdmStatus, Level::Low);
        inner.ops.power_down(&inner.lines);
    }

    /// Opens a handle on the control surface.
    pub fn open_control(&self) -> MdmResult<ControlFile> {
        if !self.inner.control_registered.load(Ordering::Acquire) {
            return Err(MdmError::with_message(
                MdmErrorKind::NotProvisioned,
                "control surface not registered",
            ));
        }
        Ok(ControlFile::new(self.inner.clone()))
    }

    /// Orchestrator shutdown callback.
    pub async fn shutdown(&self) {
        self.inner.subsys_shutdown().await;
    }

    /// Orchestrator powerup callback.
    pub async fn powerup(&self) -> MdmResult<()> {
        self.inner.subsys_powerup().await
    }

    /// Orchestrator ramdump callback.
    pub async fn ramdump(&self, want_dumps: bool) -> MdmResult<()> {
        self.inner.subsys_ramdump(want_dumps).await
    }

    /// Entry point for the MDM2AP_ERRFATAL interrupt.
    pub fn errfatal_irq(&self) {
        self.inner.errfatal_irq();
    }

    /// Entry point for the MDM2AP_STATUS interrupt.
    pub fn status_irq(&self) {
        self.inner.status_irq();
    }

    pub fn subsystem(&self) -> &str {
        &self.inner.config.subsystem
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn lines(&self) -> &SignalLines {
        &self.inner.lines
    }

    pub fn state(&self) -> LifecycleState {
        lock(&self.inner.lifecycle).state()
    }

    pub fn ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Text form of [`Supervisor::ready`] for status files.
    pub fn status_text(&self) -> &'static str {
        if self.ready() { "1\n" } else { "0\n" }
    }

    pub fn boot_status(&self) -> MdmResult<()> {
        lock(&self.inner.boot_status).clone()
    }

    pub fn dump_status(&self) -> MdmResult<()> {
        lock(&self.inner.dump_status).clone()
    }

    pub fn boot_type(&self) -> BootType {
        *lock(&self.inner.boot_type)
    }

    pub fn errmsg(&self) -> Option<String> {
        self.inner.errmsg.get()
    }

    pub fn debug(&self) -> bool {
        self.inner.debug_on.load(Ordering::Acquire)
    }

    pub fn set_debug(&self, enabled: bool) {
        self.inner.debug_on.store(enabled, Ordering::Release);
        info!(enabled, "mdm debug state changed");
        self.inner.ops.debug_state_changed(enabled);
    }

    /// Whether the next normal-boot-done report is still the first one.
    pub fn first_boot_pending(&self) -> bool {
        self.inner.first_boot.load(Ordering::Acquire)
    }

    /// Whether a confirmed fault is still waiting for the orchestrator or
    /// for its line to de-assert.
    pub fn restart_pending(&self) -> bool {
        lock(&self.inner.restart_pending).is_some()
    }

    pub fn needs_reload(&self) -> &Rendezvous {
        &self.inner.needs_reload
    }

    pub fn boot_done(&self) -> &Rendezvous {
        &self.inner.boot_done
    }

    pub fn dump_done(&self) -> &Rendezvous {
        &self.inner.dump_done
    }

    /// Logs and returns the level of every line.
    pub fn dump_lines(&self) -> Vec<LineLevel> {
        self.inner.lines.dump()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            subsystem: self.inner.config.subsystem.clone(),
            state: self.state(),
            ready: self.ready(),
            debug: self.debug(),
            boot_status: outcome_text(&self.boot_status()),
            dump_status: outcome_text(&self.dump_status()),
            errmsg: self.errmsg(),
            restarts: lock(&self.inner.lifecycle).restarts(),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }
}

#[async_trait]
impl SubsystemCallbacks for Supervisor {
    fn name(&self) -> &str {
        self.subsystem()
    }

    async fn shutdown(&self) {
        Supervisor::shutdown(self).await;
    }

    async fn powerup(&self) -> MdmResult<()> {
        Supervisor::powerup(self).await
    }

    async fn ramdump(&self, want_dumps: bool) -> MdmResult<()> {
        Supervisor::ramdump(self, want_dumps).await
    }
}

fn required_gpio(lines: &SignalLines, name: LineName) -> MdmResult<u32> {
    lines.gpio(name).ok_or_else(|| {
        MdmError::with_message(
            MdmErrorKind::NotProvisioned,
            format!("{} not provisioned", name.label()),
        )
    })
}

fn request_irqs(
    inner: &Arc<Inner>,
    chip: Arc<dyn IrqChip>,
    errfatal_gpio: u32,
    status_gpio: u32,
) -> MdmResult<ModemIrqs> {
    let weak = Arc::downgrade(inner);
    let errfatal = IrqRegistration::request(
        chip.clone(),
        errfatal_gpio,
        Trigger::RISING,
        "mdm errfatal",
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.errfatal_irq();
            }
        }),
    )?;
    let weak = Arc::downgrade(inner);
    let status = IrqRegistration::request(
        chip,
        status_gpio,
        Trigger::BOTH,
        "mdm status",
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.status_irq();
            }
        }),
    )?;
    Ok(ModemIrqs { errfatal, status })
}

impl Inner {
    fn transition(&self, apply: fn(&mut LifecycleController) -> bool) {
        let mut lifecycle = lock(&self.lifecycle);
        let from = lifecycle.state();
        let expected = apply(&mut lifecycle);
        let to = lifecycle.state();
        drop(lifecycle);
        if expected {
            debug!(?from, ?to, "lifecycle transition");
        } else {
            warn!(?from, ?to, "unexpected lifecycle transition");
        }
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
        metrics::record_ready(ready);
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.control_registered.load(Ordering::Acquire)
    }

    pub(crate) fn disable_irqs(&self) {
        if let Some(irqs) = self.irqs.get() {
            irqs.disable_nosync();
        }
    }

    fn teardown(&self) {
        self.control_registered.store(false, Ordering::Release);
        if let Some(irqs) = self.irqs.get() {
            irqs.disable_nosync();
            irqs.free();
        }
        self.primary.shutdown();
        self.sfr.shutdown();
        self.monitor.shutdown();
        self.lines.release();
        self.set_ready(false);
        self.transition(LifecycleController::on_detached);
    }

    pub(crate) fn power_on(&self, reason: &'static str) {
        self.transition(LifecycleController::on_power_on_requested);
        info!(reason, "powering on mdm");
        self.ops.power_on(&self.lines);
        self.transition(LifecycleController::on_powered_on);
    }

    fn errfatal_irq(&self) {
        metrics::observe_errfatal_irq();
        debug!("mdm got errfatal interrupt");
        if self.is_ready() && self.lines.read_input(LineName::Mdm2ApStatus).is_high() {
            debug!("scheduling errfatal confirmation");
            self.primary.queue(PrimaryWork::ConfirmErrfatal);
        }
    }

    fn status_irq(&self) {
        metrics::observe_status_irq();
        debug!("mdm sent status change interrupt");
        self.primary.queue(PrimaryWork::EvaluateStatus);
    }

    async fn confirm_errfatal(&self) {
        let sample = || self.lines.read_input(LineName::Mdm2ApErrfatal);
        if sample() == Level::Low {
            info!("mdm fatal high is a false alarm");
            metrics::observe_false_alarm("errfatal");
            return;
        }
        if !self.confirm.hold(Level::High, sample).await {
            info!(
                window_ms = self.confirm.span().as_millis() as u64,
                "mdm fatal high confirm failed; abort"
            );
            metrics::observe_false_alarm("errfatal");
            return;
        }
        self.trigger_restart(RestartReason::Errfatal);
    }

    async fn evaluate_status(&self) {
        if !self.is_ready() {
            debug!("mdm not ready; ignoring status change");
            return;
        }
        let sample = || self.lines.read_input(LineName::Mdm2ApStatus);
        let level = sample();
        if level == Level::Low && !self.confirm.hold(Level::Low, sample).await {
            info!(
                window_ms = self.confirm.span().as_millis() as u64,
                "mdm status low confirm failed; abort"
            );
            metrics::observe_false_alarm("status");
            return;
        }

        self.status_change_observed.store(true, Ordering::Release);
        self.ops.status_changed(&self.lines, level);
        debug!(status = level.as_u8(), "mdm status evaluated");

        match level {
            Level::Low => {
                info!("unexpected reset external modem");
                self.trigger_restart(RestartReason::StatusLost);
            }
            Level::High => info!("status = 1: mdm is now ready"),
        }
    }

    fn trigger_restart(&self, reason: RestartReason) {
        {
            let mut pending = lock(&self.restart_pending);
            if let Some(current) = *pending {
                info!(
                    reason = reason.as_str(),
                    pending = current.as_str(),
                    "restart already requested for this fault; ignoring"
                );
                return;
            }
            *pending = Some(reason);
        }
        self.lines.dump();
        self.transition(LifecycleController::on_fault_confirmed);
        if self.orchestrator.restart_level() == RestartLevel::ResetSoc {
            self.orchestrator.flag_errfatal_restart();
        }
        info!(reason = reason.as_str(), "resetting the mdm");
        metrics::observe_restart_trigger(reason.as_str());
        self.orchestrator.subsystem_restart(&self.config.subsystem);
        self.monitor.queue(MonitorWork::FaultRelease);
    }

    /// Closes the fault episode once its line is confirmed de-asserted, so a
    /// later fault is reported even if the orchestrator never cycled the modem.
    async fn watch_fault_release(&self) {
        loop {
            let Some(reason) = *lock(&self.restart_pending) else {
                return;
            };
            let (line, faulted) = reason.fault_line();
            let released = match faulted {
                Level::High => Level::Low,
                Level::Low => Level::High,
            };
            let sample = || self.lines.read_input(line);
            if sample() == released && self.confirm.hold(released, sample).await {
                let mut pending = lock(&self.restart_pending);
                if *pending == Some(reason) {
                    *pending = None;
                    info!(
                        reason = reason.as_str(),
                        line = line.label(),
                        "fault line released; episode closed"
                    );
                }
                return;
            }
            tokio::time::sleep(self.config.fault_release_poll()).await;
        }
    }

    async fn status_poll(&self) {
        tokio::time::sleep(self.config.status_poll_delay()).await;
        let observed = self.status_change_observed.load(Ordering::Acquire);
        info!(observed, "mdm status change notified?");
        if observed {
            return;
        }
        self.lines.dump();
        if self.lines.read_input(LineName::Mdm2ApStatus).is_high() {
            self.primary.queue(PrimaryWork::EvaluateStatus);
        }
    }

    async fn fetch_restart_reason(&self) {
        let max = self.config.sfr_max_retries;
        for attempt in 1..=max {
            tokio::time::sleep(self.config.sfr_retry_interval()).await;
            match self.diagnostics.restart_reason(&self.config.subsystem).await {
                Ok(reason) => {
                    info!(%reason, attempt, "mdm restart reason");
                    return;
                }
                Err(err) => {
                    warn!(attempt, max, error = %err, "error retrieving mdm restart reason");
                }
            }
        }
        error!(attempts = max, "giving up on mdm restart reason");
    }

    async fn subsys_shutdown(&self) {
        self.set_ready(false);
        // the orchestrator owns the episode from here
        *lock(&self.restart_pending) = None;
        self.transition(LifecycleController::on_shutdown);
        self.lines.set_output(LineName::Ap2MdmErrfatal, Level::High);
        let delay = self.config.ramdump_delay();
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "waiting for mdm ramdump preparation");
            tokio::time::sleep(delay).await;
        }
        self.ops.power_down(&self.lines);
    }

    async fn subsys_powerup(&self) -> MdmResult<()> {
        self.lines.set_output(LineName::Ap2MdmErrfatal, Level::Low);
        self.lines.set_output(LineName::Ap2MdmStatus, Level::High);
        self.power_on("subsystem powerup");
        *lock(&self.boot_type) = BootType::Normal;
        self.needs_reload.signal();

        match self.boot_done.wait_with_timeout(self.config.boot_timeout()).await {
            WaitOutcome::Signaled => {
                info!("mdm modem has been restarted");
                self.sfr.queue(SfrWork::FetchReason);
            }
            WaitOutcome::TimedOut | WaitOutcome::Interrupted => {
                *lock(&self.boot_status) = Err(MdmError::with_message(
                    MdmErrorKind::Timeout,
                    "mdm modem restart timed out",
                ));
                metrics::observe_boot_timeout();
                info!(
                    timeout_ms = self.config.boot_timeout_ms,
                    "mdm modem restart timed out"
                );
            }
        }
        self.boot_done.reset();
        lock(&self.boot_status).clone()
    }

    async fn subsys_ramdump(&self, want_dumps: bool) -> MdmResult<()> {
        *lock(&self.dump_status) = Ok(());
        if want_dumps {
            self.transition(LifecycleController::on_dump_started);
            *lock(&self.boot_type) = BootType::RamDumps;
            self.needs_reload.signal();

            match self
                .dump_done
                .wait_with_timeout(self.config.ramdump_timeout())
                .await
            {
                WaitOutcome::Signaled => info!("mdm modem ramdumps completed"),
                WaitOutcome::TimedOut | WaitOutcome::Interrupted => {
                    *lock(&self.dump_status) = Err(MdmError::with_message(
                        MdmErrorKind::Timeout,
                        "mdm modem ramdumps timed out",
                    ));
                    metrics::observe_ramdump_timeout();
                    info!(
                        timeout_ms = self.config.ramdump_timeout_ms,
                        "mdm modem ramdumps timed out"
                    );
                }
            }
            self.dump_done.reset();
            self.lines.set_output(LineName::Ap2MdmErrfatal, Level::High);
            self.ops.power_down(&self.lines);
        }
        lock(&self.dump_status).clone()
    }

    /// Manual power-on from the boot agent.
    pub(crate) fn wake(&self) {
        self.set_ready(false);
        self.power_on("control request");
    }

    /// Whether the modem has not yet asserted MDM2AP_STATUS.
    pub(crate) fn boot_pending(&self) -> bool {
        self.lines.read_input(LineName::Mdm2ApStatus) == Level::Low
    }

    pub(crate) fn report_normal_boot(&self, status: i64) {
        if status == STATUS_OK {
            info!("normal boot done");
            *lock(&self.boot_status) = Ok(());
        } else {
            debug!(status, "normal boot failed");
            *lock(&self.boot_status) = Err(MdmError::with_message(
                MdmErrorKind::Io,
                format!("normal boot failed with status {status}"),
            ));
        }
        self.status_change_observed.store(false, Ordering::Release);
        self.monitor.queue(MonitorWork::StatusPoll);
        self.set_ready(true);
        *lock(&self.restart_pending) = None;
        self.transition(LifecycleController::on_boot_reported);
        self.ops.normal_boot_done(&self.lines);

        if self.first_boot.swap(false, Ordering::AcqRel) {
            debug!("first boot report; not signaling boot completion");
        } else {
            self.boot_done.signal();
        }
    }

    pub(crate) fn report_ramdump(&self, status: i64) {
        if status == STATUS_OK {
            info!("ramdump collection completed");
            *lock(&self.dump_status) = Ok(());
        } else {
            debug!(status, "ramdump collection failed");
            *lock(&self.dump_status) = Err(MdmError::with_message(
                MdmErrorKind::Io,
                format!("ramdump collection failed with status {status}"),
            ));
        }
        self.dump_done.signal();
    }

    /// Blocks until a reload is requested. An interrupted wait leaves the
    /// request in place for the next call.
    pub(crate) async fn wait_for_reload(&self, interrupt: &CancellationToken) -> MdmResult<BootType> {
        debug!("wait for mdm to need images reloaded");
        match self.needs_reload.wait_interruptible(interrupt).await {
            WaitOutcome::Signaled => {
                let boot_type = *lock(&self.boot_type);
                self.needs_reload.reset();
                Ok(boot_type)
            }
            WaitOutcome::Interrupted | WaitOutcome::TimedOut => Err(MdmError::with_message(
                MdmErrorKind::Interrupted,
                "reload wait interrupted",
            )),
        }
    }

    pub(crate) async fn nv_write_done(&self) {
        info!("NV write done");
        self.lines.set_output(LineName::Ap2MdmIpc1, Level::High);
        tokio::time::sleep(self.config.nv_pulse()).await;
        self.lines.set_output(LineName::Ap2MdmIpc1, Level::Low);
    }
}

#[async_trait]
impl WorkHandler<PrimaryWork> for Inner {
    async fn run(&self, work: PrimaryWork) {
        match work {
            PrimaryWork::ConfirmErrfatal => self.confirm_errfatal().await,
            PrimaryWork::EvaluateStatus => self.evaluate_status().await,
        }
    }
}

#[async_trait]
impl WorkHandler<SfrWork> for Inner {
    async fn run(&self, work: SfrWork) {
        match work {
            SfrWork::FetchReason => self.fetch_restart_reason().await,
        }
    }
}

#[async_trait]
impl WorkHandler<MonitorWork> for Inner {
    async fn run(&self, work: MonitorWork) {
        match work {
            MonitorWork::StatusPoll => self.status_poll().await,
            MonitorWork::FaultRelease => self.watch_fault_release().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBench, SimEvent};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn attach_powers_on_and_parks_outputs() {
        let bench = SimBench::new(SupervisorConfig::default());
        let sup = bench.attach().unwrap();
        assert_eq!(bench.modem.power_on_count(), 1);
        assert_eq!(sup.state(), LifecycleState::AwaitingBoot);
        assert!(!sup.ready());
        assert!(sup.first_boot_pending());
        assert_eq!(bench.output(LineName::Ap2MdmErrfatal), Level::Low);
        assert_eq!(bench.output(LineName::Ap2MdmIpc1), Level::Low);
        assert_eq!(sup.status_text(), "0\n");
    }

    #[tokio::test(start_paused = true)]
    async fn attach_failure_releases_lines() {
        let bench = SimBench::new(SupervisorConfig::default());
        let status = bench.gpio_number(LineName::Mdm2ApStatus);
        bench.gpio.fail_irq_for(status);
        let err = bench.attach().err().expect("attach should fail");
        assert_eq!(err.kind(), MdmErrorKind::NotProvisioned);
        assert_eq!(bench.gpio.requested_count(), 0);
        assert_eq!(bench.gpio.irq_count(), 0);
        assert_eq!(bench.modem.power_on_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn debug_state_reaches_platform() {
        let config = SupervisorConfig {
            debug_on: true,
            ..SupervisorConfig::default()
        };
        let bench = SimBench::new(config);
        let sup = bench.attach().unwrap();
        assert!(sup.debug());
        sup.set_debug(false);
        assert!(!sup.debug());
        assert_eq!(bench.modem.debug_states(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn status_assert_while_ready_only_notifies() {
        let bench = SimBench::new(SupervisorConfig::default());
        let sup = bench.attach().unwrap();
        bench.set_input(LineName::Mdm2ApStatus, Level::High);
        sup.inner().report_normal_boot(0);
        bench.set_input(LineName::Mdm2ApStatus, Level::Low);
        bench.set_input(LineName::Mdm2ApStatus, Level::High);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bench.orchestrator.restarts().is_empty());
        assert!(
            bench
                .journal()
                .contains(&SimEvent::StatusChanged(Level::High))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_masks_irqs() {
        let bench = SimBench::new(SupervisorConfig::default());
        let sup = bench.attach().unwrap();
        bench.set_input(LineName::Mdm2ApStatus, Level::High);
        sup.inner().report_normal_boot(0);
        sup.graceful_shutdown();
        assert_eq!(sup.state(), LifecycleState::ShuttingDown);
        assert_eq!(bench.output(LineName::Ap2MdmStatus), Level::Low);
        assert_eq!(bench.modem.power_down_count(), 1);
        bench.set_input(LineName::Mdm2ApErrfatal, Level::High);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bench.orchestrator.restarts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn detach_releases_everything() {
        let bench = SimBench::new(SupervisorConfig::default());
        let sup = bench.attach().unwrap();
        let file = sup.open_control().unwrap();
        sup.detach();
        assert_eq!(bench.gpio.requested_count(), 0);
        assert_eq!(bench.gpio.irq_count(), 0);
        assert_eq!(sup.state(), LifecycleState::Uninitialized);
        assert_eq!(
            sup.open_control().err().map(|err| err.kind()),
            Some(MdmErrorKind::NotProvisioned)
        );
        let err = crate::control::power_on(&file).await.unwrap_err();
        assert_eq!(err.kind(), MdmErrorKind::NotProvisioned);
    }
}
