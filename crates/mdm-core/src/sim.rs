//! In-process bench: a simulated GPIO controller, modem and system
//! collaborators.
//!
//! Input lines are driven from the modem side with [`SimGpio::drive_input`];
//! matching edge handlers run synchronously on the caller, like a hard IRQ.
//! Everything observable lands in a shared [`SimJournal`].

use crate::{
    config::SupervisorConfig,
    error::{MdmError, MdmErrorKind, MdmResult},
    gpio::{Direction, GpioChip, GpioError, Level, LineName, SignalLines},
    irq::{IrqChip, IrqHandler, Trigger},
    platform::{
        DiagnosticService, ModemOps, PanicPlatform, RestartLevel, RestartOrchestrator,
        SubsystemCallbacks,
    },
    supervisor::{Collaborators, Supervisor},
};
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Offset between a simulated gpio number and its interrupt number.
pub const IRQ_BASE: u32 = 100;

/// Events a journal keeps before dropping the oldest.
pub const JOURNAL_CAPACITY: usize = 4096;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimEvent {
    Read { gpio: u32 },
    Write { gpio: u32, level: Level },
    PowerOn,
    PowerDown,
    NormalBootDone,
    StatusChanged(Level),
    ErrfatalRestartFlag,
    Restart { subsystem: String },
}

/// Bounded record of everything observable on the bench, oldest first.
#[derive(Clone)]
pub struct SimJournal {
    events: Arc<Mutex<VecDeque<SimEvent>>>,
    capacity: usize,
}

impl Default for SimJournal {
    fn default() -> Self {
        Self::with_capacity(JOURNAL_CAPACITY)
    }
}

impl SimJournal {
    pub fn with_capacity(capacity: usize) -> Self {
        let events = VecDeque::with_capacity(capacity.min(JOURNAL_CAPACITY));
        Self {
            events: Arc::new(Mutex::new(events)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, event: SimEvent) {
        let mut events = lock(&self.events);
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn events(&self) -> Vec<SimEvent> {
        lock(&self.events).iter().cloned().collect()
    }
}

struct Pin {
    label: Option<&'static str>,
    direction: Option<Direction>,
    level: Level,
}

impl Default for Pin {
    fn default() -> Self {
        Self {
            label: None,
            direction: None,
            level: Level::Low,
        }
    }
}

struct SimIrq {
    trigger: Trigger,
    handler: IrqHandler,
    enabled: bool,
}

#[derive(Default)]
struct GpioState {
    pins: BTreeMap<u32, Pin>,
    irqs: BTreeMap<u32, SimIrq>,
    unavailable: BTreeSet<u32>,
    irq_failures: BTreeSet<u32>,
}

/// Simulated GPIO and interrupt controller.
pub struct SimGpio {
    state: Mutex<GpioState>,
    journal: SimJournal,
}

impl SimGpio {
    pub fn new() -> Arc<Self> {
        Self::with_journal(SimJournal::default())
    }

    pub fn with_journal(journal: SimJournal) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GpioState::default()),
            journal,
        })
    }

    pub fn mark_unavailable(&self, gpio: u32) {
        lock(&self.state).unavailable.insert(gpio);
    }

    /// Makes the interrupt request for `gpio` fail.
    pub fn fail_irq_for(&self, gpio: u32) {
        lock(&self.state).irq_failures.insert(gpio);
    }

    /// Drives a line from the modem side and fires a matching edge handler.
    pub fn drive_input(&self, gpio: u32, level: Level) {
        let handler = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            let pin = state.pins.entry(gpio).or_default();
            let previous = pin.level;
            pin.level = level;
            if previous == level {
                return;
            }
            let edge = if level.is_high() {
                Trigger::RISING
            } else {
                Trigger::FALLING
            };
            state
                .irqs
                .get(&(gpio + IRQ_BASE))
                .filter(|irq| irq.enabled && irq.trigger.intersects(edge))
                .map(|irq| irq.handler.clone())
        };
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Fires the handler for `gpio` without a level change, as a glitch would.
    pub fn fire_irq(&self, gpio: u32) {
        let handler = lock(&self.state)
            .irqs
            .get(&(gpio + IRQ_BASE))
            .filter(|irq| irq.enabled)
            .map(|irq| irq.handler.clone());
        if let Some(handler) = handler {
            handler();
        }
    }

    pub fn level(&self, gpio: u32) -> Level {
        lock(&self.state)
            .pins
            .get(&gpio)
            .map_or(Level::Low, |pin| pin.level)
    }

    pub fn direction(&self, gpio: u32) -> Option<Direction> {
        lock(&self.state)
            .pins
            .get(&gpio)
            .and_then(|pin| pin.direction)
    }

    pub fn is_requested(&self, gpio: u32) -> bool {
        lock(&self.state)
            .pins
            .get(&gpio)
            .is_some_and(|pin| pin.label.is_some())
    }

    pub fn requested_count(&self) -> usize {
        lock(&self.state)
            .pins
            .values()
            .filter(|pin| pin.label.is_some())
            .count()
    }

    pub fn irq_registered(&self, irq: u32) -> bool {
        lock(&self.state).irqs.contains_key(&irq)
    }

    pub fn irq_enabled(&self, irq: u32) -> bool {
        lock(&self.state)
            .irqs
            .get(&irq)
            .is_some_and(|irq| irq.enabled)
    }

    pub fn irq_count(&self) -> usize {
        lock(&self.state).irqs.len()
    }
}

impl GpioChip for SimGpio {
    fn request(&self, gpio: u32, label: &'static str) -> Result<(), GpioError> {
        let mut state = lock(&self.state);
        if state.unavailable.contains(&gpio) {
            return Err(GpioError::Unavailable(gpio));
        }
        let pin = state.pins.entry(gpio).or_default();
        if pin.label.is_some() {
            return Err(GpioError::Busy(gpio));
        }
        pin.label = Some(label);
        Ok(())
    }

    fn free(&self, gpio: u32) {
        if let Some(pin) = lock(&self.state).pins.get_mut(&gpio) {
            pin.label = None;
            pin.direction = None;
        }
    }

    fn direction_input(&self, gpio: u32) -> Result<(), GpioError> {
        let mut state = lock(&self.state);
        let pin = state
            .pins
            .get_mut(&gpio)
            .filter(|pin| pin.label.is_some())
            .ok_or(GpioError::Backend {
                gpio,
                message: "line not requested".to_string(),
            })?;
        pin.direction = Some(Direction::Input);
        Ok(())
    }

    fn direction_output(&self, gpio: u32, level: Level) -> Result<(), GpioError> {
        {
            let mut state = lock(&self.state);
            let pin = state
                .pins
                .get_mut(&gpio)
                .filter(|pin| pin.label.is_some())
                .ok_or(GpioError::Backend {
                    gpio,
                    message: "line not requested".to_string(),
                })?;
            pin.direction = Some(Direction::Output);
            pin.level = level;
        }
        self.journal.push(SimEvent::Write { gpio, level });
        Ok(())
    }

    fn get_value(&self, gpio: u32) -> Level {
        self.journal.push(SimEvent::Read { gpio });
        self.level(gpio)
    }

    fn set_value(&self, gpio: u32, level: Level) {
        lock(&self.state).pins.entry(gpio).or_default().level = level;
        self.journal.push(SimEvent::Write { gpio, level });
    }
}

impl IrqChip for SimGpio {
    fn gpio_to_irq(&self, gpio: u32) -> Result<u32, GpioError> {
        if lock(&self.state).unavailable.contains(&gpio) {
            return Err(GpioError::Unavailable(gpio));
        }
        Ok(gpio + IRQ_BASE)
    }

    fn request_irq(
        &self,
        irq: u32,
        trigger: Trigger,
        name: &'static str,
        handler: IrqHandler,
    ) -> Result<(), GpioError> {
        let mut state = lock(&self.state);
        let gpio = irq.saturating_sub(IRQ_BASE);
        if state.irq_failures.contains(&gpio) {
            return Err(GpioError::Backend {
                gpio,
                message: format!("{name}: no irq descriptor"),
            });
        }
        if state.irqs.contains_key(&irq) {
            return Err(GpioError::Busy(gpio));
        }
        state.irqs.insert(
            irq,
            SimIrq {
                trigger,
                handler,
                enabled: true,
            },
        );
        Ok(())
    }

    fn disable_irq_nosync(&self, irq: u32) {
        if let Some(irq) = lock(&self.state).irqs.get_mut(&irq) {
            irq.enabled = false;
        }
    }

    fn free_irq(&self, irq: u32) {
        // drop the handler outside the lock
        let removed = lock(&self.state).irqs.remove(&irq);
        drop(removed);
    }
}

/// Simulated modem power sequencing.
///
/// With an auto-boot delay set, every power-on raises MDM2AP_STATUS after
/// that delay unless the modem was powered down or on again meanwhile.
pub struct SimModem {
    gpio: Arc<SimGpio>,
    journal: SimJournal,
    status_gpio: u32,
    errfatal_gpio: u32,
    auto_boot: Mutex<Option<Duration>>,
    epoch: Arc<AtomicU64>,
    power_ons: AtomicUsize,
    power_downs: AtomicUsize,
    boot_dones: AtomicUsize,
    debug_states: Mutex<Vec<bool>>,
}

impl SimModem {
    pub fn new(gpio: Arc<SimGpio>, journal: SimJournal, status_gpio: u32, errfatal_gpio: u32) -> Self {
        Self {
            gpio,
            journal,
            status_gpio,
            errfatal_gpio,
            auto_boot: Mutex::new(None),
            epoch: Arc::new(AtomicU64::new(0)),
            power_ons: AtomicUsize::new(0),
            power_downs: AtomicUsize::new(0),
            boot_dones: AtomicUsize::new(0),
            debug_states: Mutex::new(Vec::new()),
        }
    }

    pub fn set_auto_boot(&self, delay: Option<Duration>) {
        *lock(&self.auto_boot) = delay;
    }

    pub fn power_on_count(&self) -> usize {
        self.power_ons.load(Ordering::SeqCst)
    }

    pub fn power_down_count(&self) -> usize {
        self.power_downs.load(Ordering::SeqCst)
    }

    pub fn boot_done_count(&self) -> usize {
        self.boot_dones.load(Ordering::SeqCst)
    }

    pub fn debug_states(&self) -> Vec<bool> {
        lock(&self.debug_states).clone()
    }
}

impl ModemOps for SimModem {
    fn power_on(&self, lines: &SignalLines) {
        self.power_ons.fetch_add(1, Ordering::SeqCst);
        self.journal.push(SimEvent::PowerOn);
        lines.set_output(LineName::Ap2MdmPmicResetN, Level::High);

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(delay) = *lock(&self.auto_boot) else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime; sim modem will not boot on its own");
            return;
        };
        let gpio = self.gpio.clone();
        let current = self.epoch.clone();
        let status_gpio = self.status_gpio;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if current.load(Ordering::SeqCst) == epoch {
                debug!("sim modem booted; raising status");
                gpio.drive_input(status_gpio, Level::High);
            }
        });
    }

    fn power_down(&self, lines: &SignalLines) {
        self.power_downs.fetch_add(1, Ordering::SeqCst);
        self.journal.push(SimEvent::PowerDown);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        lines.set_output(LineName::Ap2MdmPmicResetN, Level::Low);
        self.gpio.drive_input(self.status_gpio, Level::Low);
        self.gpio.drive_input(self.errfatal_gpio, Level::Low);
    }

    fn normal_boot_done(&self, _lines: &SignalLines) {
        self.boot_dones.fetch_add(1, Ordering::SeqCst);
        self.journal.push(SimEvent::NormalBootDone);
    }

    fn status_changed(&self, _lines: &SignalLines, level: Level) {
        self.journal.push(SimEvent::StatusChanged(level));
    }

    fn debug_state_changed(&self, enabled: bool) {
        lock(&self.debug_states).push(enabled);
    }
}

/// Records restart requests and optionally forwards them to a driver task.
pub struct SimOrchestrator {
    journal: SimJournal,
    level: Mutex<RestartLevel>,
    restarts: Mutex<Vec<String>>,
    errfatal_flag: AtomicBool,
    requests: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl SimOrchestrator {
    pub fn new(journal: SimJournal) -> Self {
        Self {
            journal,
            level: Mutex::new(RestartLevel::Independent),
            restarts: Mutex::new(Vec::new()),
            errfatal_flag: AtomicBool::new(false),
            requests: Mutex::new(None),
        }
    }

    pub fn set_restart_level(&self, level: RestartLevel) {
        *lock(&self.level) = level;
    }

    pub fn restarts(&self) -> Vec<String> {
        lock(&self.restarts).clone()
    }

    pub fn errfatal_flagged(&self) -> bool {
        self.errfatal_flag.load(Ordering::SeqCst)
    }

    /// Routes later restart requests to the returned receiver.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.requests) = Some(tx);
        rx
    }
}

impl RestartOrchestrator for SimOrchestrator {
    fn restart_level(&self) -> RestartLevel {
        *lock(&self.level)
    }

    fn flag_errfatal_restart(&self) {
        self.errfatal_flag.store(true, Ordering::SeqCst);
        self.journal.push(SimEvent::ErrfatalRestartFlag);
    }

    fn subsystem_restart(&self, subsystem: &str) {
        info!(subsystem, "subsystem restart requested");
        lock(&self.restarts).push(subsystem.to_string());
        self.journal.push(SimEvent::Restart {
            subsystem: subsystem.to_string(),
        });
        if let Some(tx) = lock(&self.requests).as_ref() {
            if tx.send(subsystem.to_string()).is_err() {
                warn!(subsystem, "restart driver gone");
            }
        }
    }
}

/// One shutdown, ramdump, powerup cycle, in the order an orchestrator runs it.
pub async fn run_restart_cycle<C>(callbacks: &C, want_dumps: bool) -> MdmResult<()>
where
    C: SubsystemCallbacks + ?Sized,
{
    info!(subsystem = callbacks.name(), want_dumps, "restarting subsystem");
    callbacks.shutdown().await;
    if let Err(err) = callbacks.ramdump(want_dumps).await {
        warn!(subsystem = callbacks.name(), error = %err, "ramdump collection failed");
    }
    callbacks.powerup().await
}

/// Serves restart requests until `shutdown` fires or the orchestrator goes away.
pub async fn drive_restarts<C>(
    callbacks: &C,
    mut requests: mpsc::UnboundedReceiver<String>,
    want_dumps: bool,
    shutdown: CancellationToken,
) where
    C: SubsystemCallbacks + ?Sized,
{
    loop {
        let subsystem = tokio::select! {
            () = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(subsystem) => subsystem,
                None => break,
            },
        };
        debug!(%subsystem, "restart request received");
        match run_restart_cycle(callbacks, want_dumps).await {
            Ok(()) => info!(%subsystem, "subsystem restart complete"),
            Err(err) => warn!(%subsystem, error = %err, "subsystem powerup failed"),
        }
    }
}

/// Diagnostic service that fails a fixed number of times before answering.
pub struct SimDiagnostics {
    failures_left: AtomicU32,
    reason: String,
    attempts: AtomicU32,
}

impl SimDiagnostics {
    pub fn new(fail_first: u32, reason: impl Into<String>) -> Self {
        Self {
            failures_left: AtomicU32::new(fail_first),
            reason: reason.into(),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiagnosticService for SimDiagnostics {
    async fn restart_reason(&self, subsystem: &str) -> MdmResult<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let pending = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if pending {
            return Err(MdmError::with_message(
                MdmErrorKind::Io,
                format!("{subsystem}: diagnostic service not ready"),
            ));
        }
        Ok(self.reason.clone())
    }
}

/// Panic-path platform that counts watchdog pets and accumulates busy time.
///
/// With `ack_after` set, the simulated modem drops MDM2AP_STATUS once that
/// much busy time has passed.
pub struct SimPanicPlatform {
    gpio: Arc<SimGpio>,
    status_gpio: u32,
    ack_after: Option<Duration>,
    pets: AtomicUsize,
    waited_ms: AtomicU64,
}

impl SimPanicPlatform {
    pub fn new(gpio: Arc<SimGpio>, status_gpio: u32, ack_after: Option<Duration>) -> Self {
        Self {
            gpio,
            status_gpio,
            ack_after,
            pets: AtomicUsize::new(0),
            waited_ms: AtomicU64::new(0),
        }
    }

    pub fn pets(&self) -> usize {
        self.pets.load(Ordering::SeqCst)
    }

    pub fn waited(&self) -> Duration {
        Duration::from_millis(self.waited_ms.load(Ordering::SeqCst))
    }
}

impl PanicPlatform for SimPanicPlatform {
    fn pet_watchdog(&self) {
        self.pets.fetch_add(1, Ordering::SeqCst);
    }

    fn busy_delay(&self, step: Duration) {
        let step_ms = step.as_millis() as u64;
        let waited = self.waited_ms.fetch_add(step_ms, Ordering::SeqCst) + step_ms;
        if self
            .ack_after
            .is_some_and(|ack| Duration::from_millis(waited) >= ack)
        {
            self.gpio.drive_input(self.status_gpio, Level::Low);
        }
    }
}

/// A complete simulated board around one supervisor config.
pub struct SimBench {
    pub config: SupervisorConfig,
    pub journal: SimJournal,
    pub gpio: Arc<SimGpio>,
    pub modem: Arc<SimModem>,
    pub orchestrator: Arc<SimOrchestrator>,
    pub diagnostics: Arc<SimDiagnostics>,
}

impl SimBench {
    pub fn new(config: SupervisorConfig) -> Self {
        let journal = SimJournal::default();
        let gpio = SimGpio::with_journal(journal.clone());
        let status_gpio = line_number(&config, LineName::Mdm2ApStatus);
        let errfatal_gpio = line_number(&config, LineName::Mdm2ApErrfatal);
        let modem = Arc::new(SimModem::new(
            gpio.clone(),
            journal.clone(),
            status_gpio,
            errfatal_gpio,
        ));
        let orchestrator = Arc::new(SimOrchestrator::new(journal.clone()));
        let diagnostics = Arc::new(SimDiagnostics::new(0, "sim: no crash reason recorded"));
        Self {
            config,
            journal,
            gpio,
            modem,
            orchestrator,
            diagnostics,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: SimDiagnostics) -> Self {
        self.diagnostics = Arc::new(diagnostics);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            gpio: self.gpio.clone(),
            irq: self.gpio.clone(),
            ops: self.modem.clone(),
            orchestrator: self.orchestrator.clone(),
            diagnostics: self.diagnostics.clone(),
        }
    }

    /// Attaches a supervisor to the bench. Must run inside a tokio runtime.
    pub fn attach(&self) -> MdmResult<Supervisor> {
        Supervisor::attach(self.config.clone(), self.collaborators())
    }

    /// Line number of `name`, or 0 when absent.
    pub fn gpio_number(&self, name: LineName) -> u32 {
        line_number(&self.config, name)
    }

    pub fn irq_number(&self, name: LineName) -> u32 {
        self.gpio_number(name) + IRQ_BASE
    }

    pub fn set_input(&self, name: LineName, level: Level) {
        self.gpio.drive_input(self.gpio_number(name), level);
    }

    pub fn fire_irq(&self, name: LineName) {
        self.gpio.fire_irq(self.gpio_number(name));
    }

    pub fn output(&self, name: LineName) -> Level {
        self.gpio.level(self.gpio_number(name))
    }

    pub fn journal(&self) -> Vec<SimEvent> {
        self.journal.events()
    }

    pub fn panic_platform(&self, ack_after: Option<Duration>) -> Arc<SimPanicPlatform> {
        Arc::new(SimPanicPlatform::new(
            self.gpio.clone(),
            self.gpio_number(LineName::Mdm2ApStatus),
            ack_after,
        ))
    }
}

fn line_number(config: &SupervisorConfig, name: LineName) -> u32 {
    config
        .lines
        .get(&name)
        .and_then(|&number| u32::try_from(number).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn diagnostics_fail_then_answer() {
        let diagnostics = SimDiagnostics::new(2, "watchdog");
        assert!(diagnostics.restart_reason("m").await.is_err());
        assert!(diagnostics.restart_reason("m").await.is_err());
        assert_eq!(diagnostics.restart_reason("m").await.unwrap(), "watchdog");
        assert_eq!(diagnostics.attempts(), 3);
    }

    #[test]
    fn journal_drops_oldest_events_at_capacity() {
        let journal = SimJournal::with_capacity(3);
        for gpio in 0..5 {
            journal.push(SimEvent::Read { gpio });
        }
        assert_eq!(
            journal.events(),
            vec![
                SimEvent::Read { gpio: 2 },
                SimEvent::Read { gpio: 3 },
                SimEvent::Read { gpio: 4 },
            ]
        );
    }

    #[test]
    fn polling_reads_stay_bounded() {
        let gpio = SimGpio::new();
        for _ in 0..(JOURNAL_CAPACITY * 2) {
            gpio.get_value(6);
        }
        assert_eq!(gpio.journal.events().len(), JOURNAL_CAPACITY);
    }

    #[test]
    fn request_twice_is_busy() {
        let gpio = SimGpio::new();
        gpio.request(4, "a").unwrap();
        assert_eq!(gpio.request(4, "b"), Err(GpioError::Busy(4)));
        gpio.free(4);
        gpio.request(4, "b").unwrap();
    }

    #[test]
    fn direction_needs_request() {
        let gpio = SimGpio::new();
        assert!(gpio.direction_input(9).is_err());
        assert!(gpio.direction_output(9, Level::High).is_err());
    }
}
