//! Emergency shutdown on system panic.

use crate::{
    gpio::{Level, LineName},
    platform::PanicPlatform,
    supervisor::{Inner, Supervisor},
};
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tracing::{debug, error};

/// Answer given to the panic notifier chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyResult {
    /// Handled; let the chain continue.
    Done,
}

/// Signals the modem that the host is going down without a graceful restart.
pub struct EmergencyShutdown {
    inner: Weak<Inner>,
    platform: Arc<dyn PanicPlatform>,
}

impl EmergencyShutdown {
    pub fn new(supervisor: &Supervisor, platform: Arc<dyn PanicPlatform>) -> Self {
        Self {
            inner: Arc::downgrade(supervisor.inner()),
            platform,
        }
    }

    /// Masks both interrupts, raises AP2MDM_ERRFATAL and polls for the modem
    /// to drop MDM2AP_STATUS, petting the watchdog between polls. Never
    /// fails and never sleeps. A single event is logged once polling ends;
    /// the installed subscriber must tolerate running on the panic path.
    pub fn notify(&self) -> NotifyResult {
        let Some(inner) = self.inner.upgrade() else {
            return NotifyResult::Done;
        };
        match self.poll_for_ack(&inner) {
            Some(waited) => debug!(
                waited_ms = waited.as_millis() as u64,
                "AP2MDM_ERRFATAL raised for a non graceful reset; mdm acknowledged"
            ),
            None => error!("AP2MDM_ERRFATAL raised but MDM2AP_STATUS never went low"),
        }
        NotifyResult::Done
    }

    /// The bounded poll itself. Emits nothing. Returns how long the modem
    /// took to acknowledge, or `None` when the ceiling was reached.
    fn poll_for_ack(&self, inner: &Inner) -> Option<Duration> {
        inner.disable_irqs();
        inner.lines.set_output(LineName::Ap2MdmErrfatal, Level::High);

        let step = inner.config.panic_poll_step();
        let ceiling = inner.config.panic_ack_timeout();
        let mut waited = Duration::ZERO;
        while waited < ceiling {
            self.platform.pet_watchdog();
            self.platform.busy_delay(step);
            waited += step;
            if inner.lines.read_input(LineName::Mdm2ApStatus) == Level::Low {
                return Some(waited);
            }
        }
        None
    }
}

/// Runs `shutdown` from the process panic hook, ahead of the previous hook.
pub fn install_panic_hook(shutdown: EmergencyShutdown) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        shutdown.notify();
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SupervisorConfig, sim::SimBench};

    #[tokio::test(start_paused = true)]
    async fn acknowledged_panic_stops_early() {
        let bench = SimBench::new(SupervisorConfig::default());
        let sup = bench.attach().unwrap();
        bench.set_input(LineName::Mdm2ApStatus, Level::High);
        let platform = bench.panic_platform(Some(Duration::from_millis(300)));
        let hook = EmergencyShutdown::new(&sup, platform.clone());

        assert_eq!(hook.notify(), NotifyResult::Done);
        assert_eq!(platform.pets(), 3);
        assert_eq!(bench.output(LineName::Ap2MdmErrfatal), Level::High);
        let status_irq = bench.irq_number(LineName::Mdm2ApStatus);
        assert!(!bench.gpio.irq_enabled(status_irq));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_modem_hits_ceiling() {
        let bench = SimBench::new(SupervisorConfig::default());
        let sup = bench.attach().unwrap();
        bench.set_input(LineName::Mdm2ApStatus, Level::High);
        let platform = bench.panic_platform(None);
        let hook = EmergencyShutdown::new(&sup, platform.clone());

        assert_eq!(hook.notify(), NotifyResult::Done);
        assert_eq!(platform.pets(), 60);
        assert_eq!(platform.waited(), Duration::from_millis(6_000));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_reports_acknowledge_time() {
        let bench = SimBench::new(SupervisorConfig::default());
        let sup = bench.attach().unwrap();
        bench.set_input(LineName::Mdm2ApStatus, Level::High);

        let platform = bench.panic_platform(Some(Duration::from_millis(250)));
        let acked = EmergencyShutdown::new(&sup, platform);
        assert_eq!(
            acked.poll_for_ack(sup.inner()),
            Some(Duration::from_millis(300))
        );

        bench.set_input(LineName::Mdm2ApStatus, Level::High);
        let silent = EmergencyShutdown::new(&sup, bench.panic_platform(None));
        assert_eq!(silent.poll_for_ack(sup.inner()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn detached_supervisor_is_ignored() {
        let bench = SimBench::new(SupervisorConfig::default());
        let platform = bench.panic_platform(None);
        let hook = {
            let sup = bench.attach().unwrap();
            EmergencyShutdown::new(&sup, platform.clone())
        };
        assert_eq!(hook.notify(), NotifyResult::Done);
        assert_eq!(platform.pets(), 0);
    }
}
