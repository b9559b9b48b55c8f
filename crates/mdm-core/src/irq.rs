//! Interrupt front-end for the modem input lines.

use crate::gpio::GpioError;
use bitflags::bitflags;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{debug, error};

bitflags! {
    /// Edges an interrupt fires on.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Trigger: u32 {
        const RISING = 1 << 0;
        const FALLING = 1 << 1;
        const BOTH = Self::RISING.bits() | Self::FALLING.bits();
    }
}

/// Handler invoked in interrupt context. Must not block.
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

pub trait IrqChip: Send + Sync {
    fn gpio_to_irq(&self, gpio: u32) -> Result<u32, GpioError>;
    fn request_irq(
        &self,
        irq: u32,
        trigger: Trigger,
        name: &'static str,
        handler: IrqHandler,
    ) -> Result<(), GpioError>;
    /// Masks the interrupt without waiting for a running handler.
    fn disable_irq_nosync(&self, irq: u32);
    fn free_irq(&self, irq: u32);
}

/// A requested interrupt. Freed on drop.
pub struct IrqRegistration {
    chip: Arc<dyn IrqChip>,
    irq: u32,
    name: &'static str,
    disabled: AtomicBool,
    freed: AtomicBool,
}

impl IrqRegistration {
    pub fn request(
        chip: Arc<dyn IrqChip>,
        gpio: u32,
        trigger: Trigger,
        name: &'static str,
        handler: IrqHandler,
    ) -> Result<Self, GpioError> {
        let irq = chip.gpio_to_irq(gpio).inspect_err(|err| {
            error!(name, gpio, error = %err, "could not get irq for line");
        })?;
        chip.request_irq(irq, trigger, name, handler)
            .inspect_err(|err| {
                error!(name, irq, error = %err, "request for irq failed");
            })?;
        debug!(name, gpio, irq, ?trigger, "irq registered");
        Ok(Self {
            chip,
            irq,
            name,
            disabled: AtomicBool::new(false),
            freed: AtomicBool::new(false),
        })
    }

    pub fn irq(&self) -> u32 {
        self.irq
    }

    pub fn disable_nosync(&self) {
        if !self.disabled.swap(true, Ordering::AcqRel) {
            self.chip.disable_irq_nosync(self.irq);
        }
    }

    pub fn free(&self) {
        if !self.freed.swap(true, Ordering::AcqRel) {
            self.chip.free_irq(self.irq);
            debug!(name = self.name, irq = self.irq, "irq freed");
        }
    }
}

impl Drop for IrqRegistration {
    fn drop(&mut self) {
        self.free();
    }
}

/// The two modem interrupts, registered together.
pub struct ModemIrqs {
    pub errfatal: IrqRegistration,
    pub status: IrqRegistration,
}

impl ModemIrqs {
    pub fn disable_nosync(&self) {
        self.errfatal.disable_nosync();
        self.status.disable_nosync();
    }

    pub fn free(&self) {
        self.errfatal.free();
        self.status.free();
    }
}
