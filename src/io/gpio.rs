//! Digital line abstractions and per-slot sensor bindings
//!
//! Backends implement `OutputLine` / `InputLine`; the sensing code only ever
//! sees the traits. Two backends exist:
//! - `sysfs_gpio` - Linux `/sys/class/gpio` lines
//! - `sim_gpio` - time-driven echo simulation for development and tests

use crate::domain::types::SlotId;
use crate::infra::config::{Config, GpioBackend};
use crate::io::sim_gpio::SimulatedBoard;
use crate::io::sysfs_gpio::{SysfsInput, SysfsOutput};
use anyhow::Context;
use std::io;
use tracing::{info, warn};

/// Digital output line (trigger, indicator)
pub trait OutputLine: Send {
    /// Drive the line high (logic 1)
    fn set_high(&mut self) -> io::Result<()>;

    /// Drive the line low (logic 0)
    fn set_low(&mut self) -> io::Result<()>;

    /// Drive the line to a specific level
    fn set_state(&mut self, high: bool) -> io::Result<()> {
        if high {
            self.set_high()
        } else {
            self.set_low()
        }
    }
}

/// Digital input line (echo)
pub trait InputLine: Send {
    /// Check if the line reads high (logic 1)
    fn is_high(&mut self) -> io::Result<bool>;

    /// Check if the line reads low (logic 0)
    fn is_low(&mut self) -> io::Result<bool> {
        Ok(!self.is_high()?)
    }
}

/// Opened lines for one slot. Lives for the process lifetime.
pub struct SensorBinding {
    pub slot: SlotId,
    pub trigger: Box<dyn OutputLine>,
    pub echo: Box<dyn InputLine>,
    pub indicator: Box<dyn OutputLine>,
}

impl SensorBinding {
    pub fn new(
        slot: SlotId,
        trigger: Box<dyn OutputLine>,
        echo: Box<dyn InputLine>,
        indicator: Box<dyn OutputLine>,
    ) -> Self {
        Self { slot, trigger, echo, indicator }
    }

    /// Drive every output low
    pub fn release(&mut self) {
        if let Err(e) = self.trigger.set_low() {
            warn!(slot = %self.slot, error = %e, "trigger_release_failed");
        }
        if let Err(e) = self.indicator.set_low() {
            warn!(slot = %self.slot, error = %e, "indicator_release_failed");
        }
    }
}

impl Drop for SensorBinding {
    fn drop(&mut self) {
        self.release();
    }
}

/// Claim and configure the lines of every configured slot
pub fn open_bindings(config: &Config) -> anyhow::Result<Vec<SensorBinding>> {
    match config.gpio_backend() {
        GpioBackend::Sysfs => {
            let root = config.sysfs_root();
            let mut bindings = Vec::with_capacity(config.slots().len());
            for slot in config.slots() {
                let trigger = SysfsOutput::open(root, slot.trigger)
                    .with_context(|| format!("slot {}: trigger line {}", slot.id, slot.trigger))?;
                let echo = SysfsInput::open(root, slot.echo)
                    .with_context(|| format!("slot {}: echo line {}", slot.id, slot.echo))?;
                let indicator = SysfsOutput::open(root, slot.indicator).with_context(|| {
                    format!("slot {}: indicator line {}", slot.id, slot.indicator)
                })?;
                bindings.push(SensorBinding::new(
                    SlotId::new(slot.id.clone()),
                    Box::new(trigger),
                    Box::new(echo),
                    Box::new(indicator),
                ));
            }
            info!(backend = "sysfs", slots = bindings.len(), "gpio_initialized");
            Ok(bindings)
        }
        GpioBackend::Simulated => {
            let (bindings, _board) = SimulatedBoard::from_config(config).into_bindings();
            info!(backend = "simulated", slots = bindings.len(), "gpio_initialized");
            Ok(bindings)
        }
    }
}
