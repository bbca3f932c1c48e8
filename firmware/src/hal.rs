//! Hardware abstraction consumed by the input drivers.
//!
//! A single [`Hal`] implementation is injected at configuration time;
//! real builds adapt it to the MCU peripherals, tests inject
//! [`crate::testing::FakeHal`].

use std::sync::Arc;

use crate::gpio::Gpio;

/// An I2C bus controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum I2cBus {
    /// Primary bus.
    Primary,
    /// Secondary bus. Falls back to the primary bus on single-bus chips.
    Secondary,
}

impl I2cBus {
    /// Bus index for diagnostics.
    #[must_use]
    pub fn index(self) -> u8 {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
        }
    }
}

/// A failed or timed-out I2C transaction.
///
/// Transient by definition: the producing driver swallows it and
/// recovers on the next polling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cFailure;

/// Low-level hardware services.
///
/// All methods are callable from any task; `get_level` is additionally
/// callable from interrupt context.
pub trait Hal: Send + Sync {
    /// Whether a pin number exists and is usable at all.
    fn is_valid_pin(&self, pin: Gpio) -> bool;
    /// Whether a pin can drive an output signal.
    fn is_output_capable(&self, pin: Gpio) -> bool;
    /// Whether a pin is wired to the ADC.
    fn is_adc_capable(&self, pin: Gpio) -> bool;
    /// Whether a pin can wake the device from deep sleep.
    fn is_rtc_capable(&self, pin: Gpio) -> bool;

    /// Configure a pin for digital input.
    fn configure_input(&self, pin: Gpio, pull_down: bool, pull_up: bool);
    /// Configure a pin for digital output at an initial level.
    fn configure_output(&self, pin: Gpio, initial_level: bool, open_drain: bool);

    /// Drive an output pin.
    fn set_level(&self, pin: Gpio, level: bool);
    /// Read a digital input pin.
    fn get_level(&self, pin: Gpio) -> bool;
    /// Read the ADC attached to a pin. 12-bit resolution.
    fn adc_read(&self, pin: Gpio) -> u16;

    /// Busy-wait for an electrical signal to propagate.
    ///
    /// Tens of nanoseconds for direct GPIO wiring. The default
    /// implementation does nothing, which suits host-side tests.
    fn signal_change_delay(&self, nanoseconds: u32) {
        let _ = nanoseconds;
    }

    /// Attach an edge-interrupt handler to a pin.
    fn enable_isr(&self, pin: Gpio, handler: Arc<dyn Fn() + Send + Sync>);

    /// All 7-bit addresses responding on a bus.
    fn i2c_probe(&self, bus: I2cBus) -> Vec<u8>;

    /// Request a minimum bus speed multiplier. The bus runs at the
    /// maximum of all requests.
    fn i2c_require_speed(&self, bus: I2cBus, multiplier: u8) {
        let _ = (bus, multiplier);
    }

    /// Write bytes to a device. One short, atomic transaction with a
    /// 30 ms timeout.
    ///
    /// # Errors
    ///
    /// [`I2cFailure`] when the device does not acknowledge in time.
    fn i2c_write(&self, bus: I2cBus, address7: u8, bytes: &[u8]) -> Result<(), I2cFailure>;

    /// Write a command, then read back into `read_into`, as one
    /// transaction with a 30 ms timeout. An empty `command` performs a
    /// plain read.
    ///
    /// # Errors
    ///
    /// [`I2cFailure`] when the device does not acknowledge in time.
    fn i2c_write_read(
        &self,
        bus: I2cBus,
        address7: u8,
        command: &[u8],
        read_into: &mut [u8],
    ) -> Result<(), I2cFailure>;
}

/// Deduce a full I2C address from a partially wired one.
///
/// `partial` holds only the user-wired low address bits; the candidate
/// set are the probed addresses whose low three bits match.
///
/// Returns `None` when no device matches and `Err`-like ambiguity is
/// reported as `Some(Err(()))`-free two-state: the caller distinguishes
/// "not found" (empty) from "ambiguous" (more than one).
pub(crate) fn deduce_full_address(probed: &[u8], partial: u8) -> FullAddressMatch {
    let mut matches = probed.iter().filter(|a| (*a & 0b111) == (partial & 0b111));
    match (matches.next(), matches.next()) {
        (None, _) => FullAddressMatch::NotFound,
        (Some(address), None) => FullAddressMatch::Unique(*address),
        (Some(_), Some(_)) => FullAddressMatch::Ambiguous,
    }
}

/// Outcome of a partial-address probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FullAddressMatch {
    /// Exactly one device matches the wired bits.
    Unique(u8),
    /// No device matches.
    NotFound,
    /// More than one device matches.
    Ambiguous,
}
