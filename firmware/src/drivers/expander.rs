//! I2C GPIO expanders used as button inputs.

use std::sync::Arc;

use log::warn;

use crate::hal::{Hal, I2cBus, I2cFailure};
use crate::types::InputNumber;

use super::{mask_of, DigitalInput};

// MCP23017 register addresses (bank 0 layout).
const MCP23017_IO_CONFIGURATION: u8 = 0x0A;
const MCP23017_IO_DIRECTION: u8 = 0x00;
const MCP23017_PULL_UP_RESISTORS: u8 = 0x0C;
const MCP23017_GPIO: u8 = 0x12;
const MCP23017_POLARITY: u8 = 0x02;
const MCP23017_INTERRUPT_ON_CHANGE: u8 = 0x04;
const MCP23017_INTERRUPT_CONTROL: u8 = 0x08;
const MCP23017_INTERRUPT_DEFAULT_VALUE: u8 = 0x06;

fn pin_state(raw: u64, assignments: &[(u8, u64)]) -> u64 {
    let mut result = 0u64;
    for (pin, bitmap) in assignments {
        if raw & (1u64 << pin) != 0 {
            result |= bitmap;
        }
    }
    result
}

/// Buttons behind a PCF8574 8-bit expander.
pub struct Pcf8574Input {
    hal: Arc<dyn Hal>,
    bus: I2cBus,
    address7: u8,
    // (expander pin, input bitmap)
    assignments: Vec<(u8, u64)>,
    mask: u64,
}

impl Pcf8574Input {
    /// Attach a chip at a full 7-bit address.
    pub fn new(
        hal: Arc<dyn Hal>,
        bus: I2cBus,
        address7: u8,
        pins: &[(u8, InputNumber)],
    ) -> Self {
        hal.i2c_require_speed(bus, 1);
        let assignments: Vec<(u8, u64)> =
            pins.iter().map(|(p, n)| (*p, n.bitmap())).collect();
        let mask = mask_of(assignments.iter().map(|(_, b)| *b));
        let driver = Self {
            hal,
            bus,
            address7,
            assignments,
            mask,
        };
        // The PCF8574 has no registers; one dummy read clears any
        // pending interrupt state.
        let _ = driver.gpio_state();
        driver
    }

    fn gpio_state(&self) -> Result<u64, I2cFailure> {
        let mut buffer = [0u8; 1];
        self.hal
            .i2c_write_read(self.bus, self.address7, &[], &mut buffer)?;
        // Convert to positive logic
        Ok(u64::from(!buffer[0]))
    }
}

impl DigitalInput for Pcf8574Input {
    fn mask(&self) -> u64 {
        self.mask
    }

    fn read(&mut self, previous: u64) -> u64 {
        match self.gpio_state() {
            Ok(raw) => pin_state(raw, &self.assignments),
            Err(I2cFailure) => previous & !self.mask,
        }
    }
}

/// Buttons behind an MCP23017 16-bit expander.
pub struct Mcp23017Input {
    hal: Arc<dyn Hal>,
    bus: I2cBus,
    address7: u8,
    assignments: Vec<(u8, u64)>,
    mask: u64,
}

impl Mcp23017Input {
    /// Attach and configure a chip at a full 7-bit address.
    pub fn new(
        hal: Arc<dyn Hal>,
        bus: I2cBus,
        address7: u8,
        pins: &[(u8, InputNumber)],
    ) -> Self {
        hal.i2c_require_speed(bus, 1);
        let assignments: Vec<(u8, u64)> =
            pins.iter().map(|(p, n)| (*p, n.bitmap())).collect();
        let mask = mask_of(assignments.iter().map(|(_, b)| *b));
        let driver = Self {
            hal,
            bus,
            address7,
            assignments,
            mask,
        };
        driver.configure();
        // Read the GPIO registers once to clear pending interrupts.
        let _ = driver.gpio_state();
        driver
    }

    fn configure(&self) {
        // IOCON: one register bank, mirrored interrupt pins, sequential
        // operation, active-driver interrupt output, active low.
        let setup: [&[u8]; 7] = [
            &[MCP23017_IO_CONFIGURATION, 0b0100_0000],
            // All pins are inputs
            &[MCP23017_IO_DIRECTION, 0xFF, 0xFF],
            // Internal pull-ups
            &[MCP23017_PULL_UP_RESISTORS, 0xFF, 0xFF],
            // The chip converts negative logic to positive logic itself
            &[MCP23017_POLARITY, 0xFF, 0xFF],
            // Interrupt on change, compared against DEFVAL
            &[MCP23017_INTERRUPT_ON_CHANGE, 0xFF, 0xFF],
            &[MCP23017_INTERRUPT_CONTROL, 0xFF, 0xFF],
            &[MCP23017_INTERRUPT_DEFAULT_VALUE, 0x00, 0x00],
        ];
        for transaction in setup {
            if self.hal.i2c_write(self.bus, self.address7, transaction).is_err() {
                warn!(
                    "MCP23017 at {:#04x}: configuration transaction failed",
                    self.address7
                );
            }
        }
    }

    fn gpio_state(&self) -> Result<u64, I2cFailure> {
        let mut buffer = [0u8; 2];
        self.hal
            .i2c_write_read(self.bus, self.address7, &[MCP23017_GPIO], &mut buffer)?;
        Ok(u64::from(u16::from_le_bytes(buffer)))
    }
}

impl DigitalInput for Mcp23017Input {
    fn mask(&self) -> u64 {
        self.mask
    }

    fn read(&mut self, previous: u64) -> u64 {
        match self.gpio_state() {
            Ok(raw) => pin_state(raw, &self.assignments),
            Err(I2cFailure) => previous & !self.mask,
        }
    }
}
