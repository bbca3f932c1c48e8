//! A single push button wired straight to a GPIO pin.

use std::sync::Arc;

use crate::gpio::Gpio;
use crate::hal::Hal;
use crate::types::InputNumber;

use super::DigitalInput;

/// One button on one pulled-up input pin, negative logic.
pub struct DigitalButton {
    hal: Arc<dyn Hal>,
    pin: Gpio,
    bitmap: u64,
    mask: u64,
}

impl DigitalButton {
    /// Attach a button to a pin and assign it a firmware input number.
    pub fn new(hal: Arc<dyn Hal>, pin: Gpio, number: InputNumber) -> Self {
        hal.configure_input(pin, false, true);
        let bitmap = number.bitmap();
        Self {
            hal,
            pin,
            bitmap,
            mask: !bitmap,
        }
    }
}

impl DigitalInput for DigitalButton {
    fn mask(&self) -> u64 {
        self.mask
    }

    fn read(&mut self, _previous: u64) -> u64 {
        if self.hal.get_level(self.pin) {
            // Pulled-up input: high means released.
            0
        } else {
            self.bitmap
        }
    }
}
