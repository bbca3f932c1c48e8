//! Analog multiplexers used as digital input expanders.

use std::sync::Arc;

use crate::gpio::Gpio;
use crate::hal::Hal;
use crate::types::InputNumber;

use super::{mask_of, DigitalInput};

/// One analog multiplexer chip: its output pin, and the input numbers
/// assigned to its channels.
#[derive(Debug, Clone)]
pub struct MuxChip {
    /// GPIO wired to the chip's signal output.
    pub input_pin: Gpio,
    /// `(channel, input number)` assignments. Channels left out are
    /// simply never reported.
    pub channels: Vec<(u8, InputNumber)>,
}

/// A group of analog multiplexer chips sharing their selector pins.
pub struct AnalogMultiplexerInput {
    hal: Arc<dyn Hal>,
    selectors: Vec<Gpio>,
    input_pins: Vec<Gpio>,
    // Indexed by (chip_index << selector_count) + channel.
    bitmaps: Vec<u64>,
    switch_count: usize,
    mask: u64,
}

impl AnalogMultiplexerInput {
    /// Attach a group of chips to their shared selector pins.
    pub fn new(hal: Arc<dyn Hal>, selectors: Vec<Gpio>, chips: &[MuxChip]) -> Self {
        let selector_count = selectors.len();
        let switch_count = chips.len() << selector_count;
        let mut bitmaps = vec![0u64; switch_count];
        let mut input_pins = Vec::with_capacity(chips.len());

        for (chip_index, chip) in chips.iter().enumerate() {
            input_pins.push(chip.input_pin);
            for (channel, number) in &chip.channels {
                let switch_index = (chip_index << selector_count) + *channel as usize;
                bitmaps[switch_index] = number.bitmap();
            }
        }

        for pin in &selectors {
            hal.configure_output(*pin, false, false);
        }
        for pin in &input_pins {
            hal.configure_input(*pin, false, true);
        }

        let mask = mask_of(bitmaps.iter().copied());
        Self {
            hal,
            selectors,
            input_pins,
            bitmaps,
            switch_count,
            mask,
        }
    }
}

impl DigitalInput for AnalogMultiplexerInput {
    fn mask(&self) -> u64 {
        self.mask
    }

    fn read(&mut self, _previous: u64) -> u64 {
        let mut state = 0u64;
        for switch_index in 0..self.switch_count {
            for (bit, selector) in self.selectors.iter().enumerate() {
                self.hal.set_level(*selector, switch_index & (1 << bit) != 0);
            }
            // Wait for the selected channel to propagate to the output.
            self.hal.signal_change_delay(25);

            let input_pin = self.input_pins[switch_index >> self.selectors.len()];
            if !self.hal.get_level(input_pin) {
                // Negative logic
                state |= self.bitmaps[switch_index];
            }
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHal;

    #[test]
    fn reports_the_channel_selected_when_the_line_is_low() {
        let hal = Arc::new(FakeHal::new());
        let chip = MuxChip {
            input_pin: Gpio::new(8),
            channels: vec![
                (0, InputNumber::new(10).unwrap()),
                (5, InputNumber::new(11).unwrap()),
            ],
        };
        let selectors = vec![Gpio::new(20), Gpio::new(21), Gpio::new(22)];
        let mut driver =
            AnalogMultiplexerInput::new(Arc::clone(&hal) as Arc<dyn Hal>, selectors, &[chip]);

        // Line high: nothing pressed on any channel.
        hal.set_input_level(Gpio::new(8), true);
        assert_eq!(driver.read(0), 0);

        // Line low on every selection: both assigned channels report.
        hal.set_input_level(Gpio::new(8), false);
        assert_eq!(driver.read(0), (1u64 << 10) | (1u64 << 11));
        assert_eq!(driver.mask(), !((1u64 << 10) | (1u64 << 11)));
    }
}
