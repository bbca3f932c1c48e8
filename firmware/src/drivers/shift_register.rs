//! PISO shift register chains (74HC165N and compatible).

use std::sync::Arc;

use crate::gpio::Gpio;
use crate::hal::Hal;
use crate::types::InputNumber;

use super::{mask_of, DigitalInput};

/// A chain of 8-bit shift register chips, closest to the serial output
/// first. Each chip maps pin indexes `0..8` to input numbers.
pub type ShiftRegisterChain = Vec<Vec<(u8, InputNumber)>>;

/// A chain of parallel-in serial-out shift registers.
pub struct ShiftRegistersInput {
    hal: Arc<dyn Hal>,
    load_pin: Gpio,
    next_pin: Gpio,
    serial_pin: Gpio,
    bitmaps: Vec<u64>,
    mask: u64,
    load_high: bool,
    next_high_to_low: bool,
}

impl ShiftRegistersInput {
    /// Attach a chain. `ser_input` optionally assigns an input number
    /// to the SER pin of the last chip in the chain.
    pub fn new(
        hal: Arc<dyn Hal>,
        load_pin: Gpio,
        next_pin: Gpio,
        serial_pin: Gpio,
        chain: &ShiftRegisterChain,
        ser_input: Option<InputNumber>,
    ) -> Self {
        let mut switch_count = 8 * chain.len();
        if ser_input.is_some() {
            switch_count += 1;
        }
        let mut bitmaps = vec![0u64; switch_count];
        for (chip_index, chip) in chain.iter().enumerate() {
            for (pin_index, number) in chip {
                bitmaps[chip_index * 8 + *pin_index as usize] = number.bitmap();
            }
        }
        if let Some(number) = ser_input {
            bitmaps[switch_count - 1] = number.bitmap();
        }

        let load_high = true;
        let next_high_to_low = true;
        hal.configure_output(load_pin, !load_high, false);
        hal.configure_output(next_pin, next_high_to_low, false);
        hal.configure_input(serial_pin, false, false);

        let mask = mask_of(bitmaps.iter().copied());
        Self {
            hal,
            load_pin,
            next_pin,
            serial_pin,
            bitmaps,
            mask,
            load_high,
            next_high_to_low,
        }
    }
}

impl DigitalInput for ShiftRegistersInput {
    fn mask(&self) -> u64 {
        self.mask
    }

    fn read(&mut self, _previous: u64) -> u64 {
        let mut state = 0u64;

        // Parallel load
        self.hal.set_level(self.load_pin, self.load_high);
        self.hal.signal_change_delay(35);
        self.hal.set_level(self.load_pin, !self.load_high);

        // Serial shift-out
        for bitmap in &self.bitmaps {
            if !self.hal.get_level(self.serial_pin) {
                // Negative logic
                state |= bitmap;
            }
            self.hal.set_level(self.next_pin, !self.next_high_to_low);
            self.hal.signal_change_delay(35);
            self.hal.set_level(self.next_pin, self.next_high_to_low);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHal;

    #[test]
    fn shifts_one_bit_per_switch() {
        let hal = Arc::new(FakeHal::new());
        let chain: ShiftRegisterChain = vec![vec![
            (0, InputNumber::new(20).unwrap()),
            (7, InputNumber::new(21).unwrap()),
        ]];
        let mut driver = ShiftRegistersInput::new(
            Arc::clone(&hal) as Arc<dyn Hal>,
            Gpio::new(30),
            Gpio::new(31),
            Gpio::new(32),
            &chain,
            Some(InputNumber::new(22).unwrap()),
        );
        // 8 chip pins + SER
        assert_eq!(driver.bitmaps.len(), 9);

        hal.set_input_level(Gpio::new(32), true);
        assert_eq!(driver.read(0), 0);

        // Serial line stuck low: every assigned switch reads pressed.
        hal.set_input_level(Gpio::new(32), false);
        assert_eq!(driver.read(0), (1u64 << 20) | (1u64 << 21) | (1u64 << 22));
    }
}
