//! Rotary switches whose position is binary-coded on GPIO pins.

use std::sync::Arc;

use crate::gpio::Gpio;
use crate::hal::Hal;
use crate::types::InputNumber;

use super::{mask_of, DigitalInput};

/// A rotary coded switch wired straight to GPIO pins.
///
/// The switch encodes its position in binary across its pins; the
/// driver reports exactly one of the assigned position inputs.
pub struct RotaryCodedSwitchInput {
    hal: Arc<dyn Hal>,
    pins: Vec<Gpio>,
    // Indexed by decoded position; zero for unassigned positions.
    bitmaps: Vec<u64>,
    complementary: bool,
    mask: u64,
}

impl RotaryCodedSwitchInput {
    /// Attach a switch. `positions` maps decoded positions to input
    /// numbers; positions left out never report. With
    /// `complementary` set, the wiring uses complementary code
    /// (active-low position bits).
    pub fn new(
        hal: Arc<dyn Hal>,
        pins: Vec<Gpio>,
        positions: &[(u8, InputNumber)],
        complementary: bool,
    ) -> Self {
        let mut bitmaps = vec![0u64; 1 << pins.len()];
        for (position, number) in positions {
            bitmaps[*position as usize] = number.bitmap();
        }
        for pin in &pins {
            hal.configure_input(*pin, false, true);
        }
        let mask = mask_of(bitmaps.iter().copied());
        Self {
            hal,
            pins,
            bitmaps,
            complementary,
            mask,
        }
    }
}

impl DigitalInput for RotaryCodedSwitchInput {
    fn mask(&self) -> u64 {
        self.mask
    }

    fn read(&mut self, _previous: u64) -> u64 {
        let mut position = 0usize;
        for (bit, pin) in self.pins.iter().enumerate() {
            let level = self.hal.get_level(*pin);
            if level != self.complementary {
                position |= 1 << bit;
            }
        }
        self.bitmaps[position]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHal;

    #[test]
    fn decodes_the_wired_position() {
        let hal = Arc::new(FakeHal::new());
        let pins = vec![Gpio::new(14), Gpio::new(15), Gpio::new(16)];
        let positions = [
            (0u8, InputNumber::new(40).unwrap()),
            (5u8, InputNumber::new(41).unwrap()),
        ];
        let mut driver = RotaryCodedSwitchInput::new(
            Arc::clone(&hal) as Arc<dyn Hal>,
            pins,
            &positions,
            false,
        );

        hal.set_input_level(Gpio::new(14), false);
        hal.set_input_level(Gpio::new(15), false);
        hal.set_input_level(Gpio::new(16), false);
        assert_eq!(driver.read(0), 1u64 << 40);

        // Position 5 = 0b101
        hal.set_input_level(Gpio::new(14), true);
        hal.set_input_level(Gpio::new(16), true);
        assert_eq!(driver.read(0), 1u64 << 41);

        // An unassigned position reports nothing.
        hal.set_input_level(Gpio::new(16), false);
        assert_eq!(driver.read(0), 0);
    }
}
