//! Button matrix scanning.

use std::sync::Arc;

use crate::gpio::Gpio;
use crate::hal::Hal;
use crate::types::InputNumber;

use super::{mask_of, DigitalInput};

/// A scanned button matrix.
pub struct ButtonMatrixInput {
    hal: Arc<dyn Hal>,
    rows: Vec<(Gpio, Vec<(Gpio, u64)>)>,
    negative_logic: bool,
    mask: u64,
}

impl ButtonMatrixInput {
    /// Attach a matrix given as selector (row) pins, each with its
    /// input (column) pins and their input numbers. Selector pins are
    /// driven one at a time; input pins are pulled towards the
    /// inactive level.
    pub fn new(
        hal: Arc<dyn Hal>,
        matrix: &[(Gpio, Vec<(Gpio, InputNumber)>)],
        negative_logic: bool,
    ) -> Self {
        let mut rows = Vec::with_capacity(matrix.len());
        let mut owned = Vec::new();
        for (selector, columns) in matrix {
            hal.configure_output(*selector, negative_logic, false);
            let mut cols = Vec::with_capacity(columns.len());
            for (input, number) in columns {
                hal.configure_input(*input, !negative_logic, negative_logic);
                cols.push((*input, number.bitmap()));
                owned.push(number.bitmap());
            }
            rows.push((*selector, cols));
        }
        Self {
            hal,
            rows,
            negative_logic,
            mask: mask_of(owned),
        }
    }
}

impl DigitalInput for ButtonMatrixInput {
    fn mask(&self) -> u64 {
        self.mask
    }

    fn read(&mut self, _previous: u64) -> u64 {
        let mut state = 0u64;
        for (selector, columns) in &self.rows {
            self.hal.set_level(*selector, !self.negative_logic);
            // Wait for the selector line to settle through parasitic
            // capacitance before sampling the columns.
            self.hal.signal_change_delay(5);
            for (input, bitmap) in columns {
                if self.hal.get_level(*input) ^ self.negative_logic {
                    state |= bitmap;
                }
            }
            self.hal.set_level(*selector, self.negative_logic);
            // Let the line return to idle, or the next row misreads.
            self.hal.signal_change_delay(5);
        }
        state
    }
}
