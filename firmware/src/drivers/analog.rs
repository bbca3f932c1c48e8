//! Analog clutch paddles read through the ADC.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::gpio::Gpio;
use crate::hal::Hal;
use crate::types::{CLUTCH_FULL_VALUE, CLUTCH_NONE_VALUE};

use super::{map_value, AnalogInput, AxisReading};

/// Calibration range of one analog axis, shared between the polling
/// driver and the configuration side (recalibration commands, storage).
#[derive(Debug)]
pub struct AxisCalibration {
    min: AtomicI32,
    max: AtomicI32,
}

impl Default for AxisCalibration {
    fn default() -> Self {
        // Assume the potentiometer covers the full voltage range until
        // told otherwise; the user may ask for recalibration.
        Self {
            min: AtomicI32::new(0),
            max: AtomicI32::new(254),
        }
    }
}

impl AxisCalibration {
    /// Current `(min, max)` ADC readings.
    #[must_use]
    pub fn get(&self) -> (i32, i32) {
        (self.min.load(Ordering::Relaxed), self.max.load(Ordering::Relaxed))
    }

    /// Overwrite the calibration range.
    pub fn set(&self, min: i32, max: i32) {
        self.min.store(min, Ordering::Relaxed);
        self.max.store(max, Ordering::Relaxed);
    }

    /// Forget the range; the next readings re-learn it.
    pub fn reset(&self) {
        self.set(i32::MAX, i32::MIN);
    }
}

/// One analog clutch paddle.
pub struct AnalogClutch {
    hal: Arc<dyn Hal>,
    pin: Gpio,
    last_reading: i32,
    calibration: Arc<AxisCalibration>,
}

impl AnalogClutch {
    /// Attach a paddle to an ADC pin.
    pub fn new(hal: Arc<dyn Hal>, pin: Gpio, calibration: Arc<AxisCalibration>) -> Self {
        Self {
            hal,
            pin,
            last_reading: 0,
            calibration,
        }
    }
}

impl AnalogInput for AnalogClutch {
    fn read(&mut self) -> AxisReading {
        // Drop four noise bits, then average with the previous sample.
        let raw = i32::from(self.hal.adc_read(self.pin)) >> 4;
        let reading = (raw + self.last_reading) >> 1;
        self.last_reading = reading;

        let mut autocalibrated = false;
        let (mut min, mut max) = self.calibration.get();
        if reading < min {
            min = reading;
            self.calibration.min.store(min, Ordering::Relaxed);
            autocalibrated = true;
        }
        if reading > max {
            max = reading;
            self.calibration.max.store(max, Ordering::Relaxed);
            autocalibrated = true;
        }

        let value = if min == max {
            CLUTCH_NONE_VALUE
        } else {
            // The wiring is inverted: the minimum reading is a fully
            // engaged paddle.
            let mapped = map_value(
                reading,
                min,
                max,
                i32::from(CLUTCH_FULL_VALUE),
                i32::from(CLUTCH_NONE_VALUE),
            );
            u8::try_from(mapped.clamp(0, i32::from(CLUTCH_FULL_VALUE))).unwrap_or(CLUTCH_NONE_VALUE)
        };
        AxisReading {
            value,
            autocalibrated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHal;

    #[test]
    fn maps_readings_into_the_reversed_axis_range() {
        let hal = Arc::new(FakeHal::new());
        let calibration = Arc::new(AxisCalibration::default());
        let mut axis = AnalogClutch::new(
            Arc::clone(&hal) as Arc<dyn Hal>,
            Gpio::new(33),
            Arc::clone(&calibration),
        );

        // Two consecutive zero readings: fully engaged.
        hal.set_adc_reading(Gpio::new(33), 0);
        let _ = axis.read();
        assert_eq!(axis.read().value, CLUTCH_FULL_VALUE);

        // Full-scale readings settle at the released end.
        hal.set_adc_reading(Gpio::new(33), 4095);
        for _ in 0..12 {
            let _ = axis.read();
        }
        assert_eq!(axis.read().value, CLUTCH_NONE_VALUE);
    }

    #[test]
    fn recalibration_relearns_the_range() {
        let hal = Arc::new(FakeHal::new());
        let calibration = Arc::new(AxisCalibration::default());
        let mut axis = AnalogClutch::new(
            Arc::clone(&hal) as Arc<dyn Hal>,
            Gpio::new(33),
            Arc::clone(&calibration),
        );
        calibration.reset();

        hal.set_adc_reading(Gpio::new(33), 2048);
        let first = axis.read();
        assert!(first.autocalibrated);
        // Degenerate range: axis reads released until the range grows.
        assert_eq!(first.value, CLUTCH_NONE_VALUE);

        hal.set_adc_reading(Gpio::new(33), 0);
        let mut widened = false;
        for _ in 0..12 {
            widened |= axis.read().autocalibrated;
        }
        assert!(widened);
        assert_eq!(axis.read().value, CLUTCH_FULL_VALUE);
    }
}
