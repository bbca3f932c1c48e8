//! Battery profiling.
//!
//! The battery monitor itself is an external collaborator; this module
//! owns the calibration data it samples against: a 32-quantum
//! histogram of ADC readings taken while discharging, interpolated
//! into a state of charge. Without calibration data, a generic LiPo
//! curve anchored at the highest reading ever seen is used instead.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::drivers::map_value;
use crate::events::EventBus;
use crate::types::{UserSetting, UNKNOWN_BATTERY_LEVEL};

const QUANTUM_BITS: u32 = 5;
/// Number of calibration quanta.
pub const QUANTUM_COUNT: usize = 1 << QUANTUM_BITS;
// 12 = ADC resolution in bits
const QUANTUM_SIZE: i32 = 1 << (12 - QUANTUM_BITS);

/// State of charge from a generic LiPo discharge curve, for readings
/// scaled into the curve's native range.
fn generic_lipo_level(reading: i32) -> i32 {
    if reading < 4059 {
        0
    } else if reading < 4580 {
        (10 * (reading - 4059)) / 521
    } else if reading < 4803 {
        (50 * (reading - 4580)) / 223 + 10
    } else if reading < 5213 {
        (40 * (reading - 4803)) / 410 + 60
    } else {
        100
    }
}

/// Battery calibration data and the derived state-of-charge queries.
pub struct BatteryCalibration {
    bus: Arc<EventBus>,
    quantum: Mutex<[u16; QUANTUM_COUNT]>,
    total_samples: AtomicU32,
    // Negative when unknown
    max_reading_ever: AtomicI32,
}

impl BatteryCalibration {
    /// Create an empty calibration set.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            quantum: Mutex::new([0; QUANTUM_COUNT]),
            total_samples: AtomicU32::new(0),
            max_reading_ever: AtomicI32::new(-1),
        }
    }

    /// Whether calibration samples are available.
    #[must_use]
    pub fn is_calibrated(&self) -> bool {
        self.total_samples.load(Ordering::Relaxed) > 0
    }

    /// Restart the auto-calibration algorithm from scratch.
    pub fn restart_auto_calibration(&self) {
        self.max_reading_ever.store(-1, Ordering::Relaxed);
        self.bus
            .save_setting
            .notify(UserSetting::BatteryAutoCalibration);
    }

    /// Record one ADC reading taken while discharging.
    ///
    /// Readings outside the 12-bit ADC range are ignored.
    pub fn add_sample(&self, reading: i32) {
        if !(0..=4095).contains(&reading) {
            return;
        }
        let index = (reading >> (12 - QUANTUM_BITS)) as usize;
        let mut quantum = self.quantum.lock().expect("battery calibration poisoned");
        quantum[index] += 1;
        self.total_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// State of charge for an ADC reading, from calibration data.
    /// Returns -1 when no calibration data is available.
    #[must_use]
    pub fn battery_level(&self, reading: i32) -> i32 {
        let total = self.total_samples.load(Ordering::Relaxed);
        if total == 0 {
            return -1;
        }
        if reading >= 4096 {
            return 100;
        }
        if reading <= 0 {
            return 0;
        }
        let quantum = self.quantum.lock().expect("battery calibration poisoned");
        let index = (reading >> (12 - QUANTUM_BITS)) as usize;
        let accumulated: i32 = quantum[..index].iter().map(|q| i32::from(*q)).sum();
        let relative_reading = reading - (QUANTUM_SIZE * index as i32);
        let samples_1000_per_unit = (i32::from(quantum[index]) * 1000) / QUANTUM_SIZE;
        let interpolated = (relative_reading * samples_1000_per_unit) / 1000 + accumulated;
        let total = i32::try_from(total).unwrap_or(i32::MAX);
        (interpolated * 100) / total
    }

    /// State of charge from the generic LiPo curve, auto-calibrated
    /// against the highest reading ever seen.
    #[must_use]
    pub fn battery_level_auto_calibrated(&self, reading: i32) -> i32 {
        if reading >= 4095 {
            return 100;
        }
        if reading <= 0 {
            return 0;
        }
        if reading > self.max_reading_ever.load(Ordering::Relaxed) {
            self.max_reading_ever.store(reading, Ordering::Relaxed);
            self.bus
                .save_setting
                .notify(UserSetting::BatteryAutoCalibration);
        }

        let max_ever = self.max_reading_ever.load(Ordering::Relaxed);
        if max_ever >= 0 {
            let min_reading = 4059 * max_ever / 5213;
            let scaled = map_value(reading, min_reading, max_ever, 4059, 5213);
            generic_lipo_level(scaled)
        } else {
            i32::from(UNKNOWN_BATTERY_LEVEL)
        }
    }

    /// Number of calibration data slots.
    #[must_use]
    pub fn data_count(&self) -> usize {
        QUANTUM_COUNT
    }

    /// One calibration data slot, for persistence.
    #[must_use]
    pub fn data(&self, index: usize) -> u16 {
        if index < QUANTUM_COUNT {
            self.quantum.lock().expect("battery calibration poisoned")[index]
        } else {
            0
        }
    }

    /// Overwrite one calibration data slot, for persistence.
    pub fn set_data(&self, index: usize, value: u16, save: bool) {
        if index >= QUANTUM_COUNT {
            return;
        }
        let mut quantum = self.quantum.lock().expect("battery calibration poisoned");
        if quantum[index] == value {
            return;
        }
        let total = self.total_samples.load(Ordering::Relaxed);
        let total = total - u32::from(quantum[index]) + u32::from(value);
        self.total_samples.store(total, Ordering::Relaxed);
        quantum[index] = value;
        if save {
            self.bus
                .save_setting
                .notify(UserSetting::BatteryCalibrationData);
        }
    }

    /// The auto-calibration parameter, for persistence. Negative when
    /// unknown.
    #[must_use]
    pub fn auto_calibration_parameter(&self) -> i32 {
        self.max_reading_ever.load(Ordering::Relaxed)
    }

    /// Overwrite the auto-calibration parameter, for persistence.
    pub fn set_auto_calibration_parameter(&self, value: i32, save: bool) {
        if value != self.max_reading_ever.load(Ordering::Relaxed) {
            self.max_reading_ever.store(value, Ordering::Relaxed);
            if save {
                self.bus
                    .save_setting
                    .notify(UserSetting::BatteryAutoCalibration);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibration() -> BatteryCalibration {
        BatteryCalibration::new(Arc::new(EventBus::default()))
    }

    #[test]
    fn uncalibrated_level_is_unknown() {
        let cal = calibration();
        assert_eq!(cal.battery_level(2000), -1);
        assert!(!cal.is_calibrated());
    }

    #[test]
    fn uniform_samples_interpolate_linearly() {
        let cal = calibration();
        // One sample in every quantum: a flat discharge profile.
        for q in 0..QUANTUM_COUNT {
            cal.add_sample((q as i32) * QUANTUM_SIZE);
        }
        assert!(cal.is_calibrated());
        assert_eq!(cal.battery_level(0), 0);
        assert_eq!(cal.battery_level(4096), 100);
        let mid = cal.battery_level(2048);
        assert!((45..=55).contains(&mid), "mid level was {mid}");
    }

    #[test]
    fn auto_calibration_tracks_the_highest_reading() {
        let cal = calibration();
        assert_eq!(cal.battery_level_auto_calibrated(3000), 100);
        // A lower reading now maps below full charge.
        let level = cal.battery_level_auto_calibrated(2500);
        assert!(level < 100);
        assert_eq!(cal.auto_calibration_parameter(), 3000);
        cal.restart_auto_calibration();
        assert_eq!(cal.auto_calibration_parameter(), -1);
    }

    #[test]
    fn persisted_data_round_trips() {
        let cal = calibration();
        cal.set_data(3, 17, false);
        cal.set_data(4, 3, false);
        assert_eq!(cal.data(3), 17);
        assert_eq!(cal.data(4), 3);
        assert!(cal.is_calibrated());
        assert_eq!(cal.total_samples.load(Ordering::Relaxed), 20);
    }
}
