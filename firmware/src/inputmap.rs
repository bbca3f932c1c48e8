//! Translation of firmware-defined input numbers into user-defined
//! HID button numbers, with an alternative map for ALT mode.

use crate::error::ConfigError;
use crate::types::{InputBookings, InputNumber, UserInputNumber};

/// A user-supplied default map entry.
#[derive(Debug, Clone, Copy)]
struct DefaultEntry {
    firmware: u8,
    no_alt: u8,
    alt: u8,
}

/// The firmware-to-user input map.
///
/// A dense table of 64 entries; entry `i` holds the user input number
/// reported when firmware input `i` is pressed, one value for regular
/// operation and one for ALT mode.
#[derive(Debug, Clone)]
pub struct InputMap {
    no_alt: [u8; 64],
    alt: [u8; 64],
    defaults: Vec<DefaultEntry>,
    compute_optimal: bool,
}

impl Default for InputMap {
    fn default() -> Self {
        let mut map = Self {
            no_alt: [0; 64],
            alt: [0; 64],
            defaults: Vec::new(),
            compute_optimal: false,
        };
        map.reset();
        map
    }
}

impl InputMap {
    /// Register a custom factory default for one firmware input.
    pub fn set_default(
        &mut self,
        firmware: InputNumber,
        user: UserInputNumber,
        user_alt: UserInputNumber,
    ) {
        self.defaults.push(DefaultEntry {
            firmware: firmware.value(),
            no_alt: user.value(),
            alt: user_alt.value(),
        });
    }

    /// Derive factory defaults from the booked input numbers: firmware
    /// input `i` maps to user input `i`, and to `i + max_firmware` in
    /// ALT mode, where `max_firmware` is the highest booked number
    /// plus one.
    pub fn set_optimal(&mut self) {
        self.compute_optimal = true;
    }

    /// Finish configuration against the booking set.
    ///
    /// # Errors
    ///
    /// Fails when a custom default names an unbooked firmware input.
    pub fn finish_configuration(&mut self, bookings: &InputBookings) -> Result<(), ConfigError> {
        if self.compute_optimal {
            let mut max_firmware: u8 = 64;
            while max_firmware > 0 && !bookings.is_booked(max_firmware - 1) {
                max_firmware -= 1;
            }
            for i in 0..64u8 {
                if bookings.is_booked(i)
                    && !self.defaults.iter().any(|entry| entry.firmware == i)
                {
                    self.defaults.push(DefaultEntry {
                        firmware: i,
                        no_alt: i,
                        alt: (i + max_firmware).min(UserInputNumber::MAX),
                    });
                }
            }
        }
        for entry in &self.defaults {
            if !bookings.is_booked(entry.firmware) {
                return Err(ConfigError::UnknownInputNumber("custom input map defaults"));
            }
        }
        self.reset();
        Ok(())
    }

    /// Restore the factory default map.
    pub fn reset(&mut self) {
        for i in 0..64u8 {
            self.no_alt[i as usize] = i;
            self.alt[i as usize] = i + 64;
        }
        for entry in &self.defaults {
            self.no_alt[entry.firmware as usize] = entry.no_alt;
            self.alt[entry.firmware as usize] = entry.alt;
        }
    }

    /// Update one map entry. Out-of-range values are silently ignored,
    /// as required by the host-facing protocol.
    pub fn set(&mut self, firmware: u8, user: u8, user_alt: u8) {
        if firmware < 64 && user <= UserInputNumber::MAX && user_alt <= UserInputNumber::MAX {
            self.no_alt[firmware as usize] = user;
            self.alt[firmware as usize] = user_alt;
        }
    }

    /// Read one map entry as `(no_alt, alt)`.
    #[must_use]
    pub fn get(&self, firmware: u8) -> Option<(u8, u8)> {
        if firmware < 64 {
            Some((self.no_alt[firmware as usize], self.alt[firmware as usize]))
        } else {
            None
        }
    }

    /// Translate a firmware bitmap into the two HID button bitmaps.
    #[must_use]
    pub fn map(&self, alt_engaged: bool, firmware_bitmap: u64) -> (u64, u64) {
        let mut low = 0u64;
        let mut high = 0u64;
        for i in 0..64 {
            if firmware_bitmap & (1u64 << i) != 0 {
                let user = if alt_engaged {
                    self.alt[i]
                } else {
                    self.no_alt[i]
                };
                if user < 64 {
                    low |= 1u64 << user;
                } else {
                    high |= 1u64 << (user - 64);
                }
            }
        }
        (low, high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(n: u8) -> InputNumber {
        InputNumber::new(n).unwrap()
    }

    fn user(n: u8) -> UserInputNumber {
        UserInputNumber::new(n).unwrap()
    }

    #[test]
    fn factory_defaults_are_identity_plus_64() {
        let map = InputMap::default();
        for i in 0..64u8 {
            assert_eq!(map.get(i), Some((i, i + 64)));
        }
        assert_eq!(map.get(64), None);
    }

    #[test]
    fn custom_defaults_survive_reset() {
        let mut map = InputMap::default();
        map.set_default(input(3), user(100), user(101));
        map.reset();
        assert_eq!(map.get(3), Some((100, 101)));
        assert_eq!(map.get(4), Some((4, 68)));

        map.set(3, 1, 2);
        assert_eq!(map.get(3), Some((1, 2)));
        map.reset();
        assert_eq!(map.get(3), Some((100, 101)));
    }

    #[test]
    fn host_writes_ignore_out_of_range_values() {
        let mut map = InputMap::default();
        map.set(64, 0, 0);
        map.set(0, 200, 0);
        map.set(0, 0, 200);
        assert_eq!(map.get(0), Some((0, 64)));
    }

    #[test]
    fn optimal_defaults_follow_the_highest_booked_number() {
        let mut bookings = InputBookings::default();
        for n in [0u8, 1, 2, 9] {
            bookings.book(input(n));
        }
        let mut map = InputMap::default();
        map.set_optimal();
        map.set_default(input(2), user(30), user(31));
        map.finish_configuration(&bookings).unwrap();

        // Highest booked number is 9, so ALT entries start at 10.
        assert_eq!(map.get(0), Some((0, 10)));
        assert_eq!(map.get(1), Some((1, 11)));
        assert_eq!(map.get(9), Some((9, 19)));
        // The custom default wins over the optimal assignment.
        assert_eq!(map.get(2), Some((30, 31)));
        // Unbooked numbers keep the absolute defaults.
        assert_eq!(map.get(5), Some((5, 69)));
    }

    #[test]
    fn defaults_for_unbooked_inputs_are_rejected() {
        let bookings = InputBookings::default();
        let mut map = InputMap::default();
        map.set_default(input(3), user(1), user(2));
        assert!(map.finish_configuration(&bookings).is_err());
    }

    #[test]
    fn alt_and_regular_maps_differ_only_where_configured() {
        let map = InputMap::default();
        let bitmap = 0b1011u64;
        let (low, high) = map.map(false, bitmap);
        assert_eq!(low, 0b1011);
        assert_eq!(high, 0);
        let (low, high) = map.map(true, bitmap);
        assert_eq!(low, 0);
        assert_eq!(high, 0b1011);
    }
}
