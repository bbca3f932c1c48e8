//! GPIO pin identifiers and the exclusive-ownership registry.

use std::fmt;

use crate::error::GpioError;
use crate::hal::Hal;

/// A GPIO pin number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Gpio(u8);

impl Gpio {
    /// Wrap a pin number. Existence and capability are checked against
    /// the HAL when the pin is reserved.
    #[must_use]
    pub const fn new(pin: u8) -> Self {
        Self(pin)
    }

    /// Raw pin number.
    #[must_use]
    pub const fn pin(self) -> u8 {
        self.0
    }
}

impl From<u8> for Gpio {
    fn from(pin: u8) -> Self {
        Self(pin)
    }
}

impl fmt::Display for Gpio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

macro_rules! gpio_kind {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Gpio);

        impl $name {
            /// Wrap a pin number.
            #[must_use]
            pub const fn new(pin: u8) -> Self {
                Self(Gpio::new(pin))
            }

            /// Underlying pin.
            #[must_use]
            pub const fn gpio(self) -> Gpio {
                self.0
            }
        }

        impl From<u8> for $name {
            fn from(pin: u8) -> Self {
                Self::new(pin)
            }
        }
    };
}

gpio_kind!(
    /// An input-capable GPIO pin.
    InputGpio
);
gpio_kind!(
    /// An output-capable GPIO pin.
    OutputGpio
);
gpio_kind!(
    /// An ADC-capable GPIO pin.
    AdcGpio
);
gpio_kind!(
    /// An RTC-capable GPIO pin, able to wake the device from deep sleep.
    RtcGpio
);

/// Process-wide set of reserved pins, owned by the device builder.
///
/// Reservation is write-only during the configuration phase and
/// append-only until the device starts.
#[derive(Debug, Default)]
pub struct GpioRegistry {
    reserved: Vec<u8>,
}

impl GpioRegistry {
    /// Reserve an input pin for exclusive use.
    ///
    /// # Errors
    ///
    /// Fails if the pin does not exist or is already reserved.
    pub fn reserve_input(&mut self, hal: &dyn Hal, pin: InputGpio) -> Result<Gpio, GpioError> {
        self.reserve(hal, pin.gpio())
    }

    /// Reserve an output-capable pin for exclusive use.
    ///
    /// # Errors
    ///
    /// Fails if the pin does not exist, cannot drive outputs, or is
    /// already reserved.
    pub fn reserve_output(&mut self, hal: &dyn Hal, pin: OutputGpio) -> Result<Gpio, GpioError> {
        let gpio = pin.gpio();
        if !hal.is_output_capable(gpio) {
            return Err(GpioError::NotOutputCapable(gpio.pin()));
        }
        self.reserve(hal, gpio)
    }

    /// Reserve an ADC-capable pin for exclusive use.
    ///
    /// # Errors
    ///
    /// Fails if the pin does not exist, is not wired to the ADC, or is
    /// already reserved.
    pub fn reserve_adc(&mut self, hal: &dyn Hal, pin: AdcGpio) -> Result<Gpio, GpioError> {
        let gpio = pin.gpio();
        if !hal.is_adc_capable(gpio) {
            return Err(GpioError::NotAdcCapable(gpio.pin()));
        }
        self.reserve(hal, gpio)
    }

    /// Reserve an RTC-capable pin for exclusive use.
    ///
    /// # Errors
    ///
    /// Fails if the pin does not exist, is not RTC-capable, or is
    /// already reserved.
    pub fn reserve_rtc(&mut self, hal: &dyn Hal, pin: RtcGpio) -> Result<Gpio, GpioError> {
        let gpio = pin.gpio();
        if !hal.is_rtc_capable(gpio) {
            return Err(GpioError::NotRtcCapable(gpio.pin()));
        }
        self.reserve(hal, gpio)
    }

    fn reserve(&mut self, hal: &dyn Hal, gpio: Gpio) -> Result<Gpio, GpioError> {
        if !hal.is_valid_pin(gpio) {
            return Err(GpioError::NoSuchPin(gpio.pin()));
        }
        if self.reserved.contains(&gpio.pin()) {
            return Err(GpioError::AlreadyReserved(gpio.pin()));
        }
        self.reserved.push(gpio.pin());
        Ok(gpio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHal;

    #[test]
    fn double_reservation_fails() {
        let hal = FakeHal::new();
        let mut registry = GpioRegistry::default();
        assert!(registry.reserve_input(&hal, InputGpio::new(4)).is_ok());
        assert_eq!(
            registry.reserve_input(&hal, InputGpio::new(4)),
            Err(GpioError::AlreadyReserved(4))
        );
        // A different pin is still fine.
        assert!(registry.reserve_output(&hal, OutputGpio::new(5)).is_ok());
    }

    #[test]
    fn capability_checks_use_the_hal() {
        let hal = FakeHal::new();
        let mut registry = GpioRegistry::default();
        assert_eq!(
            registry.reserve_input(&hal, InputGpio::new(120)),
            Err(GpioError::NoSuchPin(120))
        );
        assert_eq!(
            registry.reserve_output(&hal, OutputGpio::new(85)),
            Err(GpioError::NotOutputCapable(85))
        );
        assert_eq!(
            registry.reserve_rtc(&hal, RtcGpio::new(4)),
            Err(GpioError::NotRtcCapable(4))
        );
        assert!(registry.reserve_rtc(&hal, RtcGpio::new(42)).is_ok());
    }
}
