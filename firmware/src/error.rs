//! Error types raised during device configuration.
//!
//! Configuration errors are fatal: the device refuses to start and no
//! HID enumeration takes place. Transient runtime I/O failures never
//! surface here; the affected driver degrades to its previous state.

use thiserror::Error;

/// Invalid use of a GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GpioError {
    /// The pin number does not exist on this hardware.
    #[error("GPIO {0} does not exist")]
    NoSuchPin(u8),
    /// The pin cannot drive an output signal.
    #[error("GPIO {0} is not output-capable")]
    NotOutputCapable(u8),
    /// The pin is not wired to the ADC.
    #[error("GPIO {0} is not ADC-capable")]
    NotAdcCapable(u8),
    /// The pin cannot wake the device from deep sleep.
    #[error("GPIO {0} is not RTC-capable")]
    NotRtcCapable(u8),
    /// The pin was reserved twice.
    #[error("GPIO {0} is already in use")]
    AlreadyReserved(u8),
    /// A pin is required but none was given.
    #[error("a GPIO pin is required but unspecified")]
    Unspecified,
}

/// Fatal error raised while configuring the device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A firmware input number outside `[0,63]`.
    #[error("the input number {0} is out of range [0,63]")]
    InvalidInputNumber(u8),
    /// A firmware input number is required but none was given.
    #[error("trying to use an unspecified input number")]
    UnspecifiedInputNumber,
    /// A user-defined input number outside `[0,127]`.
    #[error("the user-defined input number {0} is out of range [0,127]")]
    InvalidUserInputNumber(u8),
    /// Invalid use of a GPIO pin.
    #[error(transparent)]
    Gpio(#[from] GpioError),
    /// A hardware block was registered without any input numbers.
    #[error("no input numbers were given to: {0}")]
    EmptyInputNumberSet(&'static str),
    /// A semantic feature references an input number that is not
    /// assigned to any hardware input.
    #[error("there is an input number not assigned to a hardware input. Usage: {0}")]
    UnknownInputNumber(&'static str),
    /// A 7-bit I2C address outside the valid range.
    #[error("invalid I2C address {0:#04x}")]
    InvalidI2cAddress(u8),
    /// No device responds to the given I2C address.
    #[error("no device is responding to I2C address {address:#04x} on bus {bus}")]
    I2cDeviceNotFound {
        /// 7-bit device address, full or partial.
        address: u8,
        /// Bus index.
        bus: u8,
    },
    /// A partial hardware address matches more than one device on the bus.
    #[error("unable to deduce a full I2C address from {address:#04x} on bus {bus}")]
    I2cFullAddressUnknown {
        /// Partial (wired) device address.
        address: u8,
        /// Bus index.
        bus: u8,
    },
    /// Incompatible feature combination.
    #[error("{0}")]
    Conflict(String),
}

impl ConfigError {
    /// Shorthand for a [`ConfigError::Conflict`] with a formatted message.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}
