//! Shared value types and constants for the firmware core.

use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::ConfigError;

/// Value for a fully released clutch.
pub const CLUTCH_NONE_VALUE: u8 = 0;
/// Value for a fully engaged clutch.
pub const CLUTCH_FULL_VALUE: u8 = 254;
/// Default bite point value.
pub const CLUTCH_DEFAULT_VALUE: u8 = 127;
/// Value for a 1/4 engaged clutch.
pub const CLUTCH_1_4_VALUE: u8 = 64;
/// Value for a 3/4 engaged clutch.
pub const CLUTCH_3_4_VALUE: u8 = 192;
/// Invalid clutch value used for masking in the configuration protocol.
pub const CLUTCH_INVALID_VALUE: u8 = 255;

/// Battery level reported while the state of charge is unknown.
pub const UNKNOWN_BATTERY_LEVEL: u8 = 66;

/// Firmware-defined input number in the range `[0,63]`.
///
/// An "unspecified" input number is expressed as `Option<InputNumber>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InputNumber(u8);

impl InputNumber {
    /// Highest valid firmware input number.
    pub const MAX: u8 = 63;

    /// Validate and wrap a firmware input number.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigError::InvalidInputNumber`] when out of range.
    pub fn new(value: u8) -> Result<Self, ConfigError> {
        if value > Self::MAX {
            return Err(ConfigError::InvalidInputNumber(value));
        }
        Ok(Self(value))
    }

    /// Raw input number.
    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    /// Single-bit bitmap for this input number.
    #[must_use]
    pub fn bitmap(self) -> u64 {
        1u64 << self.0
    }
}

impl TryFrom<u8> for InputNumber {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for InputNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bitmap of a combination of input numbers.
#[must_use]
pub fn combination_bitmap(numbers: &[InputNumber]) -> u64 {
    numbers.iter().fold(0u64, |acc, n| acc | n.bitmap())
}

/// User-defined input number in the range `[0,127]`, presented to the
/// host as a HID button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserInputNumber(u8);

impl UserInputNumber {
    /// Highest valid user-defined input number.
    pub const MAX: u8 = 127;

    /// Validate and wrap a user-defined input number.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigError::InvalidUserInputNumber`] when out of range.
    pub fn new(value: u8) -> Result<Self, ConfigError> {
        if value > Self::MAX {
            return Err(ConfigError::InvalidUserInputNumber(value));
        }
        Ok(Self(value))
    }

    /// Raw input number.
    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    /// Bitmap over the least significant 64 HID buttons.
    #[must_use]
    pub fn low(self) -> u64 {
        if self.0 < 64 {
            1u64 << self.0
        } else {
            0
        }
    }

    /// Bitmap over the most significant 64 HID buttons.
    #[must_use]
    pub fn high(self) -> u64 {
        if self.0 >= 64 {
            1u64 << (self.0 - 64)
        } else {
            0
        }
    }
}

impl TryFrom<u8> for UserInputNumber {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Set of firmware input numbers assigned to hardware.
///
/// Booking happens at configuration time and is append-only until the
/// device starts; coded switches trade their bit inputs for their
/// decoded position inputs right before start.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputBookings(u64);

impl InputBookings {
    /// Book an input number as assigned to hardware.
    pub fn book(&mut self, number: InputNumber) {
        self.0 |= number.bitmap();
    }

    /// Remove an input number from the booking set.
    pub fn unbook(&mut self, number: InputNumber) {
        self.0 &= !number.bitmap();
    }

    /// Check whether an input number is booked.
    #[must_use]
    pub fn is_booked(&self, number: u8) -> bool {
        number <= InputNumber::MAX && (self.0 & (1u64 << number)) != 0
    }

    /// All booked input numbers as a bitmap.
    #[must_use]
    pub fn bitmap(&self) -> u64 {
        self.0
    }

    /// Book every input number. For testing.
    pub fn book_all(&mut self) {
        self.0 = u64::MAX;
    }
}

/// User-selected working mode of the clutch paddles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ClutchWorkingMode {
    /// F1-style combined clutch.
    Clutch = 0,
    /// Independent axes.
    Axis,
    /// Paddles engage ALT mode.
    Alt,
    /// Paddles act as regular buttons.
    Button,
    /// Launch control, left paddle is the master.
    LaunchControlMasterLeft,
    /// Launch control, right paddle is the master.
    LaunchControlMasterRight,
}

impl ClutchWorkingMode {
    /// Highest discriminant.
    pub const MAX: u8 = Self::LaunchControlMasterRight as u8;

    /// Next working mode, wrapping around.
    #[must_use]
    pub fn cycled(self) -> Self {
        let next = (self as u8 + 1) % (Self::MAX + 1);
        Self::try_from(next).unwrap_or(Self::Clutch)
    }
}

impl Default for ClutchWorkingMode {
    fn default() -> Self {
        Self::Clutch
    }
}

/// User-selected working mode of the ALT buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum AltButtonsWorkingMode {
    /// ALT buttons act as regular buttons.
    Regular = 0,
    /// ALT buttons engage ALT mode.
    Alt,
}

impl AltButtonsWorkingMode {
    /// Highest discriminant.
    pub const MAX: u8 = Self::Alt as u8;

    /// Next working mode, wrapping around.
    #[must_use]
    pub fn cycled(self) -> Self {
        match self {
            Self::Regular => Self::Alt,
            Self::Alt => Self::Regular,
        }
    }
}

impl Default for AltButtonsWorkingMode {
    fn default() -> Self {
        Self::Alt
    }
}

/// User-selected working mode of the directional pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DPadWorkingMode {
    /// DPAD inputs act as regular buttons.
    Regular = 0,
    /// DPAD inputs drive the POV hat switch.
    Navigation,
}

impl DPadWorkingMode {
    /// Highest discriminant.
    pub const MAX: u8 = Self::Navigation as u8;

    /// Next working mode, wrapping around.
    #[must_use]
    pub fn cycled(self) -> Self {
        match self {
            Self::Regular => Self::Navigation,
            Self::Navigation => Self::Regular,
        }
    }
}

impl Default for DPadWorkingMode {
    fn default() -> Self {
        Self::Navigation
    }
}

/// User-selected pulse width multiplier for rotary encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum PulseWidthMultiplier {
    X1 = 1,
    X2,
    X3,
    X4,
    X5,
    X6,
}

impl PulseWidthMultiplier {
    /// Highest valid multiplier.
    pub const MAX: u8 = Self::X6 as u8;
}

impl Default for PulseWidthMultiplier {
    fn default() -> Self {
        Self::X2
    }
}

/// Simple commands accepted through the configuration feature report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SimpleCommand {
    /// Recalibrate the analog axes, if any.
    AxisRecalibrate = 1,
    /// Restart the battery auto-calibration algorithm.
    BatteryRecalibrate = 2,
    /// Reset the buttons map to factory defaults.
    ResetButtonsMap = 3,
    /// Save all user settings to persistent storage immediately.
    SaveNow = 4,
    /// Reverse the left axis, if any.
    ReverseLeftAxis = 5,
    /// Reverse the right axis, if any.
    ReverseRightAxis = 6,
    /// Display all pixels in all pixel groups.
    ShowPixels = 7,
    /// Turn off all pixels in all groups.
    ResetPixels = 8,
}

/// User settings kept in persistent storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum UserSetting {
    /// All settings at once.
    All = 0,
    /// Analog axis calibration data.
    AxisCalibration,
    /// Analog axis polarity.
    AxisPolarity,
    /// Rotary encoder pulse width multiplier.
    PulseWidth,
    /// Security lock state.
    SecurityLock,
    /// Clutch bite point.
    BitePoint,
    /// Clutch working mode.
    ClutchWorkingMode,
    /// ALT buttons working mode.
    AltWorkingMode,
    /// DPAD working mode.
    DpadWorkingMode,
    /// Firmware-to-user input map.
    InputMap,
    /// Custom hardware identifier (VID/PID).
    CustomHardwareId,
    /// Battery auto-calibration parameter.
    BatteryAutoCalibration,
    /// Battery calibration sample histogram.
    BatteryCalibrationData,
}

/// RGB LED groups addressable through pixel control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PixelGroup {
    /// Telemetry LED group.
    Telemetry = 0,
    /// Button lighting group.
    Buttons,
    /// Individually addressed LED group.
    Individual,
}

bitflags! {
    /// Optional features the device advertises to the host.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceCapabilities: u16 {
        /// Digital clutch paddles (switches).
        const CLUTCH_BUTTON = 1 << 0;
        /// Analog clutch paddles (potentiometers).
        const CLUTCH_ANALOG = 1 << 1;
        /// ALT buttons.
        const ALT = 1 << 2;
        /// Directional pad.
        const DPAD = 1 << 3;
        /// Battery-operated.
        const BATTERY = 1 << 4;
        /// Battery calibration data is available.
        const BATTERY_CALIBRATION_AVAILABLE = 1 << 5;
        /// Able to display powertrain telemetry.
        const TELEMETRY_POWERTRAIN = 1 << 6;
        /// Able to display ECU telemetry.
        const TELEMETRY_ECU = 1 << 7;
        /// Able to display race control telemetry.
        const TELEMETRY_RACE_CONTROL = 1 << 8;
        /// Able to display gauge telemetry.
        const TELEMETRY_GAUGES = 1 << 9;
        /// One or more rotary encoders.
        const ROTARY_ENCODERS = 1 << 10;
    }
}

/// Shared, runtime-mutable view of the capability flags.
///
/// Written during configuration and start (battery calibration data
/// only becomes known once storage has answered the load requests);
/// read by the hub pipeline and the capabilities feature report.
#[derive(Debug, Default)]
pub struct CapabilityFlags(AtomicU16);

impl CapabilityFlags {
    /// Set or clear one capability.
    pub fn set(&self, capability: DeviceCapabilities, enabled: bool) {
        if enabled {
            self.0.fetch_or(capability.bits(), Ordering::Relaxed);
        } else {
            self.0.fetch_and(!capability.bits(), Ordering::Relaxed);
        }
    }

    /// Whether a capability is advertised.
    #[must_use]
    pub fn contains(&self, capability: DeviceCapabilities) -> bool {
        self.get().contains(capability)
    }

    /// Snapshot of all flags.
    #[must_use]
    pub fn get(&self) -> DeviceCapabilities {
        DeviceCapabilities::from_bits_truncate(self.0.load(Ordering::Relaxed))
    }
}

impl From<DeviceCapabilities> for CapabilityFlags {
    fn from(capabilities: DeviceCapabilities) -> Self {
        Self(AtomicU16::new(capabilities.bits()))
    }
}

/// State snapshot taken by the input sampler in one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawInputEvent {
    /// Combined state of all firmware inputs.
    pub bitmap: u64,
    /// Bits that changed since the previous cycle.
    pub changes: u64,
    /// Left clutch axis position.
    pub left_axis: u8,
    /// Right clutch axis position.
    pub right_axis: u8,
}

/// Powertrain telemetry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Powertrain {
    /// Display character for the current gear.
    pub gear: u8,
    /// Revolutions per minute.
    pub rpm: u16,
    /// Percentage of maximum RPM.
    pub rpm_percent: u8,
    /// Non-zero at maximum torque.
    pub shift_light1: u8,
    /// Non-zero at maximum power.
    pub shift_light2: u8,
    /// True at maximum RPM.
    pub rev_limiter: bool,
    /// True if the engine is running.
    pub engine_started: bool,
    /// Speed in user-defined units.
    pub speed: u16,
}

impl Default for Powertrain {
    fn default() -> Self {
        Self {
            gear: b' ',
            rpm: 0,
            rpm_percent: 0,
            shift_light1: 0,
            shift_light2: 0,
            rev_limiter: false,
            engine_started: false,
            speed: 0,
        }
    }
}

/// ECU telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Ecu {
    /// ABS is engaged.
    pub abs_engaged: bool,
    /// Traction control is engaged.
    pub tc_engaged: bool,
    /// DRS is engaged.
    pub drs_engaged: bool,
    /// The pit limiter is engaged.
    pub pit_limiter: bool,
    /// True when fuel is low.
    pub low_fuel_alert: bool,
    /// Driver-selected ABS mode.
    pub abs_level: u8,
    /// Driver-selected TC mode.
    pub tc_level: u8,
    /// Driver-selected TC cut mode.
    pub tc_cut: u8,
    /// Percentage of brake bias towards the front wheels.
    pub brake_bias: u8,
}

/// Race control telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[allow(missing_docs)]
pub struct RaceControl {
    pub black_flag: bool,
    pub blue_flag: bool,
    pub checkered_flag: bool,
    pub green_flag: bool,
    pub orange_flag: bool,
    pub white_flag: bool,
    pub yellow_flag: bool,
    /// Remaining laps in the session, zero if not applicable.
    pub remaining_laps: u16,
    /// Remaining session time in minutes, zero if not applicable.
    pub remaining_minutes: u16,
}

/// Gauge telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Gauges {
    /// Percentage of turbo pressure.
    pub relative_turbo_pressure: u8,
    /// Turbo pressure in bars.
    pub absolute_turbo_pressure: f32,
    /// Water temperature in user-defined units.
    pub water_temperature: u16,
    /// Oil pressure in bars.
    pub oil_pressure: f32,
    /// Oil temperature in user-defined units.
    pub oil_temperature: u16,
    /// Percentage of remaining fuel.
    pub relative_remaining_fuel: u8,
    /// Remaining fuel in user-defined units.
    pub absolute_remaining_fuel: u16,
}

/// Live telemetry snapshot received from the host.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryData {
    /// Identifies a telemetry frame. Incremented on every decoded
    /// output report.
    pub frame_id: u32,
    /// Powertrain telemetry.
    pub powertrain: Powertrain,
    /// ECU telemetry.
    pub ecu: Ecu,
    /// Race control telemetry.
    pub race_control: RaceControl,
    /// Gauge telemetry.
    pub gauges: Gauges,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_number_rejects_out_of_range() {
        assert!(InputNumber::new(64).is_err());
        assert!(InputNumber::new(63).is_ok());
        assert_eq!(InputNumber::new(5).unwrap().bitmap(), 0b10_0000);
    }

    #[test]
    fn user_input_number_splits_low_and_high() {
        let low = UserInputNumber::new(3).unwrap();
        assert_eq!(low.low(), 0b1000);
        assert_eq!(low.high(), 0);
        let high = UserInputNumber::new(64).unwrap();
        assert_eq!(high.low(), 0);
        assert_eq!(high.high(), 1);
        assert!(UserInputNumber::new(128).is_err());
    }

    #[test]
    fn bookings_are_tracked_per_bit() {
        let mut bookings = InputBookings::default();
        bookings.book(InputNumber::new(2).unwrap());
        bookings.book(InputNumber::new(63).unwrap());
        assert!(bookings.is_booked(2));
        assert!(bookings.is_booked(63));
        assert!(!bookings.is_booked(3));
        assert!(!bookings.is_booked(64));
        bookings.unbook(InputNumber::new(2).unwrap());
        assert!(!bookings.is_booked(2));
    }

    #[test]
    fn working_modes_cycle_with_wrap_around() {
        assert_eq!(
            ClutchWorkingMode::LaunchControlMasterRight.cycled(),
            ClutchWorkingMode::Clutch
        );
        assert_eq!(ClutchWorkingMode::Clutch.cycled(), ClutchWorkingMode::Axis);
        assert_eq!(
            AltButtonsWorkingMode::Alt.cycled(),
            AltButtonsWorkingMode::Regular
        );
        assert_eq!(DPadWorkingMode::Navigation.cycled(), DPadWorkingMode::Regular);
    }
}
