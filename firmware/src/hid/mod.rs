//! HID report protocol: wire formats, the report descriptor, and the
//! dispatcher that routes feature and output reports.
//!
//! All multi-byte integers are little-endian and all byte offsets are
//! fixed. The descriptor declares one gamepad application with 128
//! buttons, three 8-bit axes, a 4-bit hat switch and a 4-bit feature
//! notification field.

mod dispatcher;

pub use dispatcher::{Dispatcher, HardwareId};

use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::CLUTCH_NONE_VALUE;

/// Input report ID.
pub const RID_INPUT_GAMEPAD: u8 = 0x01;
/// Capabilities feature report ID.
pub const RID_FEATURE_CAPABILITIES: u8 = 0x02;
/// Configuration feature report ID.
pub const RID_FEATURE_CONFIG: u8 = 0x03;
/// Buttons map feature report ID.
pub const RID_FEATURE_BUTTONS_MAP: u8 = 0x04;
/// Custom VID/PID feature report ID.
pub const RID_FEATURE_HARDWARE_ID: u8 = 0x05;
/// Powertrain telemetry output report ID.
pub const RID_OUTPUT_POWERTRAIN: u8 = 0x14;
/// ECU telemetry output report ID.
pub const RID_OUTPUT_ECU: u8 = 0x15;
/// Race control telemetry output report ID.
pub const RID_OUTPUT_RACE_CONTROL: u8 = 0x16;
/// Gauges telemetry output report ID.
pub const RID_OUTPUT_GAUGES: u8 = 0x17;
/// Pixel control output report ID.
pub const RID_OUTPUT_PIXEL: u8 = 0x1E;

/// Input report size in bytes.
pub const GAMEPAD_REPORT_SIZE: usize = 20;
/// Capabilities report size in bytes.
pub const CAPABILITIES_REPORT_SIZE: usize = 20;
/// Configuration report size in bytes.
pub const CONFIG_REPORT_SIZE: usize = 7;
/// Buttons map report size in bytes.
pub const BUTTONS_MAP_REPORT_SIZE: usize = 3;
/// Hardware ID report size in bytes.
pub const HARDWARE_ID_REPORT_SIZE: usize = 6;
/// Powertrain telemetry report size in bytes.
pub const POWERTRAIN_REPORT_SIZE: usize = 10;
/// ECU telemetry report size in bytes.
pub const ECU_REPORT_SIZE: usize = 9;
/// Race control telemetry report size in bytes.
pub const RACE_CONTROL_REPORT_SIZE: usize = 11;
/// Gauges telemetry report size in bytes.
pub const GAUGES_REPORT_SIZE: usize = 12;
/// Pixel control report size in bytes.
pub const PIXEL_REPORT_SIZE: usize = 6;

/// Button count declared in the input report.
pub const BUTTON_COUNT: usize = 128;

/// Low order byte of the protocol magic number.
pub const MAGIC_NUMBER_LOW: u8 = 0x51;
/// High order byte of the protocol magic number.
pub const MAGIC_NUMBER_HIGH: u8 = 0xBF;
/// Major version of the data exchange protocol.
pub const DATA_MAJOR_VERSION: u16 = 1;
/// Minor version of the data exchange protocol.
pub const DATA_MINOR_VERSION: u16 = 6;

/// Default BLE vendor ID.
pub const BLE_VENDOR_ID: u16 = 0x1d50;
/// Default BLE product ID.
pub const BLE_PRODUCT_ID: u16 = 0xffff;
/// Control code that resets the hardware ID to factory defaults.
pub const HARDWARE_ID_RESET_CODE: u16 = 0xAA96;

/// The HID report descriptor.
pub const HID_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // UsagePage(Generic Desktop)
    0x09, 0x05, // UsageId(Gamepad)
    0xA1, 0x01, // Collection(Application)
    //
    // Input report
    0x85, RID_INPUT_GAMEPAD, //   ReportId(1)
    //   128 buttons, one bit each
    0x05, 0x09, //   UsagePage(Button)
    0x19, 0x01, //   UsageIdMin(Button 1)
    0x29, 0x80, //   UsageIdMax(Button 128)
    0x15, 0x00, //   LogicalMinimum(0)
    0x25, 0x01, //   LogicalMaximum(1)
    0x95, 0x80, //   ReportCount(128)
    0x75, 0x01, //   ReportSize(1)
    0x81, 0x02, //   Input(Data, Variable, Absolute)
    //   Combined clutch axis
    0x05, 0x01, //   UsagePage(Generic Desktop)
    0x09, 0x35, //   UsageId(Rz)
    0x26, 0xFE, 0x00, // LogicalMaximum(254)
    0x95, 0x01, //   ReportCount(1)
    0x75, 0x08, //   ReportSize(8)
    0x81, 0x02, //   Input(Data, Variable, Absolute)
    //   Left clutch axis
    0x09, 0x34, //   UsageId(Ry)
    0x81, 0x02, //   Input(Data, Variable, Absolute)
    //   Right clutch axis
    0x09, 0x33, //   UsageId(Rx)
    0x81, 0x02, //   Input(Data, Variable, Absolute)
    //   Hat switch, 4 bits
    0x09, 0x39, //   UsageId(Hat Switch)
    0x46, 0x40, 0x01, // PhysicalMaximum(320)
    0x65, 0x14, //   Unit(degrees)
    0x15, 0x01, //   LogicalMinimum(1)
    0x25, 0x08, //   LogicalMaximum(8)
    0x75, 0x04, //   ReportSize(4)
    0x81, 0x02, //   Input(Data, Variable, Absolute)
    //   Feature notification, 4 bits
    0x09, 0x47, //   UsageId(Feature Notification)
    0x45, 0x00, //   PhysicalMaximum(0)
    0x65, 0x00, //   Unit(None)
    0x81, 0x02, //   Input(Data, Variable, Absolute)
    //
    // Capabilities feature report (read only)
    0x09, 0x00, // Usage(undefined)
    0x15, 0x00, // LogicalMinimum(0)
    0x25, 0xff, // LogicalMaximum(255)
    0x85, RID_FEATURE_CAPABILITIES, // ReportId(2)
    0x75, 0x08, // ReportSize(8)
    0x95, CAPABILITIES_REPORT_SIZE as u8, // ReportCount(20)
    0xb1, 0x23, // Feature(Constant, Variable, Absolute, NonVolatile)
    //
    // Configuration feature report
    0x09, 0x00, // Usage(undefined)
    0x85, RID_FEATURE_CONFIG, // ReportId(3)
    0x75, 0x08, // ReportSize(8)
    0x95, CONFIG_REPORT_SIZE as u8, // ReportCount(7)
    0xb1, 0xa2, // Feature(Data, Variable, Absolute, Volatile)
    //
    // Buttons map feature report
    0x09, 0x00, // Usage(undefined)
    0x85, RID_FEATURE_BUTTONS_MAP, // ReportId(4)
    0x75, 0x08, // ReportSize(8)
    0x95, BUTTONS_MAP_REPORT_SIZE as u8, // ReportCount(3)
    0xb1, 0xa2, // Feature(Data, Variable, Absolute, Volatile)
    //
    // Hardware ID feature report
    0x09, 0x00, // Usage(undefined)
    0x85, RID_FEATURE_HARDWARE_ID, // ReportId(5)
    0x75, 0x08, // ReportSize(8)
    0x95, HARDWARE_ID_REPORT_SIZE as u8, // ReportCount(6)
    0xb1, 0xa2, // Feature(Data, Variable, Absolute, Volatile)
    //
    // Powertrain telemetry output report
    0x09, 0x00, // Usage(undefined)
    0x85, RID_OUTPUT_POWERTRAIN, // ReportId(20)
    0x75, 0x08, // ReportSize(8)
    0x95, POWERTRAIN_REPORT_SIZE as u8, // ReportCount(10)
    0x91, 0x22, // Output(Data, Variable, Absolute)
    //
    // ECU telemetry output report
    0x09, 0x00, // Usage(undefined)
    0x85, RID_OUTPUT_ECU, // ReportId(21)
    0x75, 0x08, // ReportSize(8)
    0x95, ECU_REPORT_SIZE as u8, // ReportCount(9)
    0x91, 0x22, // Output(Data, Variable, Absolute)
    //
    // Race control telemetry output report
    0x09, 0x00, // Usage(undefined)
    0x85, RID_OUTPUT_RACE_CONTROL, // ReportId(22)
    0x75, 0x08, // ReportSize(8)
    0x95, RACE_CONTROL_REPORT_SIZE as u8, // ReportCount(11)
    0x91, 0x22, // Output(Data, Variable, Absolute)
    //
    // Gauges telemetry output report
    0x09, 0x00, // Usage(undefined)
    0x85, RID_OUTPUT_GAUGES, // ReportId(23)
    0x75, 0x08, // ReportSize(8)
    0x95, GAUGES_REPORT_SIZE as u8, // ReportCount(12)
    0x91, 0x22, // Output(Data, Variable, Absolute)
    //
    // Pixel control output report
    0x09, 0x00, // Usage(undefined)
    0x85, RID_OUTPUT_PIXEL, // ReportId(30)
    0x75, 0x08, // ReportSize(8)
    0x95, PIXEL_REPORT_SIZE as u8, // ReportCount(6)
    0x91, 0x22, // Output(Data, Variable, Absolute)
    //
    0xC0, // EndCollection
];

/// Pending "host should re-read the configuration" notification,
/// raised once per change and consumed by the next input report.
#[derive(Debug, Default)]
pub struct ConfigNotifier(AtomicBool);

impl ConfigNotifier {
    /// Flag a configuration change for the next input report.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Consume the pending notification, if any.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}

/// One HID input report before packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputReport {
    /// HID buttons 1..=64.
    pub low: u64,
    /// HID buttons 65..=128.
    pub high: u64,
    /// POV value, 0 centered or 1..=8 clockwise from up.
    pub pov: u8,
    /// Left clutch axis.
    pub left_axis: u8,
    /// Right clutch axis.
    pub right_axis: u8,
    /// Combined clutch axis.
    pub clutch_axis: u8,
}

impl InputReport {
    /// The all-idle report sent when the HID state is reset.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            low: 0,
            high: 0,
            pov: 0,
            left_axis: CLUTCH_NONE_VALUE,
            right_axis: CLUTCH_NONE_VALUE,
            clutch_axis: CLUTCH_NONE_VALUE,
        }
    }

    /// Pack into the 20-byte wire format. When `notify_config_change`
    /// is set, the high nibble of the POV byte carries the report ID
    /// the host should re-read.
    #[must_use]
    pub fn pack(&self, notify_config_change: bool) -> [u8; GAMEPAD_REPORT_SIZE] {
        let mut buffer = [0u8; GAMEPAD_REPORT_SIZE];
        buffer[0..8].copy_from_slice(&self.low.to_le_bytes());
        buffer[8..16].copy_from_slice(&self.high.to_le_bytes());
        buffer[16] = self.clutch_axis;
        buffer[17] = self.left_axis;
        buffer[18] = self.right_axis;
        buffer[19] = self.pov & 0x0f;
        if notify_config_change {
            buffer[19] |= RID_FEATURE_CONFIG << 4;
        }
        buffer
    }
}
