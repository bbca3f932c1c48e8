//! HID transport collaborator interface.
//!
//! The firmware core talks to the host through this trait; BLE and USB
//! stacks implement it outside the core.

use crate::hid::InputReport;

/// Identity and behavior of the HID device as seen by the host.
#[derive(Debug, Clone)]
pub struct HidConfig {
    /// Device name shown to the host.
    pub device_name: String,
    /// Manufacturer name shown to the host.
    pub manufacturer: String,
    /// Power the device off after a period with no host connection.
    pub auto_power_off: bool,
    /// Factory default vendor ID.
    pub factory_vid: u16,
    /// Factory default product ID.
    pub factory_pid: u16,
}

impl Default for HidConfig {
    fn default() -> Self {
        Self {
            device_name: "Sim wheel".to_string(),
            manufacturer: "Open source".to_string(),
            auto_power_off: true,
            factory_vid: crate::hid::BLE_VENDOR_ID,
            factory_pid: crate::hid::BLE_PRODUCT_ID,
        }
    }
}

/// Transport glue between the core and a BLE or USB HID stack.
pub trait HidTransport: Send + Sync {
    /// Start HID advertising/enumeration under the given identity.
    ///
    /// # Errors
    ///
    /// Propagates stack initialization failures; these are fatal.
    fn begin(&self, config: &HidConfig, vid: u16, pid: u16) -> anyhow::Result<()>;

    /// Send an all-idle input report.
    fn reset(&self);

    /// Send one input report. `notify_config_change` raises the
    /// feature-notification nibble for this report only.
    fn report_input(&self, report: &InputReport, notify_config_change: bool);

    /// Report the battery state of charge to the host.
    fn report_battery_level(&self, level: u8);

    /// Whether a host is connected right now.
    fn is_connected(&self) -> bool;

    /// Whether this transport can present a custom VID/PID. True for
    /// BLE, false for USB.
    fn supports_custom_hardware_id(&self) -> bool;
}
