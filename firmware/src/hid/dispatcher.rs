//! Feature and output report routing.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::battery::BatteryCalibration;
use crate::events::EventBus;
use crate::inputmap::InputMap;
use crate::inputs::InputService;
use crate::pixels::PixelControl;
use crate::settings::Settings;
use crate::types::{
    AltButtonsWorkingMode, CapabilityFlags, ClutchWorkingMode, DPadWorkingMode,
    DeviceCapabilities, InputBookings, InputNumber, PixelGroup, PulseWidthMultiplier,
    SimpleCommand, TelemetryData, UserSetting, CLUTCH_FULL_VALUE, UNKNOWN_BATTERY_LEVEL,
};

use super::{
    BUTTONS_MAP_REPORT_SIZE, CAPABILITIES_REPORT_SIZE, CONFIG_REPORT_SIZE, DATA_MAJOR_VERSION,
    DATA_MINOR_VERSION, ECU_REPORT_SIZE, GAUGES_REPORT_SIZE, HARDWARE_ID_REPORT_SIZE,
    HARDWARE_ID_RESET_CODE, MAGIC_NUMBER_HIGH, MAGIC_NUMBER_LOW, PIXEL_REPORT_SIZE,
    POWERTRAIN_REPORT_SIZE, RACE_CONTROL_REPORT_SIZE, RID_FEATURE_BUTTONS_MAP,
    RID_FEATURE_CAPABILITIES, RID_FEATURE_CONFIG, RID_FEATURE_HARDWARE_ID, RID_OUTPUT_ECU,
    RID_OUTPUT_GAUGES, RID_OUTPUT_PIXEL, RID_OUTPUT_POWERTRAIN, RID_OUTPUT_RACE_CONTROL,
};

const UNSPECIFIED_INPUT: u8 = 0xFF;

fn read_u16(buffer: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buffer[offset], buffer[offset + 1]])
}

/// The device's hardware identifier: factory VID/PID plus an optional
/// stored custom pair.
pub struct HardwareId {
    bus: Arc<EventBus>,
    factory: Mutex<(u16, u16)>,
    custom: Mutex<(u16, u16)>,
    supported: AtomicBool,
}

impl HardwareId {
    /// Create with factory defaults and no custom identifier.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            factory: Mutex::new((super::BLE_VENDOR_ID, super::BLE_PRODUCT_ID)),
            custom: Mutex::new((0, 0)),
            supported: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_factory(&self, vid: u16, pid: u16) {
        let vid = if vid == 0 { super::BLE_VENDOR_ID } else { vid };
        let pid = if pid == 0 { super::BLE_PRODUCT_ID } else { pid };
        *self.factory.lock().expect("hardware id poisoned") = (vid, pid);
    }

    pub(crate) fn set_supported(&self, supported: bool) {
        self.supported.store(supported, Ordering::Relaxed);
    }

    /// Whether the transport can present a custom identifier.
    #[must_use]
    pub fn supports_custom(&self) -> bool {
        self.supported.load(Ordering::Relaxed)
    }

    /// The factory `(vid, pid)` pair.
    #[must_use]
    pub fn factory(&self) -> (u16, u16) {
        *self.factory.lock().expect("hardware id poisoned")
    }

    /// The stored custom `(vid, pid)` pair; `(0, 0)` when unset.
    #[must_use]
    pub fn custom(&self) -> (u16, u16) {
        *self.custom.lock().expect("hardware id poisoned")
    }

    /// Store a custom `(vid, pid)` pair.
    pub fn set_custom(&self, vid: u16, pid: u16, save: bool) {
        *self.custom.lock().expect("hardware id poisoned") = (vid, pid);
        if save {
            self.bus.save_setting.notify(UserSetting::CustomHardwareId);
        }
    }

    /// Forget the custom identifier and fall back to factory defaults.
    pub fn set_factory_default(&self) {
        self.set_custom(0, 0, true);
    }

    /// The `(vid, pid)` pair in effect: the custom pair when stored,
    /// the factory pair otherwise.
    #[must_use]
    pub fn effective(&self) -> (u16, u16) {
        let custom = self.custom();
        if custom == (0, 0) {
            self.factory()
        } else {
            custom
        }
    }
}

/// Routes incoming and outgoing reports to the right subsystem.
pub struct Dispatcher {
    settings: Arc<Settings>,
    map: Arc<Mutex<InputMap>>,
    input: Arc<InputService>,
    hardware_id: Arc<HardwareId>,
    battery_calibration: Arc<BatteryCalibration>,
    pixels: Arc<dyn PixelControl>,
    telemetry: Arc<Mutex<TelemetryData>>,
    bus: Arc<EventBus>,
    capabilities: Arc<CapabilityFlags>,
    bookings: InputBookings,
    serial: u64,
    max_fps: u8,
    last_battery_level: Arc<AtomicU8>,
    selected_input: AtomicU8,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        settings: Arc<Settings>,
        map: Arc<Mutex<InputMap>>,
        input: Arc<InputService>,
        hardware_id: Arc<HardwareId>,
        battery_calibration: Arc<BatteryCalibration>,
        pixels: Arc<dyn PixelControl>,
        telemetry: Arc<Mutex<TelemetryData>>,
        bus: Arc<EventBus>,
        capabilities: Arc<CapabilityFlags>,
        bookings: InputBookings,
        serial: u64,
        max_fps: u8,
        last_battery_level: Arc<AtomicU8>,
    ) -> Self {
        Self {
            settings,
            map,
            input,
            hardware_id,
            battery_calibration,
            pixels,
            telemetry,
            bus,
            capabilities,
            bookings,
            serial,
            max_fps,
            last_battery_level,
            selected_input: AtomicU8::new(UNSPECIFIED_INPUT),
        }
    }

    /// Live telemetry snapshot shared with the UI frame servers.
    #[must_use]
    pub fn telemetry(&self) -> Arc<Mutex<TelemetryData>> {
        Arc::clone(&self.telemetry)
    }

    /// Fill `buffer` with a feature report. Returns the number of
    /// bytes written, zero for an unknown ID or a short buffer.
    pub fn get_feature(&self, report_id: u8, buffer: &mut [u8]) -> usize {
        match report_id {
            RID_FEATURE_CAPABILITIES if buffer.len() >= CAPABILITIES_REPORT_SIZE => {
                buffer[0] = MAGIC_NUMBER_LOW;
                buffer[1] = MAGIC_NUMBER_HIGH;
                buffer[2..4].copy_from_slice(&DATA_MAJOR_VERSION.to_le_bytes());
                buffer[4..6].copy_from_slice(&DATA_MINOR_VERSION.to_le_bytes());
                buffer[6..8].copy_from_slice(&self.capabilities.get().bits().to_le_bytes());
                buffer[8..16].copy_from_slice(&self.serial.to_le_bytes());
                buffer[16] = self.max_fps;
                buffer[17] = self.pixels.count(PixelGroup::Telemetry);
                buffer[18] = self.pixels.count(PixelGroup::Buttons);
                buffer[19] = self.pixels.count(PixelGroup::Individual);
                CAPABILITIES_REPORT_SIZE
            }
            RID_FEATURE_CONFIG if buffer.len() >= CONFIG_REPORT_SIZE => {
                buffer[0] = self.settings.clutch_working_mode() as u8;
                buffer[1] = self.settings.alt_buttons_working_mode() as u8;
                buffer[2] = self.settings.bite_point();
                buffer[3] = self.last_battery_level.load(Ordering::Relaxed);
                buffer[4] = self.settings.dpad_working_mode() as u8;
                buffer[5] = if self.settings.security_lock() { 0xFF } else { 0x00 };
                buffer[6] = self.input.pulse_width_multiplier() as u8;
                CONFIG_REPORT_SIZE
            }
            RID_FEATURE_BUTTONS_MAP if buffer.len() >= BUTTONS_MAP_REPORT_SIZE => {
                let selected = self.selected_input.load(Ordering::Relaxed);
                buffer[0] = selected;
                let entry = if self.bookings.is_booked(selected) {
                    self.map
                        .lock()
                        .expect("input map lock poisoned")
                        .get(selected)
                } else {
                    None
                };
                let (no_alt, alt) =
                    entry.unwrap_or((UNSPECIFIED_INPUT, UNSPECIFIED_INPUT));
                buffer[1] = no_alt;
                buffer[2] = alt;
                BUTTONS_MAP_REPORT_SIZE
            }
            RID_FEATURE_HARDWARE_ID if buffer.len() >= HARDWARE_ID_REPORT_SIZE => {
                buffer[..HARDWARE_ID_REPORT_SIZE].fill(0);
                if self.hardware_id.supports_custom() {
                    let (vid, pid) = self.hardware_id.effective();
                    buffer[0..2].copy_from_slice(&vid.to_le_bytes());
                    buffer[2..4].copy_from_slice(&pid.to_le_bytes());
                }
                // On USB the VID/PID bytes read back as zeros.
                HARDWARE_ID_REPORT_SIZE
            }
            _ => 0,
        }
    }

    /// Apply a feature report write.
    pub fn set_feature(&self, report_id: u8, buffer: &[u8]) {
        // The lock silently rejects every write; it is only released
        // through its button combination.
        if self.settings.security_lock() || report_id == RID_FEATURE_CAPABILITIES {
            return;
        }
        match report_id {
            RID_FEATURE_CONFIG => self.set_config(buffer),
            RID_FEATURE_BUTTONS_MAP if buffer.len() >= BUTTONS_MAP_REPORT_SIZE => {
                if buffer[0] <= InputNumber::MAX {
                    self.selected_input.store(buffer[0], Ordering::Relaxed);
                    if buffer[1] <= InputNumber::MAX && buffer[2] <= InputNumber::MAX {
                        self.map
                            .lock()
                            .expect("input map lock poisoned")
                            .set(buffer[0], buffer[1], buffer[2]);
                    }
                }
            }
            RID_FEATURE_HARDWARE_ID if buffer.len() >= HARDWARE_ID_REPORT_SIZE => {
                if self.hardware_id.supports_custom() {
                    let vid = read_u16(buffer, 0);
                    let pid = read_u16(buffer, 2);
                    let control_code = read_u16(buffer, 4);
                    let expected = if vid == 0 || pid == 0 {
                        HARDWARE_ID_RESET_CODE
                    } else {
                        vid.wrapping_mul(pid)
                    };
                    if control_code == expected {
                        self.hardware_id.set_custom(vid, pid, true);
                    }
                }
                // Ignored on USB
            }
            _ => debug!("feature write to unknown report id {report_id}"),
        }
    }

    fn set_config(&self, buffer: &[u8]) {
        if let Some(mode) = buffer
            .first()
            .and_then(|b| ClutchWorkingMode::try_from(*b).ok())
        {
            self.settings.set_clutch_working_mode(mode, true);
        }
        if let Some(byte) = buffer.get(1) {
            if *byte != 0xFF {
                let mode = if *byte == 0 {
                    AltButtonsWorkingMode::Regular
                } else {
                    AltButtonsWorkingMode::Alt
                };
                self.settings.set_alt_buttons_working_mode(mode, true);
            }
        }
        if let Some(byte) = buffer.get(2) {
            if *byte <= CLUTCH_FULL_VALUE {
                self.settings.set_bite_point(*byte, true);
            }
        }
        if let Some(command) = buffer
            .get(3)
            .and_then(|b| SimpleCommand::try_from(*b).ok())
        {
            self.run_simple_command(command);
        }
        if let Some(byte) = buffer.get(4) {
            if *byte != 0xFF {
                let mode = if *byte == 0 {
                    DPadWorkingMode::Regular
                } else {
                    DPadWorkingMode::Navigation
                };
                self.settings.set_dpad_working_mode(mode, true);
            }
        }
        // Byte 5 (security lock) is read-only.
        if let Some(multiplier) = buffer
            .get(6)
            .and_then(|b| PulseWidthMultiplier::try_from(*b).ok())
        {
            self.input.set_pulse_width_multiplier(multiplier, true);
        }
    }

    fn run_simple_command(&self, command: SimpleCommand) {
        match command {
            SimpleCommand::AxisRecalibrate => self.input.recalibrate_axes(),
            SimpleCommand::BatteryRecalibrate => {
                self.battery_calibration.restart_auto_calibration();
            }
            SimpleCommand::ResetButtonsMap => {
                self.map.lock().expect("input map lock poisoned").reset();
            }
            SimpleCommand::SaveNow => self.bus.save_setting.notify(UserSetting::All),
            SimpleCommand::ReverseLeftAxis => self.input.reverse_left_axis(),
            SimpleCommand::ReverseRightAxis => self.input.reverse_right_axis(),
            SimpleCommand::ShowPixels => self.pixels.show(),
            SimpleCommand::ResetPixels => self.pixels.reset(),
        }
    }

    /// Decode an output report from the host.
    pub fn output(&self, report_id: u8, buffer: &[u8]) {
        match report_id {
            RID_OUTPUT_POWERTRAIN if buffer.len() >= POWERTRAIN_REPORT_SIZE => {
                let mut telemetry = self.telemetry.lock().expect("telemetry lock poisoned");
                telemetry.powertrain.gear = buffer[0];
                telemetry.powertrain.rpm = read_u16(buffer, 1);
                telemetry.powertrain.rpm_percent = buffer[3].min(100);
                telemetry.powertrain.shift_light1 = buffer[4];
                telemetry.powertrain.shift_light2 = buffer[5];
                telemetry.powertrain.rev_limiter = buffer[6] != 0;
                telemetry.powertrain.engine_started = buffer[7] != 0;
                telemetry.powertrain.speed = read_u16(buffer, 8);
                telemetry.frame_id = telemetry.frame_id.wrapping_add(1);
            }
            RID_OUTPUT_ECU if buffer.len() >= ECU_REPORT_SIZE => {
                let mut telemetry = self.telemetry.lock().expect("telemetry lock poisoned");
                telemetry.ecu.abs_engaged = buffer[0] != 0;
                telemetry.ecu.tc_engaged = buffer[1] != 0;
                telemetry.ecu.drs_engaged = buffer[2] != 0;
                telemetry.ecu.pit_limiter = buffer[3] != 0;
                telemetry.ecu.low_fuel_alert = buffer[4] != 0;
                telemetry.ecu.abs_level = buffer[5];
                telemetry.ecu.tc_level = buffer[6];
                telemetry.ecu.tc_cut = buffer[7];
                telemetry.ecu.brake_bias = buffer[8].min(100);
                telemetry.frame_id = telemetry.frame_id.wrapping_add(1);
            }
            RID_OUTPUT_RACE_CONTROL if buffer.len() >= RACE_CONTROL_REPORT_SIZE => {
                let mut telemetry = self.telemetry.lock().expect("telemetry lock poisoned");
                telemetry.race_control.black_flag = buffer[0] != 0;
                telemetry.race_control.blue_flag = buffer[1] != 0;
                telemetry.race_control.checkered_flag = buffer[2] != 0;
                telemetry.race_control.green_flag = buffer[3] != 0;
                telemetry.race_control.orange_flag = buffer[4] != 0;
                telemetry.race_control.white_flag = buffer[5] != 0;
                telemetry.race_control.yellow_flag = buffer[6] != 0;
                telemetry.race_control.remaining_laps = read_u16(buffer, 7);
                telemetry.race_control.remaining_minutes = read_u16(buffer, 9);
                telemetry.frame_id = telemetry.frame_id.wrapping_add(1);
            }
            RID_OUTPUT_GAUGES if buffer.len() >= GAUGES_REPORT_SIZE => {
                let mut telemetry = self.telemetry.lock().expect("telemetry lock poisoned");
                telemetry.gauges.relative_turbo_pressure = buffer[0].min(100);
                telemetry.gauges.absolute_turbo_pressure =
                    f32::from(read_u16(buffer, 1)) / 100.0;
                telemetry.gauges.water_temperature = read_u16(buffer, 3);
                telemetry.gauges.oil_pressure = f32::from(read_u16(buffer, 5)) / 100.0;
                telemetry.gauges.oil_temperature = read_u16(buffer, 7);
                telemetry.gauges.relative_remaining_fuel = buffer[9].min(100);
                telemetry.gauges.absolute_remaining_fuel = read_u16(buffer, 10);
                telemetry.frame_id = telemetry.frame_id.wrapping_add(1);
            }
            // Pixel writes intentionally bypass the security lock.
            RID_OUTPUT_PIXEL if buffer.len() >= PIXEL_REPORT_SIZE => {
                match buffer[0] {
                    0xFF => self.pixels.show(),
                    0xFE => self.pixels.reset(),
                    group => {
                        if let Ok(group) = PixelGroup::try_from(group) {
                            // Wire order is blue, green, red.
                            self.pixels
                                .set(group, buffer[1], buffer[4], buffer[3], buffer[2]);
                        }
                    }
                }
            }
            _ => debug!("output report with unknown id {report_id} ignored"),
        }
    }
}
