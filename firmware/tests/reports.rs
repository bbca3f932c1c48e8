//! Wire-level checks of the feature and output reports against a
//! configured device.

use std::sync::Arc;

use simwheel_firmware::hal::Hal;
use simwheel_firmware::hid::{
    CAPABILITIES_REPORT_SIZE, HARDWARE_ID_REPORT_SIZE, RID_FEATURE_BUTTONS_MAP,
    RID_FEATURE_CAPABILITIES, RID_FEATURE_CONFIG, RID_FEATURE_HARDWARE_ID, RID_OUTPUT_ECU,
    RID_OUTPUT_PIXEL, RID_OUTPUT_RACE_CONTROL,
};
use simwheel_firmware::pixels::PixelControl;
use simwheel_firmware::testing::{FakeHal, FakeInputHandle, FakePixels, FakeTransport};
use simwheel_firmware::transport::HidTransport;
use simwheel_firmware::types::{
    DeviceCapabilities, InputNumber, PixelGroup, SimpleCommand, TelemetryData,
};
use simwheel_firmware::ui::UserInterface;
use simwheel_firmware::{Device, SimWheel};

struct TelemetryDisplay;

impl UserInterface for TelemetryDisplay {
    fn max_fps(&self) -> u8 {
        50
    }

    fn requires_powertrain_telemetry(&self) -> bool {
        true
    }

    fn on_telemetry(&mut self, _data: Option<&TelemetryData>) {}
}

fn input(n: u8) -> InputNumber {
    InputNumber::new(n).unwrap()
}

fn wheel_with_pixels() -> (Device, Arc<FakeTransport>, Arc<FakePixels>) {
    let hal: Arc<dyn Hal> = Arc::new(FakeHal::new());
    let handle = FakeInputHandle::new();
    let pixels = Arc::new(FakePixels::new(8, 16, 4));
    let mut wheel = SimWheel::new(hal);
    wheel.add_fake_input(&handle).book_all_inputs();
    wheel.set_clutch_paddle_inputs(input(60), input(61)).unwrap();
    wheel
        .configure_hid("Proto wheel", "Mamandurrio", true, 0, 0)
        .set_device_serial(0x00DE_ADBE_EF00_1234)
        .set_pixel_control(Arc::clone(&pixels) as Arc<dyn PixelControl>)
        .add_ui(Box::new(TelemetryDisplay));
    let mut device = wheel.get_ready().unwrap();
    let fake = Arc::new(FakeTransport::new());
    let transport: Arc<dyn HidTransport> = Arc::clone(&fake) as Arc<dyn HidTransport>;
    device.start(&transport).unwrap();
    (device, fake, pixels)
}

fn read_u16(buffer: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buffer[offset], buffer[offset + 1]])
}

#[test]
fn capabilities_report_layout() {
    let (device, fake, _pixels) = wheel_with_pixels();
    let mut buffer = [0u8; CAPABILITIES_REPORT_SIZE];
    let size = device
        .dispatcher()
        .get_feature(RID_FEATURE_CAPABILITIES, &mut buffer);
    assert_eq!(size, CAPABILITIES_REPORT_SIZE);

    // Magic number and protocol version 1.6.
    assert_eq!(buffer[0], 0x51);
    assert_eq!(buffer[1], 0xBF);
    assert_eq!(read_u16(&buffer, 2), 1);
    assert_eq!(read_u16(&buffer, 4), 6);

    let flags = DeviceCapabilities::from_bits_truncate(read_u16(&buffer, 6));
    assert!(flags.contains(DeviceCapabilities::CLUTCH_ANALOG));
    assert!(flags.contains(DeviceCapabilities::TELEMETRY_POWERTRAIN));
    assert!(!flags.contains(DeviceCapabilities::TELEMETRY_ECU));

    assert_eq!(&buffer[8..16], &0x00DE_ADBE_EF00_1234u64.to_le_bytes());
    assert_eq!(buffer[16], 50);
    assert_eq!(&buffer[17..20], &[8, 16, 4]);

    // The transport was started with the factory BLE identity.
    let (config, vid, pid) = fake.begin_args().unwrap();
    assert_eq!(config.device_name, "Proto wheel");
    assert_eq!((vid, pid), (0x1d50, 0xffff));
}

#[test]
fn simple_commands_reach_their_subsystems() {
    let (device, _fake, pixels) = wheel_with_pixels();
    let dispatcher = device.dispatcher();

    assert_eq!(device.services().input.axis_polarity(), (false, false));
    dispatcher.set_feature(
        RID_FEATURE_CONFIG,
        &[0xFF, 0xFF, 0xFF, SimpleCommand::ReverseLeftAxis as u8, 0xFF, 0, 0xFF],
    );
    assert_eq!(device.services().input.axis_polarity(), (true, false));
    dispatcher.set_feature(
        RID_FEATURE_CONFIG,
        &[0xFF, 0xFF, 0xFF, SimpleCommand::ReverseRightAxis as u8, 0xFF, 0, 0xFF],
    );
    assert_eq!(device.services().input.axis_polarity(), (true, true));

    dispatcher.set_feature(
        RID_FEATURE_CONFIG,
        &[0xFF, 0xFF, 0xFF, SimpleCommand::ShowPixels as u8, 0xFF, 0, 0xFF],
    );
    assert_eq!(pixels.show_count(), 1);
    dispatcher.set_feature(
        RID_FEATURE_CONFIG,
        &[0xFF, 0xFF, 0xFF, SimpleCommand::ResetPixels as u8, 0xFF, 0, 0xFF],
    );
    assert_eq!(pixels.reset_count(), 1);

    // Resetting the buttons map restores factory defaults.
    dispatcher.set_feature(RID_FEATURE_BUTTONS_MAP, &[3, 9, 9]);
    dispatcher.set_feature(
        RID_FEATURE_CONFIG,
        &[0xFF, 0xFF, 0xFF, SimpleCommand::ResetButtonsMap as u8, 0xFF, 0, 0xFF],
    );
    let mut buffer = [0u8; 3];
    dispatcher.get_feature(RID_FEATURE_BUTTONS_MAP, &mut buffer);
    assert_eq!(buffer, [3, 3, 67]);
}

#[test]
fn buttons_map_round_trip() {
    let (device, _fake, _pixels) = wheel_with_pixels();
    let dispatcher = device.dispatcher();

    dispatcher.set_feature(RID_FEATURE_BUTTONS_MAP, &[10, 100, 101]);
    let mut buffer = [0u8; 3];
    dispatcher.get_feature(RID_FEATURE_BUTTONS_MAP, &mut buffer);
    // User input numbers above 63 are rejected by the wire protocol:
    // only the selection took place.
    assert_eq!(buffer, [10, 10, 74]);

    dispatcher.set_feature(RID_FEATURE_BUTTONS_MAP, &[10, 30, 40]);
    dispatcher.get_feature(RID_FEATURE_BUTTONS_MAP, &mut buffer);
    assert_eq!(buffer, [10, 30, 40]);
}

#[test]
fn hardware_id_read_write_and_reset() {
    let (device, _fake, _pixels) = wheel_with_pixels();
    let dispatcher = device.dispatcher();
    let mut buffer = [0u8; HARDWARE_ID_REPORT_SIZE];

    // Factory identity before any write.
    dispatcher.get_feature(RID_FEATURE_HARDWARE_ID, &mut buffer);
    assert_eq!(read_u16(&buffer, 0), 0x1d50);
    assert_eq!(read_u16(&buffer, 2), 0xffff);

    // A wrong control code leaves the stored identity unchanged.
    let mut report = [0u8; HARDWARE_ID_REPORT_SIZE];
    report[0..2].copy_from_slice(&12u16.to_le_bytes());
    report[2..4].copy_from_slice(&12u16.to_le_bytes());
    dispatcher.set_feature(RID_FEATURE_HARDWARE_ID, &report);
    assert_eq!(device.services().hardware_id.custom(), (0, 0));

    // The correct control code stores the custom identity.
    let vid = 0xEFEFu16;
    let pid = 0xFEFEu16;
    report[0..2].copy_from_slice(&vid.to_le_bytes());
    report[2..4].copy_from_slice(&pid.to_le_bytes());
    report[4..6].copy_from_slice(&vid.wrapping_mul(pid).to_le_bytes());
    dispatcher.set_feature(RID_FEATURE_HARDWARE_ID, &report);
    assert_eq!(device.services().hardware_id.custom(), (vid, pid));
    dispatcher.get_feature(RID_FEATURE_HARDWARE_ID, &mut buffer);
    assert_eq!(read_u16(&buffer, 0), vid);
    assert_eq!(read_u16(&buffer, 2), pid);

    // Zeros with the reset code restore the factory identity.
    report.fill(0);
    report[4..6].copy_from_slice(&0xAA96u16.to_le_bytes());
    dispatcher.set_feature(RID_FEATURE_HARDWARE_ID, &report);
    dispatcher.get_feature(RID_FEATURE_HARDWARE_ID, &mut buffer);
    assert_eq!(read_u16(&buffer, 0), 0x1d50);
}

#[test]
fn hardware_id_is_inert_on_usb() {
    let hal: Arc<dyn Hal> = Arc::new(FakeHal::new());
    let handle = FakeInputHandle::new();
    let mut wheel = SimWheel::new(hal);
    wheel.add_fake_input(&handle).book_all_inputs();
    wheel.set_clutch_paddle_inputs(input(60), input(61)).unwrap();
    let mut device = wheel.get_ready().unwrap();
    let fake = Arc::new(FakeTransport::usb());
    let transport: Arc<dyn HidTransport> = Arc::clone(&fake) as Arc<dyn HidTransport>;
    device.start(&transport).unwrap();

    let vid = 0xEFEFu16;
    let pid = 0xFEFEu16;
    let mut report = [0u8; HARDWARE_ID_REPORT_SIZE];
    report[0..2].copy_from_slice(&vid.to_le_bytes());
    report[2..4].copy_from_slice(&pid.to_le_bytes());
    report[4..6].copy_from_slice(&vid.wrapping_mul(pid).to_le_bytes());
    device.dispatcher().set_feature(RID_FEATURE_HARDWARE_ID, &report);
    assert_eq!(device.services().hardware_id.custom(), (0, 0));

    let mut buffer = [0xAAu8; HARDWARE_ID_REPORT_SIZE];
    device
        .dispatcher()
        .get_feature(RID_FEATURE_HARDWARE_ID, &mut buffer);
    assert_eq!(buffer, [0u8; HARDWARE_ID_REPORT_SIZE]);
}

#[test]
fn telemetry_output_reports_update_the_snapshot() {
    let (device, _fake, _pixels) = wheel_with_pixels();
    let dispatcher = device.dispatcher();

    let mut ecu = [0u8; 9];
    ecu[0] = 1; // ABS engaged
    ecu[5] = 7; // ABS level
    ecu[8] = 130; // brake bias, clamped to 100
    dispatcher.output(RID_OUTPUT_ECU, &ecu);

    let mut race = [0u8; 11];
    race[6] = 1; // yellow flag
    race[7..9].copy_from_slice(&12u16.to_le_bytes());
    race[9..11].copy_from_slice(&45u16.to_le_bytes());
    dispatcher.output(RID_OUTPUT_RACE_CONTROL, &race);

    let telemetry = device.services().telemetry.lock().unwrap();
    assert_eq!(telemetry.frame_id, 2);
    assert!(telemetry.ecu.abs_engaged);
    assert_eq!(telemetry.ecu.abs_level, 7);
    assert_eq!(telemetry.ecu.brake_bias, 100);
    assert!(telemetry.race_control.yellow_flag);
    assert_eq!(telemetry.race_control.remaining_laps, 12);
    assert_eq!(telemetry.race_control.remaining_minutes, 45);
}

#[test]
fn pixel_reports_bypass_the_security_lock() {
    let (device, _fake, pixels) = wheel_with_pixels();
    let dispatcher = device.dispatcher();
    device.services().settings.set_security_lock(true, false);

    // Wire layout: [group][index][blue][green][red][reserved]
    let report = [PixelGroup::Buttons as u8, 3, 0x10, 0x20, 0x30, 0];
    dispatcher.output(RID_OUTPUT_PIXEL, &report);
    assert_eq!(pixels.sets(), vec![(PixelGroup::Buttons, 3, 0x30, 0x20, 0x10)]);

    dispatcher.output(RID_OUTPUT_PIXEL, &[0xFF, 0, 0, 0, 0, 0]);
    assert_eq!(pixels.show_count(), 1);
    dispatcher.output(RID_OUTPUT_PIXEL, &[0xFE, 0, 0, 0, 0, 0]);
    assert_eq!(pixels.reset_count(), 1);

    // An invalid group is dropped.
    dispatcher.output(RID_OUTPUT_PIXEL, &[3, 0, 0, 0, 0, 0]);
    assert_eq!(pixels.sets().len(), 1);

    // Telemetry output reports pass through the lock as well, while
    // feature writes stay blocked.
    dispatcher.output(RID_OUTPUT_ECU, &[0u8; 9]);
    assert_eq!(device.services().telemetry.lock().unwrap().frame_id, 1);
    dispatcher.set_feature(RID_FEATURE_CONFIG, &[0xFF, 0xFF, 99, 0, 0xFF, 0, 0xFF]);
    assert_eq!(device.services().settings.bite_point(), 127);
}
