//! Start-up, settings traffic, sampling and shutdown of a whole
//! device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use simwheel_firmware::gpio::{Gpio, InputGpio};
use simwheel_firmware::hal::Hal;
use simwheel_firmware::hid::{CONFIG_REPORT_SIZE, RID_FEATURE_CONFIG};
use simwheel_firmware::power::PowerSwitch;
use simwheel_firmware::testing::{FakeHal, FakeInputHandle, FakeTransport};
use simwheel_firmware::transport::HidTransport;
use simwheel_firmware::types::{InputNumber, RawInputEvent, UserSetting};
use simwheel_firmware::ui::UserInterface;
use simwheel_firmware::SimWheel;

fn input(n: u8) -> InputNumber {
    InputNumber::new(n).unwrap()
}

#[test]
fn start_publishes_the_load_requests() {
    let _ = env_logger::builder().is_test(true).try_init();
    let hal: Arc<dyn Hal> = Arc::new(FakeHal::new());
    let handle = FakeInputHandle::new();
    let mut wheel = SimWheel::new(Arc::clone(&hal));
    wheel.add_fake_input(&handle).book_all_inputs();
    wheel.set_clutch_paddle_inputs(input(60), input(61)).unwrap();
    wheel
        .add_rotary_encoder(InputGpio::new(4), InputGpio::new(5), input(2), input(3), false)
        .unwrap();

    let loads = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&loads);
    wheel
        .bus()
        .load_setting
        .subscribe(move |kind| sink.lock().unwrap().push(kind));

    let mut device = wheel.get_ready().unwrap();
    let fake = Arc::new(FakeTransport::new());
    let transport: Arc<dyn HidTransport> = Arc::clone(&fake) as Arc<dyn HidTransport>;
    device.start(&transport).unwrap();

    let loads = loads.lock().unwrap();
    for kind in [
        UserSetting::CustomHardwareId,
        UserSetting::ClutchWorkingMode,
        UserSetting::BitePoint,
        UserSetting::AltWorkingMode,
        UserSetting::DpadWorkingMode,
        UserSetting::SecurityLock,
        UserSetting::InputMap,
        UserSetting::PulseWidth,
        UserSetting::AxisCalibration,
        UserSetting::AxisPolarity,
        UserSetting::BatteryAutoCalibration,
        UserSetting::BatteryCalibrationData,
    ] {
        assert!(loads.contains(&kind), "missing load request for {kind:?}");
    }
    assert!(fake.begin_args().is_some());
}

#[test]
fn battery_levels_are_clamped_and_forwarded() {
    let hal: Arc<dyn Hal> = Arc::new(FakeHal::new());
    let handle = FakeInputHandle::new();
    let mut wheel = SimWheel::new(hal);
    wheel.add_fake_input(&handle).book_all_inputs();
    wheel.set_clutch_paddle_inputs(input(60), input(61)).unwrap();
    wheel.set_battery_operated();
    let mut device = wheel.get_ready().unwrap();
    let fake = Arc::new(FakeTransport::new());
    let transport: Arc<dyn HidTransport> = Arc::clone(&fake) as Arc<dyn HidTransport>;
    device.start(&transport).unwrap();

    device.bus().on_battery_level.notify(150);
    device.bus().on_battery_level.notify(42);
    assert_eq!(fake.battery_levels(), vec![100, 42]);

    // The configuration report exposes the last level.
    let mut buffer = [0u8; CONFIG_REPORT_SIZE];
    device
        .dispatcher()
        .get_feature(RID_FEATURE_CONFIG, &mut buffer);
    assert_eq!(buffer[3], 42);
}

#[test]
fn config_change_notification_rides_one_report() {
    let hal: Arc<dyn Hal> = Arc::new(FakeHal::new());
    let handle = FakeInputHandle::new();
    let mut wheel = SimWheel::new(hal);
    wheel.add_fake_input(&handle).book_all_inputs();
    wheel.set_clutch_paddle_inputs(input(60), input(61)).unwrap();
    let mut device = wheel.get_ready().unwrap();
    let fake = Arc::new(FakeTransport::new());
    let transport: Arc<dyn HidTransport> = Arc::clone(&fake) as Arc<dyn HidTransport>;
    device.start(&transport).unwrap();

    device.report_change_in_config();
    device.inject_raw_input(RawInputEvent::default(), fake.as_ref());
    device.inject_raw_input(RawInputEvent::default(), fake.as_ref());
    let flags: Vec<bool> = fake.inputs().iter().map(|(_, notify)| *notify).collect();
    assert_eq!(flags, vec![true, false]);
}

#[test]
fn sampler_reads_real_drivers_through_the_hal() {
    let fake_hal = Arc::new(FakeHal::new());
    let hal: Arc<dyn Hal> = Arc::clone(&fake_hal) as Arc<dyn Hal>;
    let mut wheel = SimWheel::new(hal);
    wheel.add_button(InputGpio::new(2), input(0)).unwrap();
    wheel.add_button(InputGpio::new(3), input(1)).unwrap();
    let mut device = wheel.get_ready().unwrap();
    let fake = Arc::new(FakeTransport::new());
    let transport: Arc<dyn HidTransport> = Arc::clone(&fake) as Arc<dyn HidTransport>;
    device.start(&transport).unwrap();

    // First cycle is forced: an event is emitted even with no input.
    let previous = RawInputEvent::default();
    let (event, changed) = device.poll_inputs_once(&previous).unwrap();
    assert!(changed);
    assert_eq!(event.bitmap, 0);

    // Press the button on pin 3 (negative logic).
    fake_hal.set_input_level(Gpio::new(3), false);
    let (event, changed) = device.poll_inputs_once(&previous).unwrap();
    assert!(changed);
    assert_eq!(event.bitmap, 0b10);
    assert_eq!(event.changes, 0b10);

    // Nothing new on the next cycle.
    let (_, changed) = device.poll_inputs_once(&event).unwrap();
    assert!(!changed);

    // A forced update repeats the state.
    device.services().input.update();
    let (_, changed) = device.poll_inputs_once(&event).unwrap();
    assert!(changed);
}

struct ShutdownProbe {
    shutdowns: Arc<AtomicUsize>,
}

impl UserInterface for ShutdownProbe {
    fn shutdown(&mut self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

struct CountingSwitch {
    power_offs: Arc<AtomicUsize>,
}

impl PowerSwitch for CountingSwitch {
    fn power_off(&self) {
        self.power_offs.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn shutdown_is_acknowledged_by_the_ui_tasks() {
    let hal: Arc<dyn Hal> = Arc::new(FakeHal::new());
    let handle = FakeInputHandle::new();
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let power_offs = Arc::new(AtomicUsize::new(0));

    let mut wheel = SimWheel::new(hal);
    wheel.add_fake_input(&handle).book_all_inputs();
    wheel.set_clutch_paddle_inputs(input(60), input(61)).unwrap();
    wheel
        .add_ui(Box::new(ShutdownProbe {
            shutdowns: Arc::clone(&shutdowns),
        }))
        .set_power_switch(Arc::new(CountingSwitch {
            power_offs: Arc::clone(&power_offs),
        }));
    let device = wheel.get_ready().unwrap();

    let fake = Arc::new(FakeTransport::new());
    let transport: Arc<dyn HidTransport> = Arc::clone(&fake) as Arc<dyn HidTransport>;
    let running = device.run(transport).unwrap();

    // Give the frame server thread a moment to come up, then power
    // off: the UI acknowledges and the switch is driven.
    std::thread::sleep(Duration::from_millis(50));
    running.device().power().shutdown();

    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(power_offs.load(Ordering::SeqCst), 1);
}
