//! Behavior of the firmware-to-user input map through the public
//! device surface.

use std::sync::Arc;

use simwheel_firmware::hal::Hal;
use simwheel_firmware::gpio::InputGpio;
use simwheel_firmware::testing::{FakeHal, FakeInputHandle, FakeTransport};
use simwheel_firmware::transport::HidTransport;
use simwheel_firmware::types::{InputNumber, UserInputNumber, UserSetting};
use simwheel_firmware::{Device, SimWheel};

fn input(n: u8) -> InputNumber {
    InputNumber::new(n).unwrap()
}

fn user(n: u8) -> UserInputNumber {
    UserInputNumber::new(n).unwrap()
}

fn started(wheel: SimWheel) -> (Device, Arc<FakeTransport>) {
    let mut device = wheel.get_ready().unwrap();
    let fake = Arc::new(FakeTransport::new());
    let transport: Arc<dyn HidTransport> = Arc::clone(&fake) as Arc<dyn HidTransport>;
    device.start(&transport).unwrap();
    (device, fake)
}

#[test]
fn reset_restores_identity_defaults() {
    let hal: Arc<dyn Hal> = Arc::new(FakeHal::new());
    let handle = FakeInputHandle::new();
    let mut wheel = SimWheel::new(hal);
    wheel.add_fake_input(&handle).book_all_inputs();
    wheel.set_clutch_paddle_inputs(input(60), input(61)).unwrap();
    let (device, _) = started(wheel);

    let map = device.services().map.lock().unwrap();
    for i in 0..64u8 {
        assert_eq!(map.get(i), Some((i, i + 64)));
    }
}

#[test]
fn custom_defaults_override_identity() {
    let hal: Arc<dyn Hal> = Arc::new(FakeHal::new());
    let handle = FakeInputHandle::new();
    let mut wheel = SimWheel::new(hal);
    wheel.add_fake_input(&handle).book_all_inputs();
    wheel.set_clutch_paddle_inputs(input(60), input(61)).unwrap();
    wheel.map_input(input(0), user(5), user(6));
    let (device, _) = started(wheel);

    let mut map = device.services().map.lock().unwrap();
    assert_eq!(map.get(0), Some((5, 6)));

    // A host write sticks until the map is reset.
    map.set(0, 1, 2);
    assert_eq!(map.get(0), Some((1, 2)));
    map.reset();
    assert_eq!(map.get(0), Some((5, 6)));
}

#[test]
fn optimal_defaults_follow_the_booked_inputs() {
    let fake_hal = Arc::new(FakeHal::new());
    let hal: Arc<dyn Hal> = Arc::clone(&fake_hal) as Arc<dyn Hal>;
    let mut wheel = SimWheel::new(hal);
    for (pin, number) in [(2u8, 0u8), (3, 1), (4, 2), (5, 3)] {
        wheel.add_button(InputGpio::new(pin), input(number)).unwrap();
    }
    wheel.set_optimal_map();
    let (device, _) = started(wheel);

    let map = device.services().map.lock().unwrap();
    // Highest booked number is 3: ALT entries start right above it.
    assert_eq!(map.get(0), Some((0, 4)));
    assert_eq!(map.get(1), Some((1, 5)));
    assert_eq!(map.get(3), Some((3, 7)));
    // Unbooked entries keep the absolute defaults.
    assert_eq!(map.get(9), Some((9, 73)));
}

#[test]
fn mapping_is_identical_outside_differing_entries() {
    let hal: Arc<dyn Hal> = Arc::new(FakeHal::new());
    let handle = FakeInputHandle::new();
    let mut wheel = SimWheel::new(hal);
    wheel.add_fake_input(&handle).book_all_inputs();
    wheel.set_clutch_paddle_inputs(input(60), input(61)).unwrap();
    let (device, _) = started(wheel);

    let mut map = device.services().map.lock().unwrap();
    // Make entry 2 identical in both maps.
    map.set(2, 9, 9);

    let bitmap = 0b0100u64;
    assert_eq!(map.map(false, bitmap), map.map(true, bitmap));

    // Entries that differ still diverge.
    let bitmap = 0b0101u64;
    let (regular_low, regular_high) = map.map(false, bitmap);
    let (alt_low, alt_high) = map.map(true, bitmap);
    assert_ne!((regular_low, regular_high), (alt_low, alt_high));
    // The shared entry contributes the same bit to both.
    assert_eq!(regular_low & (1 << 9), 1 << 9);
    assert_eq!(alt_low & (1 << 9), 1 << 9);
}

#[test]
fn host_writes_never_trigger_saves() {
    let hal: Arc<dyn Hal> = Arc::new(FakeHal::new());
    let handle = FakeInputHandle::new();
    let mut wheel = SimWheel::new(hal);
    wheel.add_fake_input(&handle).book_all_inputs();
    wheel.set_clutch_paddle_inputs(input(60), input(61)).unwrap();
    let saved = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&saved);
    wheel
        .bus()
        .save_setting
        .subscribe(move |kind| sink.lock().unwrap().push(kind));
    let (device, _) = started(wheel);

    device
        .services()
        .map
        .lock()
        .unwrap()
        .set(0, 10, 20);
    assert!(!saved
        .lock()
        .unwrap()
        .contains(&UserSetting::InputMap));
}
