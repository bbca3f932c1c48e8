//! Configuration-time validation: every rule violation must abort
//! device start with a typed error.

use std::sync::Arc;

use simwheel_firmware::error::{ConfigError, GpioError};
use simwheel_firmware::gpio::{AdcGpio, InputGpio, OutputGpio};
use simwheel_firmware::hal::{Hal, I2cBus};
use simwheel_firmware::testing::{FakeHal, FakeInputHandle};
use simwheel_firmware::types::{InputNumber, UserInputNumber};
use simwheel_firmware::SimWheel;

fn input(n: u8) -> InputNumber {
    InputNumber::new(n).unwrap()
}

fn fake_hal() -> (Arc<FakeHal>, Arc<dyn Hal>) {
    let hal = Arc::new(FakeHal::new());
    let dyn_hal: Arc<dyn Hal> = Arc::clone(&hal) as Arc<dyn Hal>;
    (hal, dyn_hal)
}

#[test]
fn gpio_double_reservation_is_fatal() {
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    wheel.add_button(InputGpio::new(2), input(0)).unwrap();
    let error = wheel.add_button(InputGpio::new(2), input(1)).unwrap_err();
    assert_eq!(error, ConfigError::Gpio(GpioError::AlreadyReserved(2)));
}

#[test]
fn gpio_capability_checks_are_fatal() {
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    assert_eq!(
        wheel.add_button(InputGpio::new(120), input(0)).unwrap_err(),
        ConfigError::Gpio(GpioError::NoSuchPin(120))
    );
    let matrix = vec![(OutputGpio::new(85), vec![(InputGpio::new(2), input(0))])];
    assert_eq!(
        wheel.add_button_matrix(&matrix, true).unwrap_err(),
        ConfigError::Gpio(GpioError::NotOutputCapable(85))
    );
}

#[test]
fn empty_hardware_blocks_are_rejected() {
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    assert_eq!(
        wheel.add_button_matrix(&Vec::new(), true).unwrap_err(),
        ConfigError::EmptyInputNumberSet("button matrix")
    );
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    assert_eq!(
        wheel
            .add_shift_registers(
                OutputGpio::new(10),
                OutputGpio::new(11),
                InputGpio::new(12),
                &vec![Vec::new()],
                None,
            )
            .unwrap_err(),
        ConfigError::EmptyInputNumberSet("PISO shift registers")
    );
}

#[test]
fn feature_inputs_must_be_assigned_to_hardware() {
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    wheel.add_button(InputGpio::new(2), input(0)).unwrap();
    // DPAD inputs 7..=10 are never assigned to hardware.
    wheel.set_dpad_inputs(input(7), input(8), input(9), input(10));
    assert_eq!(
        wheel.get_ready().unwrap_err(),
        ConfigError::UnknownInputNumber("dpad input numbers")
    );
}

#[test]
fn clutch_feature_conflicts() {
    // Bite point inputs without any clutch paddles.
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    wheel.add_button(InputGpio::new(2), input(4)).unwrap();
    wheel.add_button(InputGpio::new(3), input(5)).unwrap();
    wheel.set_bite_point_inputs(input(4), input(5)).unwrap();
    assert!(matches!(
        wheel.get_ready().unwrap_err(),
        ConfigError::Conflict(_)
    ));

    // Axis recalibration inputs without analog paddles.
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    wheel.add_button(InputGpio::new(2), input(0)).unwrap();
    wheel.add_button(InputGpio::new(3), input(1)).unwrap();
    wheel.set_clutch_paddle_inputs(input(0), input(1)).unwrap();
    wheel.set_axis_recalibration_inputs(&[input(0), input(1)]);
    assert!(matches!(
        wheel.get_ready().unwrap_err(),
        ConfigError::Conflict(_)
    ));

    // Analog paddles without clutch input numbers.
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    wheel
        .set_analog_clutch_paddles(AdcGpio::new(33), AdcGpio::new(34))
        .unwrap();
    assert!(matches!(
        wheel.get_ready().unwrap_err(),
        ConfigError::Conflict(_)
    ));

    // Attaching the paddles twice.
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    wheel
        .set_analog_clutch_paddles(AdcGpio::new(33), AdcGpio::new(34))
        .unwrap();
    assert!(wheel
        .set_analog_clutch_paddles(AdcGpio::new(35), AdcGpio::new(36))
        .is_err());

    // The same input number on both paddles.
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    assert!(wheel.set_clutch_paddle_inputs(input(0), input(0)).is_err());
}

#[test]
fn mode_cycle_combos_require_their_feature() {
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    wheel.add_button(InputGpio::new(2), input(0)).unwrap();
    wheel.set_dpad_cycle_inputs(&[input(0)]);
    assert!(matches!(
        wheel.get_ready().unwrap_err(),
        ConfigError::Conflict(_)
    ));

    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    wheel.add_button(InputGpio::new(2), input(0)).unwrap();
    wheel.set_alt_cycle_inputs(&[input(0)]);
    assert!(matches!(
        wheel.get_ready().unwrap_err(),
        ConfigError::Conflict(_)
    ));
}

#[test]
fn neutral_gear_requires_two_hardware_inputs() {
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    assert!(wheel.set_neutral_gear(input(40), &[input(2)]).is_err());
    assert!(wheel
        .set_neutral_gear(input(40), &[input(2), input(3)])
        .is_ok());
}

#[test]
fn coded_switch_validation() {
    let positions: Vec<InputNumber> = (20..28).map(input).collect();

    // Repeated bit inputs within one switch.
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    assert!(wheel
        .add_coded_switch(&[input(0), input(0), input(2)], &positions)
        .is_err());

    // Bit inputs reused across switches.
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    wheel
        .add_coded_switch(&[input(0), input(1), input(2)], &positions)
        .unwrap();
    let other_positions: Vec<InputNumber> = (30..38).map(input).collect();
    assert!(wheel
        .add_coded_switch(&[input(2), input(4), input(5)], &other_positions)
        .is_err());

    // Wrong position count for the bit count.
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    assert!(wheel
        .add_coded_switch(&[input(0), input(1), input(2), input(3)], &positions)
        .is_err());

    // Bit inputs not assigned to any hardware.
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    wheel
        .add_coded_switch(&[input(0), input(1), input(2)], &positions)
        .unwrap();
    assert_eq!(
        wheel.get_ready().unwrap_err(),
        ConfigError::UnknownInputNumber("coded switch")
    );
}

#[test]
fn i2c_address_resolution() {
    let pins = [(0u8, input(8))];

    // Full address, device absent.
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    assert_eq!(
        wheel
            .add_pcf8574(&pins, 0x38, true, I2cBus::Primary)
            .unwrap_err(),
        ConfigError::I2cDeviceNotFound {
            address: 0x38,
            bus: 0
        }
    );

    // Partial address matching two devices.
    let (fake, hal) = fake_hal();
    fake.add_i2c_device(I2cBus::Primary, 0x20);
    fake.add_i2c_device(I2cBus::Primary, 0x38);
    let mut wheel = SimWheel::new(hal);
    assert_eq!(
        wheel
            .add_pcf8574(&pins, 0b000, false, I2cBus::Primary)
            .unwrap_err(),
        ConfigError::I2cFullAddressUnknown {
            address: 0,
            bus: 0
        }
    );

    // Partial address with a unique match resolves.
    let (fake, hal) = fake_hal();
    fake.add_i2c_device(I2cBus::Primary, 0x21);
    let mut wheel = SimWheel::new(hal);
    assert!(wheel.add_pcf8574(&pins, 0b001, false, I2cBus::Primary).is_ok());

    // 8-bit addresses are invalid outright.
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    assert_eq!(
        wheel
            .add_mcp23017(&pins, 0x80, true, I2cBus::Primary)
            .unwrap_err(),
        ConfigError::InvalidI2cAddress(0x80)
    );
}

#[test]
fn custom_map_defaults_must_be_booked() {
    let (_, hal) = fake_hal();
    let handle = FakeInputHandle::new();
    let mut wheel = SimWheel::new(hal);
    wheel.add_fake_input(&handle);
    wheel.set_clutch_paddle_inputs(input(60), input(61)).unwrap();
    wheel.map_input(
        input(9),
        UserInputNumber::new(1).unwrap(),
        UserInputNumber::new(2).unwrap(),
    );
    assert_eq!(
        wheel.get_ready().unwrap_err(),
        ConfigError::UnknownInputNumber("custom input map defaults")
    );
}

#[test]
fn rotary_encoder_requires_distinct_directions() {
    let (_, hal) = fake_hal();
    let mut wheel = SimWheel::new(hal);
    assert!(wheel
        .add_rotary_encoder(InputGpio::new(4), InputGpio::new(5), input(2), input(2), false)
        .is_err());
    assert!(wheel
        .add_rotary_encoder(InputGpio::new(4), InputGpio::new(5), input(2), input(3), false)
        .is_ok());
}
