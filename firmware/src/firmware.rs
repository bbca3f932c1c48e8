//! Device configuration and lifecycle.
//!
//! User code describes the hardware and the semantic bindings through
//! [`SimWheel`], then calls [`SimWheel::get_ready`] to validate the
//! whole configuration and obtain a [`Device`]. Starting the device
//! publishes the one-shot start notification and spawns one task per
//! subsystem.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use futures::executor::block_on;
use log::info;

use crate::battery::BatteryCalibration;
use crate::drivers::{
    AnalogClutch, AnalogInput, AnalogMultiplexerInput, AxisCalibration, ButtonMatrixInput,
    DigitalButton, DigitalInput, Mcp23017Input, MuxChip, Pcf8574Input, RotaryCodedSwitchInput,
    RotaryEncoderInput, ShiftRegisterChain, ShiftRegistersInput,
};
use crate::error::ConfigError;
use crate::events::EventBus;
use crate::gpio::{AdcGpio, GpioRegistry, InputGpio, OutputGpio};
use crate::hal::{deduce_full_address, FullAddressMatch, Hal, I2cBus};
use crate::hid::{ConfigNotifier, Dispatcher, HardwareId};
use crate::hub::{CodedSwitch, HubBindings, InputHub};
use crate::inputmap::InputMap;
use crate::inputs::{decoupling_queue, InputSampler, InputService};
use crate::pixels::{NoPixels, PixelControl};
use crate::power::{NoPowerSwitch, Power, PowerSwitch, ShutdownBarrier};
use crate::settings::Settings;
use crate::testing::{FakeAxis, FakeDigitalInput, FakeInputHandle};
use crate::transport::{HidConfig, HidTransport};
use crate::types::{
    combination_bitmap, CapabilityFlags, DeviceCapabilities, InputBookings, InputNumber,
    PulseWidthMultiplier, RawInputEvent, TelemetryData, UserInputNumber, UserSetting,
    UNKNOWN_BATTERY_LEVEL,
};
use crate::ui::{mailbox, FrameServer, UiEvent, UserInterface};

/// Wiring of a button matrix: selector (row) pins, each with its input
/// (column) pins and their assigned input numbers.
pub type ButtonMatrix = Vec<(OutputGpio, Vec<(InputGpio, InputNumber)>)>;

/// One analog multiplexer chip: its signal pin and the input numbers
/// assigned to its channels.
pub type MultiplexerChip = (InputGpio, Vec<(u8, InputNumber)>);

struct CodedSwitchSpec {
    bits: Vec<InputNumber>,
    positions: Vec<InputNumber>,
}

impl std::fmt::Debug for SimWheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimWheel").finish_non_exhaustive()
    }
}

/// The device under configuration.
pub struct SimWheel {
    hal: Arc<dyn Hal>,
    bus: Arc<EventBus>,
    bookings: InputBookings,
    gpio: GpioRegistry,
    capabilities: Arc<CapabilityFlags>,
    drivers: Vec<Box<dyn DigitalInput>>,
    left_axis: Option<Box<dyn AnalogInput>>,
    right_axis: Option<Box<dyn AnalogInput>>,
    axis_calibration: Option<(Arc<AxisCalibration>, Arc<AxisCalibration>)>,
    pulse_multiplier: Arc<AtomicU8>,
    map: InputMap,
    hid_config: HidConfig,
    serial: u64,
    pixels: Arc<dyn PixelControl>,
    power_switch: Arc<dyn PowerSwitch>,
    uis: Vec<Box<dyn UserInterface>>,
    i2c_probe_cache: HashMap<u8, Vec<u8>>,

    clutch_inputs: Option<(InputNumber, InputNumber)>,
    bite_point_inputs: Option<(InputNumber, InputNumber)>,
    alt_combo: u64,
    cycle_clutch_combo: u64,
    cycle_alt_combo: u64,
    cycle_dpad_combo: u64,
    cycle_lock_combo: u64,
    recalibrate_combo: u64,
    dpad_inputs: Option<[InputNumber; 4]>,
    neutral: Option<(InputNumber, u64)>,
    coded_switches: Vec<CodedSwitchSpec>,
}

impl SimWheel {
    /// Begin configuring a device against a HAL.
    #[must_use]
    pub fn new(hal: Arc<dyn Hal>) -> Self {
        Self {
            hal,
            bus: Arc::new(EventBus::default()),
            bookings: InputBookings::default(),
            gpio: GpioRegistry::default(),
            capabilities: Arc::new(CapabilityFlags::default()),
            drivers: Vec::new(),
            left_axis: None,
            right_axis: None,
            axis_calibration: None,
            pulse_multiplier: Arc::new(AtomicU8::new(PulseWidthMultiplier::default() as u8)),
            map: InputMap::default(),
            hid_config: HidConfig::default(),
            serial: 0,
            pixels: Arc::new(NoPixels),
            power_switch: Arc::new(NoPowerSwitch),
            uis: Vec::new(),
            i2c_probe_cache: HashMap::new(),
            clutch_inputs: None,
            bite_point_inputs: None,
            alt_combo: 0,
            cycle_clutch_combo: 0,
            cycle_alt_combo: 0,
            cycle_dpad_combo: 0,
            cycle_lock_combo: 0,
            recalibrate_combo: 0,
            dpad_inputs: None,
            neutral: None,
            coded_switches: Vec::new(),
        }
    }

    /// The settings event bus, for wiring collaborators (storage and
    /// the like) during configuration.
    #[must_use]
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    // --- Input hardware -------------------------------------------------

    /// Attach a single button to an input pin.
    ///
    /// # Errors
    ///
    /// Fails on GPIO misuse.
    pub fn add_button(
        &mut self,
        pin: InputGpio,
        number: InputNumber,
    ) -> Result<&mut Self, ConfigError> {
        let gpio = self.gpio.reserve_input(self.hal.as_ref(), pin)?;
        self.bookings.book(number);
        self.drivers
            .push(Box::new(DigitalButton::new(Arc::clone(&self.hal), gpio, number)));
        Ok(self)
    }

    /// Attach a quadrature rotary encoder. `alternate_encoding` selects
    /// the state machine for ALPS RKJX series encoders.
    ///
    /// # Errors
    ///
    /// Fails on GPIO misuse or equal rotation input numbers.
    pub fn add_rotary_encoder(
        &mut self,
        clk_pin: InputGpio,
        dt_pin: InputGpio,
        cw_number: InputNumber,
        ccw_number: InputNumber,
        alternate_encoding: bool,
    ) -> Result<&mut Self, ConfigError> {
        if cw_number == ccw_number {
            return Err(ConfigError::conflict(
                "useless rotary encoder: same input numbers for both rotation directions",
            ));
        }
        let clk = self.gpio.reserve_input(self.hal.as_ref(), clk_pin)?;
        let dt = self.gpio.reserve_input(self.hal.as_ref(), dt_pin)?;
        self.bookings.book(cw_number);
        self.bookings.book(ccw_number);
        self.capabilities.set(DeviceCapabilities::ROTARY_ENCODERS, true);
        self.drivers.push(Box::new(RotaryEncoderInput::new(
            Arc::clone(&self.hal),
            clk,
            dt,
            cw_number,
            ccw_number,
            alternate_encoding,
            Arc::clone(&self.pulse_multiplier),
        )));
        Ok(self)
    }

    /// Attach a button matrix.
    ///
    /// # Errors
    ///
    /// Fails on GPIO misuse or an empty matrix.
    pub fn add_button_matrix(
        &mut self,
        matrix: &ButtonMatrix,
        negative_logic: bool,
    ) -> Result<&mut Self, ConfigError> {
        let mut selectors: Vec<OutputGpio> = Vec::new();
        let mut inputs: Vec<InputGpio> = Vec::new();
        let mut rows = Vec::with_capacity(matrix.len());
        let mut booked_any = false;
        for (selector, columns) in matrix {
            if !selectors.contains(selector) {
                selectors.push(*selector);
            }
            let mut cols = Vec::with_capacity(columns.len());
            for (input, number) in columns {
                if !inputs.contains(input) {
                    inputs.push(*input);
                }
                self.bookings.book(*number);
                booked_any = true;
                cols.push((input.gpio(), *number));
            }
            rows.push((selector.gpio(), cols));
        }
        if !booked_any {
            return Err(ConfigError::EmptyInputNumberSet("button matrix"));
        }
        for selector in selectors {
            self.gpio.reserve_output(self.hal.as_ref(), selector)?;
        }
        for input in inputs {
            self.gpio.reserve_input(self.hal.as_ref(), input)?;
        }
        self.drivers.push(Box::new(ButtonMatrixInput::new(
            Arc::clone(&self.hal),
            &rows,
            negative_logic,
        )));
        Ok(self)
    }

    /// Attach a group of analog multiplexer chips sharing 3 to 5
    /// selector pins.
    ///
    /// # Errors
    ///
    /// Fails on GPIO misuse, an unsupported selector count, a channel
    /// outside the chip, or an empty group.
    pub fn add_analog_multiplexers(
        &mut self,
        selector_pins: &[OutputGpio],
        chips: &[MultiplexerChip],
    ) -> Result<&mut Self, ConfigError> {
        if !(3..=5).contains(&selector_pins.len()) {
            return Err(ConfigError::conflict(
                "analog multiplexers require 3 to 5 selector pins",
            ));
        }
        let channel_count = 1u8 << selector_pins.len();
        let mut booked_any = false;
        let mut driver_chips = Vec::with_capacity(chips.len());
        for (input_pin, channels) in chips {
            for (channel, number) in channels {
                if *channel >= channel_count {
                    return Err(ConfigError::conflict(format!(
                        "multiplexer channel {channel} does not exist on a {channel_count}-channel chip"
                    )));
                }
                self.bookings.book(*number);
                booked_any = true;
            }
            driver_chips.push(MuxChip {
                input_pin: input_pin.gpio(),
                channels: channels.clone(),
            });
        }
        if !booked_any {
            return Err(ConfigError::EmptyInputNumberSet("analog multiplexers"));
        }
        let mut selectors = Vec::with_capacity(selector_pins.len());
        for pin in selector_pins {
            selectors.push(self.gpio.reserve_output(self.hal.as_ref(), *pin)?);
        }
        for (input_pin, _) in chips {
            self.gpio.reserve_input(self.hal.as_ref(), *input_pin)?;
        }
        self.drivers.push(Box::new(AnalogMultiplexerInput::new(
            Arc::clone(&self.hal),
            selectors,
            &driver_chips,
        )));
        Ok(self)
    }

    /// Attach a chain of 74HC165N shift registers. `ser_input`
    /// optionally assigns an input number to the SER pin of the last
    /// chip.
    ///
    /// # Errors
    ///
    /// Fails on GPIO misuse, a pin index outside the chip, or an empty
    /// chain.
    pub fn add_shift_registers(
        &mut self,
        load_pin: OutputGpio,
        next_pin: OutputGpio,
        serial_pin: InputGpio,
        chain: &ShiftRegisterChain,
        ser_input: Option<InputNumber>,
    ) -> Result<&mut Self, ConfigError> {
        let mut booked_any = false;
        for chip in chain {
            for (pin_index, number) in chip {
                if *pin_index >= 8 {
                    return Err(ConfigError::conflict(format!(
                        "shift register pin {pin_index} does not exist"
                    )));
                }
                self.bookings.book(*number);
                booked_any = true;
            }
        }
        if let Some(number) = ser_input {
            self.bookings.book(number);
            booked_any = true;
        }
        if !booked_any {
            return Err(ConfigError::EmptyInputNumberSet("PISO shift registers"));
        }
        let load = self.gpio.reserve_output(self.hal.as_ref(), load_pin)?;
        let next = self.gpio.reserve_output(self.hal.as_ref(), next_pin)?;
        let serial = self.gpio.reserve_input(self.hal.as_ref(), serial_pin)?;
        self.drivers.push(Box::new(ShiftRegistersInput::new(
            Arc::clone(&self.hal),
            load,
            next,
            serial,
            chain,
            ser_input,
        )));
        Ok(self)
    }

    /// Attach buttons behind a PCF8574 GPIO expander. With
    /// `full_address` unset, `address` holds only the user-wired low
    /// address bits and the full address is probed from the bus.
    ///
    /// # Errors
    ///
    /// Fails on an invalid or unresolvable I2C address or an empty pin
    /// set.
    pub fn add_pcf8574(
        &mut self,
        pins: &[(u8, InputNumber)],
        address: u8,
        full_address: bool,
        bus: I2cBus,
    ) -> Result<&mut Self, ConfigError> {
        self.validate_expander_pins(pins, 8, "PCF8574 expander")?;
        let resolved = self.resolve_i2c_address(address, full_address, bus)?;
        for (_, number) in pins {
            self.bookings.book(*number);
        }
        self.drivers.push(Box::new(Pcf8574Input::new(
            Arc::clone(&self.hal),
            bus,
            resolved,
            pins,
        )));
        Ok(self)
    }

    /// Attach buttons behind an MCP23017 GPIO expander.
    ///
    /// # Errors
    ///
    /// Fails on an invalid or unresolvable I2C address or an empty pin
    /// set.
    pub fn add_mcp23017(
        &mut self,
        pins: &[(u8, InputNumber)],
        address: u8,
        full_address: bool,
        bus: I2cBus,
    ) -> Result<&mut Self, ConfigError> {
        self.validate_expander_pins(pins, 16, "MCP23017 expander")?;
        let resolved = self.resolve_i2c_address(address, full_address, bus)?;
        for (_, number) in pins {
            self.bookings.book(*number);
        }
        self.drivers.push(Box::new(Mcp23017Input::new(
            Arc::clone(&self.hal),
            bus,
            resolved,
            pins,
        )));
        Ok(self)
    }

    /// Attach a rotary coded switch wired straight to GPIO pins.
    ///
    /// # Errors
    ///
    /// Fails on GPIO misuse, a position outside the switch, or an
    /// empty position set.
    pub fn add_rotary_coded_switch(
        &mut self,
        pins: &[InputGpio],
        positions: &[(u8, InputNumber)],
        complementary_code: bool,
    ) -> Result<&mut Self, ConfigError> {
        if !(3..=5).contains(&pins.len()) {
            return Err(ConfigError::conflict(
                "a rotary coded switch requires 3 to 5 pins",
            ));
        }
        if positions.is_empty() {
            return Err(ConfigError::EmptyInputNumberSet("rotary coded switch"));
        }
        let position_count = 1u8 << pins.len();
        for (position, number) in positions {
            if *position >= position_count {
                return Err(ConfigError::conflict(format!(
                    "position {position} does not exist on a {position_count}-position switch"
                )));
            }
            self.bookings.book(*number);
        }
        let mut gpios = Vec::with_capacity(pins.len());
        for pin in pins {
            gpios.push(self.gpio.reserve_input(self.hal.as_ref(), *pin)?);
        }
        self.drivers.push(Box::new(RotaryCodedSwitchInput::new(
            Arc::clone(&self.hal),
            gpios,
            positions,
            complementary_code,
        )));
        Ok(self)
    }

    /// Attach the two analog clutch paddles.
    ///
    /// # Errors
    ///
    /// Fails on GPIO misuse or when called twice.
    pub fn set_analog_clutch_paddles(
        &mut self,
        left_pin: AdcGpio,
        right_pin: AdcGpio,
    ) -> Result<&mut Self, ConfigError> {
        if self.left_axis.is_some() {
            return Err(ConfigError::conflict(
                "analog clutch paddles were attached twice",
            ));
        }
        let left = self.gpio.reserve_adc(self.hal.as_ref(), left_pin)?;
        let right = self.gpio.reserve_adc(self.hal.as_ref(), right_pin)?;
        let left_cal = Arc::new(AxisCalibration::default());
        let right_cal = Arc::new(AxisCalibration::default());
        self.left_axis = Some(Box::new(AnalogClutch::new(
            Arc::clone(&self.hal),
            left,
            Arc::clone(&left_cal),
        )));
        self.right_axis = Some(Box::new(AnalogClutch::new(
            Arc::clone(&self.hal),
            right,
            Arc::clone(&right_cal),
        )));
        self.axis_calibration = Some((left_cal, right_cal));
        self.capabilities.set(DeviceCapabilities::CLUTCH_ANALOG, true);
        Ok(self)
    }

    /// Attach a scripted input source, and scripted analog axes if no
    /// paddles were attached yet. For testing.
    pub fn add_fake_input(&mut self, handle: &FakeInputHandle) -> &mut Self {
        if self.left_axis.is_none() {
            self.left_axis = Some(Box::new(FakeAxis::new(handle, true)));
            self.right_axis = Some(Box::new(FakeAxis::new(handle, false)));
            self.capabilities.set(DeviceCapabilities::CLUTCH_ANALOG, true);
        }
        self.drivers.push(Box::new(FakeDigitalInput::new(handle)));
        self
    }

    /// Book every firmware input number. For testing.
    pub fn book_all_inputs(&mut self) -> &mut Self {
        self.bookings.book_all();
        self
    }

    // --- Semantic bindings ----------------------------------------------

    /// Assign the clutch paddle input numbers. With analog paddles
    /// these become virtual inputs; with switches they must belong to
    /// registered hardware.
    ///
    /// # Errors
    ///
    /// Fails when both paddles share one input number.
    pub fn set_clutch_paddle_inputs(
        &mut self,
        left: InputNumber,
        right: InputNumber,
    ) -> Result<&mut Self, ConfigError> {
        if left == right {
            return Err(ConfigError::conflict(
                "the same input number was assigned to both clutch paddles",
            ));
        }
        self.clutch_inputs = Some((left, right));
        if self.capabilities.contains(DeviceCapabilities::CLUTCH_ANALOG) {
            self.bookings.book(left);
            self.bookings.book(right);
        } else {
            self.capabilities.set(DeviceCapabilities::CLUTCH_BUTTON, true);
        }
        Ok(self)
    }

    /// Assign the bite point adjustment inputs.
    ///
    /// # Errors
    ///
    /// Fails when both directions share one input number.
    pub fn set_bite_point_inputs(
        &mut self,
        increase: InputNumber,
        decrease: InputNumber,
    ) -> Result<&mut Self, ConfigError> {
        if increase == decrease {
            return Err(ConfigError::conflict(
                "the same input number was assigned to increase and decrease the bite point",
            ));
        }
        self.bite_point_inputs = Some((increase, decrease));
        Ok(self)
    }

    /// Assign the combination cycling the clutch working mode.
    pub fn set_clutch_cycle_inputs(&mut self, combination: &[InputNumber]) -> &mut Self {
        self.cycle_clutch_combo = combination_bitmap(combination);
        self
    }

    /// Assign the combination forcing axis recalibration.
    pub fn set_axis_recalibration_inputs(&mut self, combination: &[InputNumber]) -> &mut Self {
        self.recalibrate_combo = combination_bitmap(combination);
        self
    }

    /// Assign the ALT button inputs.
    pub fn set_alt_inputs(&mut self, combination: &[InputNumber]) -> &mut Self {
        self.alt_combo = combination_bitmap(combination);
        self.capabilities
            .set(DeviceCapabilities::ALT, self.alt_combo != 0);
        self
    }

    /// Assign the combination cycling the ALT buttons working mode.
    pub fn set_alt_cycle_inputs(&mut self, combination: &[InputNumber]) -> &mut Self {
        self.cycle_alt_combo = combination_bitmap(combination);
        self
    }

    /// Assign the four DPAD inputs.
    pub fn set_dpad_inputs(
        &mut self,
        up: InputNumber,
        down: InputNumber,
        left: InputNumber,
        right: InputNumber,
    ) -> &mut Self {
        self.dpad_inputs = Some([up, down, left, right]);
        self.capabilities.set(DeviceCapabilities::DPAD, true);
        self
    }

    /// Assign the combination cycling the DPAD working mode.
    pub fn set_dpad_cycle_inputs(&mut self, combination: &[InputNumber]) -> &mut Self {
        self.cycle_dpad_combo = combination_bitmap(combination);
        self
    }

    /// Assign the combination toggling the security lock.
    pub fn set_security_lock_cycle_inputs(&mut self, combination: &[InputNumber]) -> &mut Self {
        self.cycle_lock_combo = combination_bitmap(combination);
        self
    }

    /// Bind the virtual neutral gear: one firmware input not attached
    /// to hardware, engaged by a combination of two or more hardware
    /// inputs.
    ///
    /// # Errors
    ///
    /// Fails when the combination holds fewer than two inputs.
    pub fn set_neutral_gear(
        &mut self,
        neutral: InputNumber,
        combination: &[InputNumber],
    ) -> Result<&mut Self, ConfigError> {
        if combination.len() < 2 {
            return Err(ConfigError::conflict(
                "the neutral gear requires a combination of two or more hardware inputs",
            ));
        }
        self.bookings.book(neutral);
        self.neutral = Some((neutral, combination_bitmap(combination)));
        Ok(self)
    }

    /// Bind a coded switch decoded from already-scanned input bits:
    /// 3 to 5 bit inputs and one position input per decoded position.
    ///
    /// # Errors
    ///
    /// Fails on a bit/position count mismatch or on bit inputs reused
    /// within or across coded switches.
    pub fn add_coded_switch(
        &mut self,
        bits: &[InputNumber],
        positions: &[InputNumber],
    ) -> Result<&mut Self, ConfigError> {
        if !(3..=5).contains(&bits.len()) {
            return Err(ConfigError::conflict(
                "a coded switch requires 3 to 5 bit inputs",
            ));
        }
        if positions.len() != 1 << bits.len() {
            return Err(ConfigError::conflict(format!(
                "a coded switch with {} bit inputs requires {} positions",
                bits.len(),
                1 << bits.len()
            )));
        }
        for (index, bit) in bits.iter().enumerate() {
            if bits[..index].contains(bit) {
                return Err(ConfigError::conflict(
                    "input numbers used in all coded switches must be unique",
                ));
            }
        }
        for other in &self.coded_switches {
            if bits.iter().any(|bit| other.bits.contains(bit)) {
                return Err(ConfigError::conflict(
                    "input numbers used in all coded switches must be unique",
                ));
            }
        }
        self.coded_switches.push(CodedSwitchSpec {
            bits: bits.to_vec(),
            positions: positions.to_vec(),
        });
        Ok(self)
    }

    // --- Input map, identity, collaborators ----------------------------

    /// Register a custom factory default for one input map entry.
    pub fn map_input(
        &mut self,
        firmware: InputNumber,
        user: UserInputNumber,
        user_alt: UserInputNumber,
    ) -> &mut Self {
        self.map.set_default(firmware, user, user_alt);
        self
    }

    /// Derive factory map defaults from the booked input numbers.
    pub fn set_optimal_map(&mut self) -> &mut Self {
        self.map.set_optimal();
        self
    }

    /// Set the HID identity presented to the host. Zero VID/PID values
    /// select the firmware defaults.
    pub fn configure_hid(
        &mut self,
        device_name: impl Into<String>,
        manufacturer: impl Into<String>,
        auto_power_off: bool,
        vid: u16,
        pid: u16,
    ) -> &mut Self {
        self.hid_config = HidConfig {
            device_name: device_name.into(),
            manufacturer: manufacturer.into(),
            auto_power_off,
            factory_vid: vid,
            factory_pid: pid,
        };
        self
    }

    /// Set the serial number advertised in the capabilities report.
    pub fn set_device_serial(&mut self, serial: u64) -> &mut Self {
        self.serial = serial;
        self
    }

    /// Declare the device battery-operated.
    pub fn set_battery_operated(&mut self) -> &mut Self {
        self.capabilities.set(DeviceCapabilities::BATTERY, true);
        self
    }

    /// Wire the pixel control collaborator.
    pub fn set_pixel_control(&mut self, pixels: Arc<dyn PixelControl>) -> &mut Self {
        self.pixels = pixels;
        self
    }

    /// Wire the power switch collaborator.
    pub fn set_power_switch(&mut self, switch: Arc<dyn PowerSwitch>) -> &mut Self {
        self.power_switch = switch;
        self
    }

    /// Register a user interface instance.
    pub fn add_ui(&mut self, ui: Box<dyn UserInterface>) -> &mut Self {
        self.uis.push(ui);
        self
    }

    // --- Validation and assembly ----------------------------------------

    /// Validate the whole configuration and assemble the runtime
    /// device.
    ///
    /// # Errors
    ///
    /// Any violation of the configuration rules is fatal: the device
    /// refuses to start.
    pub fn get_ready(mut self) -> Result<Device, ConfigError> {
        // Telemetry requirements and frame rate from the UI instances.
        let mut max_fps = 0u8;
        let mut requires = (false, false, false, false);
        for ui in &self.uis {
            requires.0 |= ui.requires_powertrain_telemetry();
            requires.1 |= ui.requires_ecu_telemetry();
            requires.2 |= ui.requires_race_control_telemetry();
            requires.3 |= ui.requires_gauge_telemetry();
            let uses_telemetry = ui.requires_powertrain_telemetry()
                || ui.requires_ecu_telemetry()
                || ui.requires_race_control_telemetry()
                || ui.requires_gauge_telemetry();
            if uses_telemetry {
                max_fps = max_fps.max(ui.max_fps());
            }
        }
        self.capabilities
            .set(DeviceCapabilities::TELEMETRY_POWERTRAIN, requires.0);
        self.capabilities
            .set(DeviceCapabilities::TELEMETRY_ECU, requires.1);
        self.capabilities
            .set(DeviceCapabilities::TELEMETRY_RACE_CONTROL, requires.2);
        self.capabilities
            .set(DeviceCapabilities::TELEMETRY_GAUGES, requires.3);

        self.map.finish_configuration(&self.bookings)?;
        let bindings = self.build_bindings()?;

        // Shared services
        let bus = Arc::clone(&self.bus);
        let settings = Arc::new(Settings::new(Arc::clone(&bus)));
        let input_service = Arc::new(InputService::new(
            Arc::clone(&bus),
            self.axis_calibration.clone(),
            Arc::clone(&self.pulse_multiplier),
        ));
        let map = Arc::new(Mutex::new(self.map));
        let hardware_id = Arc::new(HardwareId::new(Arc::clone(&bus)));
        hardware_id.set_factory(self.hid_config.factory_vid, self.hid_config.factory_pid);
        let battery_calibration = Arc::new(BatteryCalibration::new(Arc::clone(&bus)));
        let telemetry = Arc::new(Mutex::new(TelemetryData::default()));
        let notifier = Arc::new(ConfigNotifier::default());
        let last_battery_level = Arc::new(AtomicU8::new(UNKNOWN_BATTERY_LEVEL));

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&settings),
            Arc::clone(&map),
            Arc::clone(&input_service),
            Arc::clone(&hardware_id),
            Arc::clone(&battery_calibration),
            Arc::clone(&self.pixels),
            Arc::clone(&telemetry),
            Arc::clone(&bus),
            Arc::clone(&self.capabilities),
            self.bookings,
            self.serial,
            max_fps,
            Arc::clone(&last_battery_level),
        ));

        let hub = InputHub::new(
            bindings,
            Arc::clone(&self.capabilities),
            Arc::clone(&settings),
            Arc::clone(&input_service),
            Arc::clone(&map),
            Arc::clone(&notifier),
        );

        let sampler = InputSampler::new(
            self.drivers,
            self.left_axis,
            self.right_axis,
            Arc::clone(&input_service),
            Arc::clone(&bus),
        );

        // UI mailboxes and frame servers
        let barrier = Arc::new(ShutdownBarrier::new(self.uis.len()));
        let mut frame_servers = Vec::with_capacity(self.uis.len());
        for ui in self.uis {
            let (tx, rx) = mailbox();
            let tx = Arc::new(Mutex::new(tx));
            subscribe_ui_events(&bus, &tx);
            frame_servers.push(FrameServer::new(
                ui,
                rx,
                Arc::clone(&telemetry),
                Arc::clone(&barrier),
            ));
        }

        let power = Arc::new(Power::new(
            Arc::clone(&bus),
            Arc::clone(&barrier),
            Arc::clone(&self.power_switch),
        ));

        // Load requests published at start, answered synchronously by
        // the storage collaborator.
        {
            let settings = Arc::clone(&settings);
            bus.on_start.subscribe(move |()| settings.request_load());
        }
        {
            let map = Arc::clone(&map);
            let bus_for_map = Arc::clone(&bus);
            bus.on_start.subscribe(move |()| {
                map.lock().expect("input map lock poisoned").reset();
                bus_for_map.load_setting.notify(UserSetting::InputMap);
            });
        }
        {
            let capabilities = Arc::clone(&self.capabilities);
            let input_service = Arc::clone(&input_service);
            let bus_for_inputs = Arc::clone(&bus);
            bus.on_start.subscribe(move |()| {
                if capabilities.contains(DeviceCapabilities::ROTARY_ENCODERS) {
                    bus_for_inputs.load_setting.notify(UserSetting::PulseWidth);
                }
                if input_service.has_axes() {
                    bus_for_inputs
                        .load_setting
                        .notify(UserSetting::AxisCalibration);
                    bus_for_inputs.load_setting.notify(UserSetting::AxisPolarity);
                }
            });
        }
        {
            let capabilities = Arc::clone(&self.capabilities);
            let battery_calibration = Arc::clone(&battery_calibration);
            let bus_for_battery = Arc::clone(&bus);
            bus.on_start.subscribe(move |()| {
                bus_for_battery
                    .load_setting
                    .notify(UserSetting::BatteryAutoCalibration);
                bus_for_battery
                    .load_setting
                    .notify(UserSetting::BatteryCalibrationData);
                capabilities.set(
                    DeviceCapabilities::BATTERY_CALIBRATION_AVAILABLE,
                    battery_calibration.is_calibrated(),
                );
            });
        }

        Ok(Device {
            bus,
            services: Services {
                settings,
                input: input_service,
                map,
                hardware_id,
                battery_calibration,
                telemetry,
            },
            dispatcher,
            notifier,
            capabilities: self.capabilities,
            hid_config: self.hid_config,
            sampler: Some(sampler),
            hub: Some(hub),
            frame_servers,
            power,
            last_battery_level,
            started: false,
        })
    }

    fn build_bindings(&mut self) -> Result<HubBindings, ConfigError> {
        let mut bindings = HubBindings::default();

        // Coded switches trade their bit inputs for their decoded
        // position inputs.
        for spec in &self.coded_switches {
            for bit in &spec.bits {
                if !self.bookings.is_booked(bit.value()) {
                    return Err(ConfigError::UnknownInputNumber("coded switch"));
                }
            }
        }
        for spec in &self.coded_switches {
            for bit in &spec.bits {
                self.bookings.unbook(*bit);
            }
            for position in &spec.positions {
                self.bookings.book(*position);
            }
            let bit_bitmaps: Vec<u64> = spec.bits.iter().map(|b| b.bitmap()).collect();
            let position_bitmaps: Vec<u64> = spec.positions.iter().map(|p| p.bitmap()).collect();
            let mask = !bit_bitmaps.iter().fold(0u64, |acc, b| acc | b);
            let decoded_mask = !position_bitmaps.iter().fold(0u64, |acc, b| acc | b);
            bindings.coded_switches.push(CodedSwitch {
                bits: bit_bitmaps,
                positions: position_bitmaps,
                mask,
                decoded_mask,
            });
        }

        if let Some((up, down)) = self.bite_point_inputs {
            bindings.calibrate_up = up.bitmap();
            bindings.calibrate_down = down.bitmap();
        }
        if let Some((left, right)) = self.clutch_inputs {
            bindings.left_clutch = left.bitmap();
            bindings.right_clutch = right.bitmap();
            bindings.clutch_mask = !(bindings.left_clutch | bindings.right_clutch);
        }
        bindings.cycle_alt = self.cycle_alt_combo;
        bindings.cycle_clutch = self.cycle_clutch_combo;
        bindings.cycle_dpad = self.cycle_dpad_combo;
        bindings.cycle_lock = self.cycle_lock_combo;
        bindings.recalibrate_axes = self.recalibrate_combo;
        bindings.alt_bitmap = self.alt_combo;
        if let Some([up, down, left, right]) = self.dpad_inputs {
            bindings.dpad[crate::hub::DPAD_UP] = up.bitmap();
            bindings.dpad[crate::hub::DPAD_DOWN] = down.bitmap();
            bindings.dpad[crate::hub::DPAD_LEFT] = left.bitmap();
            bindings.dpad[crate::hub::DPAD_RIGHT] = right.bitmap();
            bindings.dpad[crate::hub::DPAD_UP_LEFT] = up.bitmap() | left.bitmap();
            bindings.dpad[crate::hub::DPAD_UP_RIGHT] = up.bitmap() | right.bitmap();
            bindings.dpad[crate::hub::DPAD_DOWN_LEFT] = down.bitmap() | left.bitmap();
            bindings.dpad[crate::hub::DPAD_DOWN_RIGHT] = down.bitmap() | right.bitmap();
            bindings.dpad_neg_mask = bindings.dpad[1..].iter().fold(0u64, |acc, b| acc | b);
            bindings.dpad_mask = !bindings.dpad_neg_mask;
        }
        if let Some((neutral, combination)) = self.neutral {
            bindings.neutral_bitmap = neutral.bitmap();
            bindings.neutral_combo = combination;
        }

        // Every input number referenced by a semantic feature must be
        // assigned to hardware.
        self.abort_on_unknown(bindings.calibrate_up, "bite point (+) calibration")?;
        self.abort_on_unknown(bindings.calibrate_down, "bite point (-) calibration")?;
        self.abort_on_unknown(bindings.cycle_clutch, "cycle clutch working mode")?;
        self.abort_on_unknown(bindings.recalibrate_axes, "recalibrate axis")?;
        self.abort_on_unknown(bindings.neutral_combo, "neutral gear")?;
        for n in 1..9 {
            self.abort_on_unknown(bindings.dpad[n], "dpad input numbers")?;
        }
        self.abort_on_unknown(bindings.cycle_dpad, "cycle DPAD working mode")?;
        self.abort_on_unknown(bindings.alt_bitmap, "ALT buttons")?;
        self.abort_on_unknown(bindings.cycle_alt, "cycle ALT buttons working mode")?;
        self.abort_on_unknown(bindings.cycle_lock, "cycle security lock working mode")?;

        let has_analog = self.capabilities.contains(DeviceCapabilities::CLUTCH_ANALOG);
        let has_button = self.capabilities.contains(DeviceCapabilities::CLUTCH_BUTTON);
        if has_analog {
            if bindings.clutch_mask == u64::MAX {
                return Err(ConfigError::conflict(
                    "there are analog clutch paddles but no clutch paddle input numbers",
                ));
            }
        } else {
            self.abort_on_unknown(bindings.left_clutch, "left clutch paddle")?;
            self.abort_on_unknown(bindings.right_clutch, "right clutch paddle")?;
            if bindings.recalibrate_axes != 0 {
                return Err(ConfigError::conflict(
                    "there are no analog clutch paddles, but axis recalibration inputs were assigned",
                ));
            }
        }
        if !has_analog && !has_button {
            if bindings.calibrate_up != 0 || bindings.calibrate_down != 0 {
                return Err(ConfigError::conflict(
                    "there are no clutch paddles, but bite point inputs were assigned",
                ));
            }
            if bindings.cycle_clutch != 0 {
                return Err(ConfigError::conflict(
                    "there are no clutch paddles, but clutch mode cycle inputs were assigned",
                ));
            }
        }
        if !self.capabilities.contains(DeviceCapabilities::DPAD) && bindings.cycle_dpad != 0 {
            return Err(ConfigError::conflict(
                "there is no DPAD, but DPAD mode cycle inputs were assigned",
            ));
        }
        if !self.capabilities.contains(DeviceCapabilities::ALT) && bindings.cycle_alt != 0 {
            return Err(ConfigError::conflict(
                "there are no ALT buttons, but ALT mode cycle inputs were assigned",
            ));
        }

        Ok(bindings)
    }

    fn abort_on_unknown(&self, bitmap: u64, usage: &'static str) -> Result<(), ConfigError> {
        if bitmap & !self.bookings.bitmap() != 0 {
            return Err(ConfigError::UnknownInputNumber(usage));
        }
        Ok(())
    }

    fn validate_expander_pins(
        &self,
        pins: &[(u8, InputNumber)],
        pin_count: u8,
        hardware: &'static str,
    ) -> Result<(), ConfigError> {
        if pins.is_empty() {
            return Err(ConfigError::EmptyInputNumberSet(hardware));
        }
        for (pin, _) in pins {
            if *pin >= pin_count {
                return Err(ConfigError::conflict(format!(
                    "pin {pin} does not exist on a {hardware}"
                )));
            }
        }
        Ok(())
    }

    fn resolve_i2c_address(
        &mut self,
        address: u8,
        full_address: bool,
        bus: I2cBus,
    ) -> Result<u8, ConfigError> {
        if address >= 0x80 {
            return Err(ConfigError::InvalidI2cAddress(address));
        }
        if !self.i2c_probe_cache.contains_key(&bus.index()) {
            let probed = self.hal.i2c_probe(bus);
            self.i2c_probe_cache.insert(bus.index(), probed);
        }
        let probed = &self.i2c_probe_cache[&bus.index()];
        if full_address {
            if probed.contains(&address) {
                Ok(address)
            } else {
                Err(ConfigError::I2cDeviceNotFound {
                    address,
                    bus: bus.index(),
                })
            }
        } else {
            match deduce_full_address(probed, address) {
                FullAddressMatch::Unique(resolved) => Ok(resolved),
                FullAddressMatch::NotFound => Err(ConfigError::I2cDeviceNotFound {
                    address,
                    bus: bus.index(),
                }),
                FullAddressMatch::Ambiguous => Err(ConfigError::I2cFullAddressUnknown {
                    address,
                    bus: bus.index(),
                }),
            }
        }
    }
}

fn subscribe_ui_events(
    bus: &Arc<EventBus>,
    tx: &Arc<Mutex<futures::channel::mpsc::Sender<UiEvent>>>,
) {
    let sender = Arc::clone(tx);
    bus.on_bite_point.subscribe(move |value| {
        let _ = sender
            .lock()
            .expect("ui mailbox poisoned")
            .try_send(UiEvent::BitePoint(value));
    });
    let sender = Arc::clone(tx);
    bus.on_connected.subscribe(move |()| {
        let _ = sender
            .lock()
            .expect("ui mailbox poisoned")
            .try_send(UiEvent::Connected);
    });
    let sender = Arc::clone(tx);
    bus.on_disconnected.subscribe(move |()| {
        let _ = sender
            .lock()
            .expect("ui mailbox poisoned")
            .try_send(UiEvent::Discovering);
    });
    let sender = Arc::clone(tx);
    bus.on_low_battery.subscribe(move |()| {
        let _ = sender
            .lock()
            .expect("ui mailbox poisoned")
            .try_send(UiEvent::LowBattery);
    });
    let sender = Arc::clone(tx);
    bus.on_shutdown.subscribe(move |()| {
        let _ = sender
            .lock()
            .expect("ui mailbox poisoned")
            .try_send(UiEvent::Shutdown);
    });
}

/// The service bundle exposed to collaborators (storage, tests).
pub struct Services {
    /// Working modes, bite point, security lock.
    pub settings: Arc<Settings>,
    /// Axis calibration/polarity, pulse width, forced updates.
    pub input: Arc<InputService>,
    /// The firmware-to-user input map.
    pub map: Arc<Mutex<InputMap>>,
    /// Factory and custom VID/PID.
    pub hardware_id: Arc<HardwareId>,
    /// Battery calibration data.
    pub battery_calibration: Arc<BatteryCalibration>,
    /// Live telemetry snapshot.
    pub telemetry: Arc<Mutex<TelemetryData>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").finish_non_exhaustive()
    }
}

/// A validated device, ready to start.
pub struct Device {
    bus: Arc<EventBus>,
    services: Services,
    dispatcher: Arc<Dispatcher>,
    notifier: Arc<ConfigNotifier>,
    capabilities: Arc<CapabilityFlags>,
    hid_config: HidConfig,
    sampler: Option<InputSampler>,
    hub: Option<InputHub>,
    frame_servers: Vec<FrameServer>,
    power: Arc<Power>,
    last_battery_level: Arc<AtomicU8>,
    started: bool,
}

impl Device {
    /// The settings event bus.
    #[must_use]
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// The service bundle.
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// The HID report dispatcher, to be wired into the transport's
    /// feature/output callbacks.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Snapshot of the advertised capabilities.
    #[must_use]
    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities.get()
    }

    /// The power-off entry point for external collaborators.
    #[must_use]
    pub fn power(&self) -> Arc<Power> {
        Arc::clone(&self.power)
    }

    /// Ask the host to re-read the configuration report with the next
    /// input report.
    pub fn report_change_in_config(&self) {
        self.notifier.raise();
    }

    /// Begin HID enumeration and publish the one-shot start
    /// notification. Does not spawn the task threads; [`Device::run`]
    /// does both.
    ///
    /// # Errors
    ///
    /// Propagates transport initialization failures.
    pub fn start(&mut self, transport: &Arc<dyn HidTransport>) -> anyhow::Result<()> {
        if self.started {
            return Ok(());
        }
        let hardware_id = &self.services.hardware_id;
        hardware_id.set_supported(transport.supports_custom_hardware_id());
        let (vid, pid) = if hardware_id.supports_custom() {
            self.bus.load_setting.notify(UserSetting::CustomHardwareId);
            hardware_id.effective()
        } else {
            hardware_id.factory()
        };
        transport.begin(&self.hid_config, vid, pid)?;

        {
            let transport = Arc::clone(transport);
            let last_level = Arc::clone(&self.last_battery_level);
            self.bus.on_battery_level.subscribe(move |level| {
                let clamped = u8::try_from(level.clamp(0, 100)).unwrap_or(0);
                last_level.store(clamped, Ordering::Relaxed);
                transport.report_battery_level(clamped);
            });
        }

        self.bus.on_start.notify(());
        // Force one emission on the first sampling cycle so the host
        // sees the initial state.
        self.services.input.update();
        self.started = true;
        info!(
            "device started as {:04x}:{:04x} ({})",
            vid, pid, self.hid_config.device_name
        );
        Ok(())
    }

    /// Drive one raw input event through the hub pipeline. Intended
    /// for tests and custom schedulers; the spawned hub task does the
    /// same with events from the decoupling queue.
    pub fn inject_raw_input(&mut self, event: RawInputEvent, transport: &dyn HidTransport) {
        if let Some(hub) = self.hub.as_mut() {
            hub.process(event, transport);
        }
    }

    /// Run one sampling cycle. Intended for tests and custom
    /// schedulers.
    pub fn poll_inputs_once(&mut self, previous: &RawInputEvent) -> Option<(RawInputEvent, bool)> {
        self.sampler.as_mut().map(|sampler| sampler.poll(previous))
    }

    /// Start the device and spawn one thread per task: input sampling,
    /// the hub, and one frame server per UI instance.
    ///
    /// # Errors
    ///
    /// Propagates transport initialization and thread spawn failures.
    pub fn run(mut self, transport: Arc<dyn HidTransport>) -> anyhow::Result<RunningDevice> {
        self.start(&transport)?;

        let mut handles = Vec::new();
        let (tx, rx) = decoupling_queue();

        if let Some(sampler) = self.sampler.take() {
            handles.push(
                thread::Builder::new()
                    .name("PolledInputs".into())
                    .spawn(move || block_on(sampler.run(tx)))?,
            );
        }
        if let Some(hub) = self.hub.take() {
            let transport = Arc::clone(&transport);
            handles.push(
                thread::Builder::new()
                    .name("hub".into())
                    .spawn(move || block_on(hub.run(rx, transport)))?,
            );
        }
        for (index, server) in self.frame_servers.drain(..).enumerate() {
            handles.push(
                thread::Builder::new()
                    .name(format!("frameserver{index}"))
                    .spawn(move || block_on(server.run()))?,
            );
        }

        Ok(RunningDevice {
            device: self,
            handles,
        })
    }
}

/// A started device and its task threads.
pub struct RunningDevice {
    device: Device,
    handles: Vec<thread::JoinHandle<anyhow::Result<()>>>,
}

impl RunningDevice {
    /// Access to the device context.
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Wait for every task to terminate. Tasks only terminate on
    /// shutdown, so this blocks for the lifetime of the device.
    pub fn join(self) {
        for handle in self.handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(error)) => log::error!("task failed: {error:#}"),
                Err(_) => log::error!("task panicked"),
            }
        }
    }
}
