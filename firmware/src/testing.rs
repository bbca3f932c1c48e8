//! Fakes for host-side testing.
//!
//! No firmware hardware is reachable from a test runner, so the HAL,
//! the transport and the input hardware all have scriptable stand-ins
//! here. They are part of the public surface on purpose: downstream
//! device definitions test their configuration with the same fakes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::drivers::{AnalogInput, AxisReading, DigitalInput};
use crate::gpio::Gpio;
use crate::hal::{Hal, I2cBus, I2cFailure};
use crate::hid::InputReport;
use crate::pixels::PixelControl;
use crate::transport::{HidConfig, HidTransport};
use crate::types::PixelGroup;

// Pin ranges of the simulated MCU.
const VALID_PIN_LIMIT: u8 = 100;
const OUTPUT_PIN_LIMIT: u8 = 80;
const RTC_PIN_FIRST: u8 = 40;
const RTC_PIN_LAST: u8 = 49;

type IsrHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct FakeHalState {
    levels: HashMap<u8, bool>,
    adc: HashMap<u8, u16>,
    isr: HashMap<u8, Vec<IsrHandler>>,
    i2c_devices: HashMap<u8, HashSet<u8>>,
    i2c_read_data: HashMap<(u8, u8), Vec<u8>>,
    i2c_failing: HashSet<(u8, u8)>,
    i2c_writes: Vec<(u8, u8, Vec<u8>)>,
    i2c_speed: HashMap<u8, u8>,
}

/// A scriptable HAL simulating a small MCU: pins 0..100 exist, pins
/// 80..100 are input-only, pins 40..=49 are RTC-capable.
#[derive(Default)]
pub struct FakeHal {
    state: Mutex<FakeHalState>,
}

impl FakeHal {
    /// Create a fresh simulated MCU.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive the level seen on an input pin.
    pub fn set_input_level(&self, pin: Gpio, level: bool) {
        self.state
            .lock()
            .unwrap()
            .levels
            .insert(pin.pin(), level);
    }

    /// Drive the raw ADC reading of a pin.
    pub fn set_adc_reading(&self, pin: Gpio, reading: u16) {
        self.state.lock().unwrap().adc.insert(pin.pin(), reading);
    }

    /// Fire the edge interrupt handlers attached to a pin.
    pub fn trigger_edge(&self, pin: Gpio) {
        let handlers: Vec<IsrHandler> = self
            .state
            .lock()
            .unwrap()
            .isr
            .get(&pin.pin())
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler();
        }
    }

    /// Make a device respond on an I2C bus.
    pub fn add_i2c_device(&self, bus: I2cBus, address7: u8) {
        self.state
            .lock()
            .unwrap()
            .i2c_devices
            .entry(bus.index())
            .or_default()
            .insert(address7);
    }

    /// Script the bytes a device returns on reads.
    pub fn set_i2c_read_data(&self, bus: I2cBus, address7: u8, data: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .i2c_read_data
            .insert((bus.index(), address7), data);
    }

    /// Make every transaction with a device fail (or succeed again).
    pub fn fail_i2c(&self, bus: I2cBus, address7: u8, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.i2c_failing.insert((bus.index(), address7));
        } else {
            state.i2c_failing.remove(&(bus.index(), address7));
        }
    }

    /// All bytes written to a device so far, one entry per transaction.
    #[must_use]
    pub fn i2c_writes(&self, bus: I2cBus, address7: u8) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .i2c_writes
            .iter()
            .filter(|(b, a, _)| *b == bus.index() && *a == address7)
            .map(|(_, _, bytes)| bytes.clone())
            .collect()
    }

    /// The negotiated bus speed multiplier.
    #[must_use]
    pub fn i2c_speed(&self, bus: I2cBus) -> u8 {
        self.state
            .lock()
            .unwrap()
            .i2c_speed
            .get(&bus.index())
            .copied()
            .unwrap_or(0)
    }
}

impl Hal for FakeHal {
    fn is_valid_pin(&self, pin: Gpio) -> bool {
        pin.pin() < VALID_PIN_LIMIT
    }

    fn is_output_capable(&self, pin: Gpio) -> bool {
        pin.pin() < OUTPUT_PIN_LIMIT
    }

    fn is_adc_capable(&self, pin: Gpio) -> bool {
        self.is_valid_pin(pin)
    }

    fn is_rtc_capable(&self, pin: Gpio) -> bool {
        (RTC_PIN_FIRST..=RTC_PIN_LAST).contains(&pin.pin())
    }

    fn configure_input(&self, pin: Gpio, pull_down: bool, _pull_up: bool) {
        // A pulled-down input idles low, everything else idles high.
        self.set_input_level(pin, !pull_down);
    }

    fn configure_output(&self, pin: Gpio, initial_level: bool, _open_drain: bool) {
        self.set_input_level(pin, initial_level);
    }

    fn set_level(&self, pin: Gpio, level: bool) {
        self.set_input_level(pin, level);
    }

    fn get_level(&self, pin: Gpio) -> bool {
        self.state
            .lock()
            .unwrap()
            .levels
            .get(&pin.pin())
            .copied()
            .unwrap_or(true)
    }

    fn adc_read(&self, pin: Gpio) -> u16 {
        self.state
            .lock()
            .unwrap()
            .adc
            .get(&pin.pin())
            .copied()
            .unwrap_or(0)
    }

    fn enable_isr(&self, pin: Gpio, handler: Arc<dyn Fn() + Send + Sync>) {
        self.state
            .lock()
            .unwrap()
            .isr
            .entry(pin.pin())
            .or_default()
            .push(handler);
    }

    fn i2c_probe(&self, bus: I2cBus) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let mut addresses: Vec<u8> = state
            .i2c_devices
            .get(&bus.index())
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        addresses.sort_unstable();
        addresses
    }

    fn i2c_require_speed(&self, bus: I2cBus, multiplier: u8) {
        let mut state = self.state.lock().unwrap();
        let current = state.i2c_speed.entry(bus.index()).or_insert(0);
        *current = (*current).max(multiplier);
    }

    fn i2c_write(&self, bus: I2cBus, address7: u8, bytes: &[u8]) -> Result<(), I2cFailure> {
        let mut state = self.state.lock().unwrap();
        if state.i2c_failing.contains(&(bus.index(), address7)) {
            return Err(I2cFailure);
        }
        state.i2c_writes.push((bus.index(), address7, bytes.to_vec()));
        Ok(())
    }

    fn i2c_write_read(
        &self,
        bus: I2cBus,
        address7: u8,
        command: &[u8],
        read_into: &mut [u8],
    ) -> Result<(), I2cFailure> {
        let mut state = self.state.lock().unwrap();
        if state.i2c_failing.contains(&(bus.index(), address7)) {
            return Err(I2cFailure);
        }
        if !command.is_empty() {
            state
                .i2c_writes
                .push((bus.index(), address7, command.to_vec()));
        }
        let data = state
            .i2c_read_data
            .get(&(bus.index(), address7))
            .cloned()
            .unwrap_or_default();
        for (slot, byte) in read_into.iter_mut().zip(data.iter().chain(std::iter::repeat(&0))) {
            *slot = *byte;
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeInputState {
    bitmap: AtomicU64,
    left_axis: AtomicU8,
    right_axis: AtomicU8,
}

/// Shared handle driving a fake input source from a test.
#[derive(Clone, Default)]
pub struct FakeInputHandle {
    state: Arc<FakeInputState>,
}

impl FakeInputHandle {
    /// Create an idle fake input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a button press.
    pub fn press(&self, number: u8) {
        self.state
            .bitmap
            .fetch_or(1u64 << number, Ordering::Relaxed);
    }

    /// Simulate a button release.
    pub fn release(&self, number: u8) {
        self.state
            .bitmap
            .fetch_and(!(1u64 << number), Ordering::Relaxed);
    }

    /// Move the left analog axis.
    pub fn set_left_axis(&self, value: u8) {
        self.state.left_axis.store(value, Ordering::Relaxed);
    }

    /// Move the right analog axis.
    pub fn set_right_axis(&self, value: u8) {
        self.state.right_axis.store(value, Ordering::Relaxed);
    }

    /// Release everything.
    pub fn clear(&self) {
        self.state.bitmap.store(0, Ordering::Relaxed);
        self.state.left_axis.store(0, Ordering::Relaxed);
        self.state.right_axis.store(0, Ordering::Relaxed);
    }
}

/// A digital input driver fed from a [`FakeInputHandle`]. Owns every
/// firmware input bit.
pub struct FakeDigitalInput {
    handle: FakeInputHandle,
}

impl FakeDigitalInput {
    /// Wrap a handle.
    #[must_use]
    pub fn new(handle: &FakeInputHandle) -> Self {
        Self {
            handle: handle.clone(),
        }
    }
}

impl DigitalInput for FakeDigitalInput {
    fn mask(&self) -> u64 {
        0
    }

    fn read(&mut self, _previous: u64) -> u64 {
        self.handle.state.bitmap.load(Ordering::Relaxed)
    }
}

/// An analog axis fed from a [`FakeInputHandle`].
pub struct FakeAxis {
    handle: FakeInputHandle,
    left: bool,
}

impl FakeAxis {
    /// Wrap a handle; `left` selects which axis this is.
    #[must_use]
    pub fn new(handle: &FakeInputHandle, left: bool) -> Self {
        Self {
            handle: handle.clone(),
            left,
        }
    }
}

impl AnalogInput for FakeAxis {
    fn read(&mut self) -> AxisReading {
        let value = if self.left {
            self.handle.state.left_axis.load(Ordering::Relaxed)
        } else {
            self.handle.state.right_axis.load(Ordering::Relaxed)
        };
        AxisReading {
            value,
            autocalibrated: false,
        }
    }
}

/// A transport that records everything the core sends.
pub struct FakeTransport {
    begin_args: Mutex<Option<(HidConfig, u16, u16)>>,
    inputs: Mutex<Vec<(InputReport, bool)>>,
    battery_levels: Mutex<Vec<u8>>,
    resets: AtomicUsize,
    connected: AtomicBool,
    supports_custom: AtomicBool,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            begin_args: Mutex::new(None),
            inputs: Mutex::new(Vec::new()),
            battery_levels: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
            supports_custom: AtomicBool::new(true),
        }
    }
}

impl FakeTransport {
    /// Create a BLE-like transport (custom hardware ID supported).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a USB-like transport (no custom hardware ID).
    #[must_use]
    pub fn usb() -> Self {
        let transport = Self::default();
        transport.supports_custom.store(false, Ordering::Relaxed);
        transport
    }

    /// The identity passed to [`HidTransport::begin`], if any.
    #[must_use]
    pub fn begin_args(&self) -> Option<(HidConfig, u16, u16)> {
        self.begin_args.lock().unwrap().clone()
    }

    /// The most recent input report and its notification flag.
    #[must_use]
    pub fn last_input(&self) -> Option<(InputReport, bool)> {
        self.inputs.lock().unwrap().last().copied()
    }

    /// Every input report sent so far.
    #[must_use]
    pub fn inputs(&self) -> Vec<(InputReport, bool)> {
        self.inputs.lock().unwrap().clone()
    }

    /// Number of HID state resets.
    #[must_use]
    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }

    /// Battery levels reported so far.
    #[must_use]
    pub fn battery_levels(&self) -> Vec<u8> {
        self.battery_levels.lock().unwrap().clone()
    }

    /// Simulate a host connection change.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

impl HidTransport for FakeTransport {
    fn begin(&self, config: &HidConfig, vid: u16, pid: u16) -> anyhow::Result<()> {
        *self.begin_args.lock().unwrap() = Some((config.clone(), vid, pid));
        Ok(())
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    fn report_input(&self, report: &InputReport, notify_config_change: bool) {
        self.inputs
            .lock()
            .unwrap()
            .push((*report, notify_config_change));
    }

    fn report_battery_level(&self, level: u8) {
        self.battery_levels.lock().unwrap().push(level);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn supports_custom_hardware_id(&self) -> bool {
        self.supports_custom.load(Ordering::Relaxed)
    }
}

/// A pixel sink that records every command.
#[derive(Default)]
pub struct FakePixels {
    counts: [u8; 3],
    sets: Mutex<Vec<(PixelGroup, u8, u8, u8, u8)>>,
    shows: AtomicUsize,
    resets: AtomicUsize,
}

impl FakePixels {
    /// Create with one pixel count per group.
    #[must_use]
    pub fn new(telemetry: u8, buttons: u8, individual: u8) -> Self {
        Self {
            counts: [telemetry, buttons, individual],
            ..Self::default()
        }
    }

    /// Every `(group, index, r, g, b)` command so far.
    #[must_use]
    pub fn sets(&self) -> Vec<(PixelGroup, u8, u8, u8, u8)> {
        self.sets.lock().unwrap().clone()
    }

    /// Number of show commands.
    #[must_use]
    pub fn show_count(&self) -> usize {
        self.shows.load(Ordering::Relaxed)
    }

    /// Number of reset commands.
    #[must_use]
    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }
}

impl PixelControl for FakePixels {
    fn count(&self, group: PixelGroup) -> u8 {
        self.counts[group as usize]
    }

    fn set(&self, group: PixelGroup, index: u8, red: u8, green: u8, blue: u8) {
        self.sets
            .lock()
            .unwrap()
            .push((group, index, red, green, blue));
    }

    fn show(&self) {
        self.shows.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }
}
