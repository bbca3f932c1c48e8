//! Input polling: the sampler task and the shared input service.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use embassy_time::{Duration, Timer};
use futures::channel::mpsc;
use log::{debug, warn};

use crate::drivers::{AnalogInput, AxisCalibration, DigitalInput};
use crate::events::EventBus;
use crate::types::{PulseWidthMultiplier, RawInputEvent, UserSetting, CLUTCH_FULL_VALUE};

/// Debounce time for polled switches, in milliseconds.
pub const DEBOUNCE_MS: u64 = 30;

/// Fixed period of the input sampling task.
pub const SAMPLING_PERIOD: Duration = Duration::from_millis(DEBOUNCE_MS * 2);

/// Capacity of the decoupling queue between the sampler and the hub.
pub const DECOUPLING_QUEUE_CAPACITY: usize = 64;

/// Shared control surface over the input hardware: axis calibration
/// and polarity, the rotary pulse width multiplier, and the forced
/// update flag.
pub struct InputService {
    bus: Arc<EventBus>,
    axes: Option<(Arc<AxisCalibration>, Arc<AxisCalibration>)>,
    reverse_left: AtomicBool,
    reverse_right: AtomicBool,
    pulse_multiplier: Arc<AtomicU8>,
    force_update: AtomicBool,
}

impl InputService {
    pub(crate) fn new(
        bus: Arc<EventBus>,
        axes: Option<(Arc<AxisCalibration>, Arc<AxisCalibration>)>,
        pulse_multiplier: Arc<AtomicU8>,
    ) -> Self {
        Self {
            bus,
            axes,
            reverse_left: AtomicBool::new(false),
            reverse_right: AtomicBool::new(false),
            pulse_multiplier,
            force_update: AtomicBool::new(false),
        }
    }

    /// Force auto-calibration of both analog axes from scratch.
    pub fn recalibrate_axes(&self) {
        if let Some((left, right)) = &self.axes {
            left.reset();
            right.reset();
        }
    }

    /// Toggle the polarity of the left axis. Saved without delay.
    pub fn reverse_left_axis(&self) {
        self.reverse_left.fetch_xor(true, Ordering::Relaxed);
        self.bus.save_setting.notify(UserSetting::AxisPolarity);
    }

    /// Toggle the polarity of the right axis. Saved without delay.
    pub fn reverse_right_axis(&self) {
        self.reverse_right.fetch_xor(true, Ordering::Relaxed);
        self.bus.save_setting.notify(UserSetting::AxisPolarity);
    }

    /// Current axis polarity as `(left_reversed, right_reversed)`.
    #[must_use]
    pub fn axis_polarity(&self) -> (bool, bool) {
        (
            self.reverse_left.load(Ordering::Relaxed),
            self.reverse_right.load(Ordering::Relaxed),
        )
    }

    /// Overwrite the axis polarity.
    pub fn set_axis_polarity(&self, left_reversed: bool, right_reversed: bool, save: bool) {
        self.reverse_left.store(left_reversed, Ordering::Relaxed);
        self.reverse_right.store(right_reversed, Ordering::Relaxed);
        if save {
            self.bus.save_setting.notify(UserSetting::AxisPolarity);
        }
    }

    /// Current calibration as `(min_left, max_left, min_right,
    /// max_right)`, or `None` without analog paddles.
    #[must_use]
    pub fn axis_calibration(&self) -> Option<(i32, i32, i32, i32)> {
        self.axes.as_ref().map(|(left, right)| {
            let (min_left, max_left) = left.get();
            let (min_right, max_right) = right.get();
            (min_left, max_left, min_right, max_right)
        })
    }

    /// Overwrite the calibration of both axes.
    pub fn set_axis_calibration(
        &self,
        min_left: i32,
        max_left: i32,
        min_right: i32,
        max_right: i32,
        save: bool,
    ) {
        if let Some((left, right)) = &self.axes {
            left.set(min_left, max_left);
            right.set(min_right, max_right);
            if save {
                self.bus.save_setting.notify(UserSetting::AxisCalibration);
            }
        }
    }

    /// Set the pulse width multiplier for all rotary encoders.
    pub fn set_pulse_width_multiplier(&self, multiplier: PulseWidthMultiplier, save: bool) {
        self.pulse_multiplier
            .store(multiplier as u8, Ordering::Relaxed);
        if save {
            self.bus.save_setting.notify(UserSetting::PulseWidth);
        }
    }

    /// Current pulse width multiplier.
    #[must_use]
    pub fn pulse_width_multiplier(&self) -> PulseWidthMultiplier {
        PulseWidthMultiplier::try_from(self.pulse_multiplier.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    /// Repeat the last input event on the next sampling cycle even if
    /// nothing changed.
    pub fn update(&self) {
        self.force_update.store(true, Ordering::Relaxed);
    }

    fn take_force_update(&self) -> bool {
        self.force_update.swap(false, Ordering::Relaxed)
    }

    pub(crate) fn has_axes(&self) -> bool {
        self.axes.is_some()
    }
}

/// The input sampling task.
///
/// Drives every registered driver on a fixed period, merges their
/// bitmaps, reads the two analog axes, and pushes a raw event into the
/// decoupling queue whenever anything changed.
pub struct InputSampler {
    drivers: Vec<Box<dyn DigitalInput>>,
    left_axis: Option<Box<dyn AnalogInput>>,
    right_axis: Option<Box<dyn AnalogInput>>,
    service: Arc<InputService>,
    bus: Arc<EventBus>,
}

impl InputSampler {
    pub(crate) fn new(
        drivers: Vec<Box<dyn DigitalInput>>,
        left_axis: Option<Box<dyn AnalogInput>>,
        right_axis: Option<Box<dyn AnalogInput>>,
        service: Arc<InputService>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            drivers,
            left_axis,
            right_axis,
            service,
            bus,
        }
    }

    /// Run one sampling cycle. Returns the new state and whether it
    /// must be emitted downstream.
    pub fn poll(&mut self, previous: &RawInputEvent) -> (RawInputEvent, bool) {
        let mut current = RawInputEvent {
            bitmap: 0,
            changes: 0,
            left_axis: previous.left_axis,
            right_axis: previous.right_axis,
        };
        for driver in &mut self.drivers {
            current.bitmap |= driver.read(previous.bitmap);
        }
        current.changes = current.bitmap ^ previous.bitmap;
        let mut changed = self.service.take_force_update() || current.changes != 0;

        if let (Some(left), Some(right)) = (self.left_axis.as_mut(), self.right_axis.as_mut()) {
            let (reverse_left, reverse_right) = self.service.axis_polarity();

            let left_reading = left.read();
            current.left_axis = if reverse_left {
                CLUTCH_FULL_VALUE - left_reading.value
            } else {
                left_reading.value
            };

            let right_reading = right.read();
            current.right_axis = if reverse_right {
                CLUTCH_FULL_VALUE - right_reading.value
            } else {
                right_reading.value
            };

            if left_reading.autocalibrated || right_reading.autocalibrated {
                self.bus.save_setting.notify(UserSetting::AxisCalibration);
            }

            changed = changed
                || current.left_axis != previous.left_axis
                || current.right_axis != previous.right_axis;
        }

        (current, changed)
    }

    /// Task body: poll forever at [`SAMPLING_PERIOD`].
    ///
    /// # Errors
    ///
    /// Fails only when the decoupling queue is closed on the consumer
    /// side.
    pub async fn run(mut self, mut tx: mpsc::Sender<RawInputEvent>) -> anyhow::Result<()> {
        let mut previous = RawInputEvent::default();
        self.service.update();
        debug!("input sampling task started");
        loop {
            Timer::after(SAMPLING_PERIOD).await;
            let (current, changed) = self.poll(&previous);
            if !changed {
                continue;
            }
            previous = current;
            if let Err(error) = tx.try_send(current) {
                if error.is_disconnected() {
                    anyhow::bail!("decoupling queue closed");
                }
                // Queue full: the newest event is dropped rather than
                // stalling the sampler.
                warn!("decoupling queue full, input event dropped");
            }
        }
    }
}

/// Create the decoupling queue between the sampler and the hub.
#[must_use]
pub fn decoupling_queue() -> (
    mpsc::Sender<RawInputEvent>,
    mpsc::Receiver<RawInputEvent>,
) {
    mpsc::channel(DECOUPLING_QUEUE_CAPACITY)
}
