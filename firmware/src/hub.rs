//! The input hub: semantic treatment of the combined input state.
//!
//! Consumes raw events from the decoupling queue and emits HID input
//! reports. Stateless except for the user settings it holds and the
//! neutral-gear engagement flag.

use std::sync::{Arc, Mutex};

use futures::channel::mpsc;
use futures::StreamExt;
use log::debug;

use crate::hid::{ConfigNotifier, InputReport};
use crate::inputmap::InputMap;
use crate::inputs::InputService;
use crate::settings::Settings;
use crate::transport::HidTransport;
use crate::types::{
    AltButtonsWorkingMode, CapabilityFlags, ClutchWorkingMode, DPadWorkingMode,
    DeviceCapabilities, RawInputEvent, CLUTCH_1_4_VALUE, CLUTCH_3_4_VALUE, CLUTCH_DEFAULT_VALUE,
    CLUTCH_FULL_VALUE, CLUTCH_NONE_VALUE,
};

pub(crate) const DPAD_CENTERED: u8 = 0;
pub(crate) const DPAD_UP: usize = 1;
pub(crate) const DPAD_UP_RIGHT: usize = 2;
pub(crate) const DPAD_RIGHT: usize = 3;
pub(crate) const DPAD_DOWN_RIGHT: usize = 4;
pub(crate) const DPAD_DOWN: usize = 5;
pub(crate) const DPAD_DOWN_LEFT: usize = 6;
pub(crate) const DPAD_LEFT: usize = 7;
pub(crate) const DPAD_UP_LEFT: usize = 8;

/// A decoded rotary switch operating on already-scanned input bits.
#[derive(Debug, Clone)]
pub(crate) struct CodedSwitch {
    /// Bitmaps of the bit inputs, least significant first (3 to 5 of
    /// them).
    pub bits: Vec<u64>,
    /// Bitmaps of the one-hot position inputs (8, 16 or 32 of them).
    pub positions: Vec<u64>,
    /// 1s outside the bit inputs.
    pub mask: u64,
    /// 1s outside the position inputs.
    pub decoded_mask: u64,
}

/// Semantic bindings computed at configuration time.
#[derive(Debug, Clone)]
pub(crate) struct HubBindings {
    pub alt_bitmap: u64,
    pub calibrate_up: u64,
    pub calibrate_down: u64,
    pub left_clutch: u64,
    pub right_clutch: u64,
    /// 1s outside both clutch inputs; all ones when no clutch inputs
    /// were assigned.
    pub clutch_mask: u64,
    pub cycle_alt: u64,
    pub cycle_clutch: u64,
    pub cycle_dpad: u64,
    pub cycle_lock: u64,
    pub recalibrate_axes: u64,
    /// Bitmaps per POV value 1..=8; entry 0 is unused.
    pub dpad: [u64; 9],
    /// 1s over every DPAD input.
    pub dpad_neg_mask: u64,
    /// 1s outside every DPAD input.
    pub dpad_mask: u64,
    pub neutral_bitmap: u64,
    pub neutral_combo: u64,
    pub coded_switches: Vec<CodedSwitch>,
}

impl Default for HubBindings {
    fn default() -> Self {
        Self {
            alt_bitmap: 0,
            calibrate_up: 0,
            calibrate_down: 0,
            left_clutch: 0,
            right_clutch: 0,
            clutch_mask: u64::MAX,
            cycle_alt: 0,
            cycle_clutch: 0,
            cycle_dpad: 0,
            cycle_lock: 0,
            recalibrate_axes: 0,
            dpad: [0; 9],
            dpad_neg_mask: 0,
            dpad_mask: u64::MAX,
            neutral_bitmap: 0,
            neutral_combo: 0,
            coded_switches: Vec::new(),
        }
    }
}

fn paddle_is_pressed(value: u8) -> bool {
    value > CLUTCH_3_4_VALUE
}

fn paddle_is_released(value: u8) -> bool {
    value == CLUTCH_NONE_VALUE
}

/// The input hub task state.
pub struct InputHub {
    bindings: HubBindings,
    capabilities: Arc<CapabilityFlags>,
    settings: Arc<Settings>,
    input: Arc<InputService>,
    map: Arc<Mutex<InputMap>>,
    notifier: Arc<ConfigNotifier>,
    neutral_engaged: bool,
}

impl InputHub {
    pub(crate) fn new(
        bindings: HubBindings,
        capabilities: Arc<CapabilityFlags>,
        settings: Arc<Settings>,
        input: Arc<InputService>,
        map: Arc<Mutex<InputMap>>,
        notifier: Arc<ConfigNotifier>,
    ) -> Self {
        Self {
            bindings,
            capabilities,
            settings,
            input,
            map,
            notifier,
            neutral_engaged: false,
        }
    }

    /// Run the full pipeline for one raw event and emit the resulting
    /// HID input report through the transport.
    pub fn process(&mut self, mut event: RawInputEvent, transport: &dyn HidTransport) {
        self.decode_coded_switches(&mut event);

        // User commands never translate into a HID report.
        if self.run_command(event.bitmap, event.changes) {
            transport.reset();
            return;
        }

        self.axis_button_filter(&mut event);
        self.bite_point_calibration_filter(&mut event);

        let alt_engaged = self.alt_request_filter(&mut event);

        let (left_axis, right_axis, clutch_axis) =
            self.combined_axis_filter(event.left_axis, event.right_axis);

        let pov = if alt_engaged {
            DPAD_CENTERED
        } else {
            self.dpad_filter(&mut event.bitmap)
        };

        self.neutral_gear_filter(&mut event.bitmap);

        let (low, high) = self
            .map
            .lock()
            .expect("input map lock poisoned")
            .map(alt_engaged, event.bitmap);

        let report = InputReport {
            low,
            high,
            pov,
            left_axis,
            right_axis,
            clutch_axis,
        };
        transport.report_input(&report, self.notifier.take());
    }

    /// Task body: consume the decoupling queue until it closes.
    ///
    /// # Errors
    ///
    /// Infallible in practice; typed to match the other task bodies.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<RawInputEvent>,
        transport: Arc<dyn HidTransport>,
    ) -> anyhow::Result<()> {
        debug!("input hub task started");
        while let Some(event) = rx.next().await {
            self.process(event, transport.as_ref());
        }
        Ok(())
    }

    /// Replace each coded switch's bit inputs with the one-hot decoded
    /// position input.
    fn decode_coded_switches(&self, event: &mut RawInputEvent) {
        for switch in &self.bindings.coded_switches {
            let mut position = 0usize;
            for (i, bit) in switch.bits.iter().enumerate() {
                if event.bitmap & bit != 0 {
                    position |= 1 << i;
                }
            }
            let decoded = switch.positions[position];
            let bits_changed = event.changes & !switch.mask != 0;
            event.bitmap &= switch.mask & switch.decoded_mask;
            event.bitmap |= decoded;
            event.changes &= switch.mask & switch.decoded_mask;
            if bits_changed {
                event.changes |= decoded;
            }
        }
    }

    /// Execute a user command when a cycle combination is pressed on
    /// its own. Returns true when a command fired.
    fn run_command(&self, bitmap: u64, changes: u64) -> bool {
        let b = &self.bindings;
        if b.cycle_alt != 0 && changes & b.cycle_alt != 0 && bitmap == b.cycle_alt {
            self.settings.cycle_alt_buttons_working_mode();
            return true;
        }
        if b.cycle_clutch != 0 && changes & b.cycle_clutch != 0 && bitmap == b.cycle_clutch {
            self.settings.cycle_clutch_working_mode();
            return true;
        }
        if b.cycle_dpad != 0 && changes & b.cycle_dpad != 0 && bitmap == b.cycle_dpad {
            self.settings.cycle_dpad_working_mode();
            return true;
        }
        if b.recalibrate_axes != 0
            && changes & b.recalibrate_axes != 0
            && bitmap == b.recalibrate_axes
        {
            self.input.recalibrate_axes();
            return true;
        }
        if b.cycle_lock != 0 && changes & b.cycle_lock != 0 && bitmap == b.cycle_lock {
            self.settings.cycle_security_lock();
            return true;
        }
        false
    }

    /// Map axis positions to clutch buttons or clutch buttons to axis
    /// positions, depending on the working mode and the available
    /// hardware.
    fn axis_button_filter(&self, event: &mut RawInputEvent) {
        let b = &self.bindings;
        if self.capabilities.contains(DeviceCapabilities::CLUTCH_ANALOG)
            && self.settings.clutch_working_mode() == ClutchWorkingMode::Button
        {
            // Analog positions become button state, with hysteresis.
            if event.left_axis >= CLUTCH_3_4_VALUE {
                event.bitmap |= b.left_clutch;
                event.changes |= b.left_clutch;
            } else if event.left_axis <= CLUTCH_1_4_VALUE {
                event.bitmap &= !b.left_clutch;
                event.changes |= b.left_clutch;
            }
            if event.right_axis >= CLUTCH_3_4_VALUE {
                event.bitmap |= b.right_clutch;
                event.changes |= b.right_clutch;
            } else if event.right_axis <= CLUTCH_1_4_VALUE {
                event.bitmap &= !b.right_clutch;
                event.changes |= b.right_clutch;
            }
            event.left_axis = CLUTCH_NONE_VALUE;
            event.right_axis = CLUTCH_NONE_VALUE;
            return;
        }

        if self.capabilities.contains(DeviceCapabilities::CLUTCH_BUTTON) {
            let is_axis_mode = matches!(
                self.settings.clutch_working_mode(),
                ClutchWorkingMode::Axis
                    | ClutchWorkingMode::Clutch
                    | ClutchWorkingMode::LaunchControlMasterLeft
                    | ClutchWorkingMode::LaunchControlMasterRight
            );
            if is_axis_mode {
                // Button state becomes axis positions.
                event.left_axis = if event.bitmap & b.left_clutch != 0 {
                    CLUTCH_FULL_VALUE
                } else {
                    CLUTCH_NONE_VALUE
                };
                event.right_axis = if event.bitmap & b.right_clutch != 0 {
                    CLUTCH_FULL_VALUE
                } else {
                    CLUTCH_NONE_VALUE
                };
                event.bitmap &= b.clutch_mask;
                event.changes &= b.clutch_mask;
            }
        }
    }

    /// While exactly one clutch paddle is pressed, the bite point
    /// inputs adjust the bite point and are consumed.
    fn bite_point_calibration_filter(&self, event: &mut RawInputEvent) {
        let calibrating = match self.settings.clutch_working_mode() {
            ClutchWorkingMode::Clutch => {
                (paddle_is_pressed(event.left_axis) && paddle_is_released(event.right_axis))
                    || (paddle_is_released(event.left_axis)
                        && paddle_is_pressed(event.right_axis))
            }
            ClutchWorkingMode::LaunchControlMasterLeft => {
                paddle_is_released(event.left_axis) && paddle_is_pressed(event.right_axis)
            }
            ClutchWorkingMode::LaunchControlMasterRight => {
                paddle_is_pressed(event.left_axis) && paddle_is_released(event.right_axis)
            }
            // Disabled in the remaining modes
            _ => false,
        };
        if !calibrating {
            return;
        }
        let b = &self.bindings;
        if b.calibrate_up & event.changes != 0 && b.calibrate_up & event.bitmap != 0 {
            self.settings.increase_bite_point();
        } else if b.calibrate_down & event.changes != 0 && b.calibrate_down & event.bitmap != 0 {
            self.settings.decrease_bite_point();
        }
        event.bitmap &= !(b.calibrate_up | b.calibrate_down);
        event.changes &= !(b.calibrate_up | b.calibrate_down);
    }

    /// Detect an ALT mode request and consume the inputs expressing it.
    fn alt_request_filter(&self, event: &mut RawInputEvent) -> bool {
        let b = &self.bindings;
        let mut requested = false;
        if self.settings.alt_buttons_working_mode() == AltButtonsWorkingMode::Alt {
            requested = event.bitmap & b.alt_bitmap != 0;
            event.bitmap &= !b.alt_bitmap;
        }
        if self.settings.clutch_working_mode() == ClutchWorkingMode::Alt {
            requested = requested
                || event.left_axis >= CLUTCH_DEFAULT_VALUE
                || event.right_axis >= CLUTCH_DEFAULT_VALUE
                || event.bitmap & b.left_clutch != 0
                || event.bitmap & b.right_clutch != 0;
            event.left_axis = CLUTCH_NONE_VALUE;
            event.right_axis = CLUTCH_NONE_VALUE;
            event.bitmap &= b.clutch_mask;
        }
        requested
    }

    /// Combine both paddle positions into the clutch axis, when the
    /// working mode calls for it.
    fn combined_axis_filter(&self, left: u8, right: u8) -> (u8, u8, u8) {
        match self.settings.clutch_working_mode() {
            ClutchWorkingMode::Clutch => {
                let bite = u32::from(self.settings.bite_point());
                let (master, slave) = if left > right {
                    (u32::from(left), u32::from(right))
                } else {
                    (u32::from(right), u32::from(left))
                };
                let clutch = (master * bite + slave * (255 - bite)) / 255;
                (
                    CLUTCH_NONE_VALUE,
                    CLUTCH_NONE_VALUE,
                    u8::try_from(clutch).unwrap_or(CLUTCH_FULL_VALUE),
                )
            }
            ClutchWorkingMode::LaunchControlMasterLeft => {
                let mut clutch = if right > CLUTCH_3_4_VALUE {
                    self.settings.bite_point()
                } else {
                    CLUTCH_NONE_VALUE
                };
                if left > clutch {
                    clutch = left;
                }
                (CLUTCH_NONE_VALUE, CLUTCH_NONE_VALUE, clutch)
            }
            ClutchWorkingMode::LaunchControlMasterRight => {
                let mut clutch = if left > CLUTCH_3_4_VALUE {
                    self.settings.bite_point()
                } else {
                    CLUTCH_NONE_VALUE
                };
                if right > clutch {
                    clutch = right;
                }
                (CLUTCH_NONE_VALUE, CLUTCH_NONE_VALUE, clutch)
            }
            ClutchWorkingMode::Axis => (left, right, CLUTCH_NONE_VALUE),
            _ => (CLUTCH_NONE_VALUE, CLUTCH_NONE_VALUE, CLUTCH_NONE_VALUE),
        }
    }

    /// Turn DPAD inputs into a POV value in navigation mode. In
    /// regular mode the inputs stay plain buttons.
    fn dpad_filter(&self, bitmap: &mut u64) -> u8 {
        let b = &self.bindings;
        let mut pov = DPAD_CENTERED;
        if self.settings.dpad_working_mode() == DPadWorkingMode::Navigation {
            let pov_state = *bitmap & b.dpad_neg_mask;
            if pov_state != 0 {
                for n in DPAD_UP..=DPAD_UP_LEFT {
                    if pov_state == b.dpad[n] {
                        pov = u8::try_from(n).unwrap_or(DPAD_CENTERED);
                        break;
                    }
                }
            }
            // Impossible combinations fall through as centered, and
            // the DPAD bits are consumed anyway.
            *bitmap &= b.dpad_mask;
        }
        pov
    }

    /// Engage or disengage the virtual neutral gear.
    fn neutral_gear_filter(&mut self, bitmap: &mut u64) {
        let b = &self.bindings;
        if b.neutral_bitmap == 0 {
            return;
        }
        let combination_pressed = !*bitmap & b.neutral_combo == 0;
        if self.neutral_engaged && *bitmap & b.neutral_combo == 0 {
            // Every button in the combination released at once
            self.neutral_engaged = false;
        } else if !self.neutral_engaged && combination_pressed {
            // Every button in the combination pressed at once
            self.neutral_engaged = true;
        }
        if self.neutral_engaged {
            *bitmap &= !b.neutral_combo;
            if combination_pressed {
                *bitmap |= b.neutral_bitmap;
            }
        }
    }
}
