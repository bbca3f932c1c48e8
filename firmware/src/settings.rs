//! User settings held by the input hub.
//!
//! A single shared instance backs both the hub pipeline and the host
//! configuration protocol. Every field has one writer at a time;
//! readers tolerate one polling cycle of staleness.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::events::EventBus;
use crate::types::{
    AltButtonsWorkingMode, ClutchWorkingMode, DPadWorkingMode, UserSetting, CLUTCH_DEFAULT_VALUE,
    CLUTCH_FULL_VALUE, CLUTCH_INVALID_VALUE, CLUTCH_NONE_VALUE,
};

const BITE_POINT_STEP: u8 = 3;

/// Working modes, bite point and security lock.
pub struct Settings {
    bus: Arc<EventBus>,
    clutch_mode: AtomicU8,
    alt_mode: AtomicU8,
    dpad_mode: AtomicU8,
    bite_point: AtomicU8,
    security_lock: AtomicBool,
}

impl Settings {
    /// Create the settings block with factory defaults.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            clutch_mode: AtomicU8::new(ClutchWorkingMode::default() as u8),
            alt_mode: AtomicU8::new(AltButtonsWorkingMode::default() as u8),
            dpad_mode: AtomicU8::new(DPadWorkingMode::default() as u8),
            bite_point: AtomicU8::new(CLUTCH_DEFAULT_VALUE),
            security_lock: AtomicBool::new(false),
        }
    }

    /// Current clutch working mode.
    #[must_use]
    pub fn clutch_working_mode(&self) -> ClutchWorkingMode {
        ClutchWorkingMode::try_from(self.clutch_mode.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    /// Current ALT buttons working mode.
    #[must_use]
    pub fn alt_buttons_working_mode(&self) -> AltButtonsWorkingMode {
        AltButtonsWorkingMode::try_from(self.alt_mode.load(Ordering::Relaxed)).unwrap_or_default()
    }

    /// Current DPAD working mode.
    #[must_use]
    pub fn dpad_working_mode(&self) -> DPadWorkingMode {
        DPadWorkingMode::try_from(self.dpad_mode.load(Ordering::Relaxed)).unwrap_or_default()
    }

    /// Current bite point.
    #[must_use]
    pub fn bite_point(&self) -> u8 {
        self.bite_point.load(Ordering::Relaxed)
    }

    /// Current security lock state.
    #[must_use]
    pub fn security_lock(&self) -> bool {
        self.security_lock.load(Ordering::Relaxed)
    }

    /// Set the bite point. Invalid values are ignored.
    pub fn set_bite_point(&self, value: u8, save: bool) {
        if value < CLUTCH_INVALID_VALUE && value != self.bite_point() {
            self.bite_point.store(value, Ordering::Relaxed);
            self.bus.on_bite_point.notify(value);
            if save {
                self.bus.save_setting.notify(UserSetting::BitePoint);
            }
        }
    }

    /// Set the clutch working mode.
    pub fn set_clutch_working_mode(&self, mode: ClutchWorkingMode, save: bool) {
        if mode != self.clutch_working_mode() {
            self.clutch_mode.store(mode as u8, Ordering::Relaxed);
            if save {
                self.bus.save_setting.notify(UserSetting::ClutchWorkingMode);
            }
        }
    }

    /// Set the ALT buttons working mode.
    pub fn set_alt_buttons_working_mode(&self, mode: AltButtonsWorkingMode, save: bool) {
        if mode != self.alt_buttons_working_mode() {
            self.alt_mode.store(mode as u8, Ordering::Relaxed);
            if save {
                self.bus.save_setting.notify(UserSetting::AltWorkingMode);
            }
        }
    }

    /// Set the DPAD working mode.
    pub fn set_dpad_working_mode(&self, mode: DPadWorkingMode, save: bool) {
        if mode != self.dpad_working_mode() {
            self.dpad_mode.store(mode as u8, Ordering::Relaxed);
            if save {
                self.bus.save_setting.notify(UserSetting::DpadWorkingMode);
            }
        }
    }

    /// Engage or release the security lock.
    pub fn set_security_lock(&self, value: bool, save: bool) {
        if value != self.security_lock() {
            self.security_lock.store(value, Ordering::Relaxed);
            if save {
                self.bus.save_setting.notify(UserSetting::SecurityLock);
            }
        }
    }

    /// Advance the clutch working mode to the next one.
    pub fn cycle_clutch_working_mode(&self) {
        let next = self.clutch_working_mode().cycled();
        self.clutch_mode.store(next as u8, Ordering::Relaxed);
        self.bus.save_setting.notify(UserSetting::ClutchWorkingMode);
    }

    /// Advance the ALT buttons working mode to the next one.
    pub fn cycle_alt_buttons_working_mode(&self) {
        let next = self.alt_buttons_working_mode().cycled();
        self.alt_mode.store(next as u8, Ordering::Relaxed);
        self.bus.save_setting.notify(UserSetting::AltWorkingMode);
    }

    /// Advance the DPAD working mode to the next one.
    pub fn cycle_dpad_working_mode(&self) {
        let next = self.dpad_working_mode().cycled();
        self.dpad_mode.store(next as u8, Ordering::Relaxed);
        self.bus.save_setting.notify(UserSetting::DpadWorkingMode);
    }

    /// Toggle the security lock.
    pub fn cycle_security_lock(&self) {
        self.security_lock.fetch_xor(true, Ordering::Relaxed);
        self.bus.save_setting.notify(UserSetting::SecurityLock);
    }

    /// Raise the bite point by one calibration step.
    pub fn increase_bite_point(&self) {
        let current = self.bite_point();
        if current >= CLUTCH_FULL_VALUE {
            return;
        }
        let next = current.saturating_add(BITE_POINT_STEP).min(CLUTCH_FULL_VALUE);
        self.bite_point.store(next, Ordering::Relaxed);
        self.bus.on_bite_point.notify(next);
        self.bus.save_setting.notify(UserSetting::BitePoint);
    }

    /// Lower the bite point by one calibration step.
    pub fn decrease_bite_point(&self) {
        let current = self.bite_point();
        if current == CLUTCH_NONE_VALUE {
            return;
        }
        let next = current.saturating_sub(BITE_POINT_STEP);
        self.bite_point.store(next, Ordering::Relaxed);
        self.bus.on_bite_point.notify(next);
        self.bus.save_setting.notify(UserSetting::BitePoint);
    }

    /// Publish the load requests for every setting this block owns.
    pub fn request_load(&self) {
        for kind in [
            UserSetting::ClutchWorkingMode,
            UserSetting::BitePoint,
            UserSetting::AltWorkingMode,
            UserSetting::DpadWorkingMode,
            UserSetting::SecurityLock,
        ] {
            self.bus.load_setting.notify(kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn settings_with_log() -> (Arc<Settings>, Arc<Mutex<Vec<UserSetting>>>) {
        let bus = Arc::new(EventBus::default());
        let saved = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&saved);
        bus.save_setting.subscribe(move |kind| sink.lock().unwrap().push(kind));
        (Arc::new(Settings::new(bus)), saved)
    }

    #[test]
    fn bite_point_clamps_at_both_ends() {
        let (settings, _) = settings_with_log();
        settings.set_bite_point(253, false);
        settings.increase_bite_point();
        assert_eq!(settings.bite_point(), CLUTCH_FULL_VALUE);
        settings.increase_bite_point();
        assert_eq!(settings.bite_point(), CLUTCH_FULL_VALUE);

        settings.set_bite_point(2, false);
        settings.decrease_bite_point();
        assert_eq!(settings.bite_point(), CLUTCH_NONE_VALUE);
        settings.decrease_bite_point();
        assert_eq!(settings.bite_point(), CLUTCH_NONE_VALUE);
    }

    #[test]
    fn invalid_bite_point_is_ignored() {
        let (settings, saved) = settings_with_log();
        settings.set_bite_point(CLUTCH_INVALID_VALUE, true);
        assert_eq!(settings.bite_point(), CLUTCH_DEFAULT_VALUE);
        assert!(saved.lock().unwrap().is_empty());
    }

    #[test]
    fn every_mutation_saves_exactly_once() {
        let (settings, saved) = settings_with_log();
        settings.set_bite_point(100, true);
        settings.cycle_clutch_working_mode();
        settings.cycle_security_lock();
        assert_eq!(
            *saved.lock().unwrap(),
            vec![
                UserSetting::BitePoint,
                UserSetting::ClutchWorkingMode,
                UserSetting::SecurityLock
            ]
        );
        // Setting the same value again does not save.
        settings.set_bite_point(100, true);
        assert_eq!(saved.lock().unwrap().len(), 3);
    }
}
