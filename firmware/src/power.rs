//! Power-off orchestration.
//!
//! The power latch / deep sleep mechanics are an external
//! collaborator; the core broadcasts the shutdown notification, waits
//! for every UI task to acknowledge it, then hands control over.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::info;

use crate::events::EventBus;

const SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Drives the power latch pin or enters deep sleep. Not reversible.
pub trait PowerSwitch: Send + Sync {
    /// Cut power now.
    fn power_off(&self);
}

/// A device without power management.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPowerSwitch;

impl PowerSwitch for NoPowerSwitch {
    fn power_off(&self) {}
}

/// Counts shutdown acknowledgements from the UI tasks.
pub struct ShutdownBarrier {
    remaining: Mutex<usize>,
    condvar: Condvar,
}

impl ShutdownBarrier {
    /// Create a barrier expecting `count` acknowledgements.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            condvar: Condvar::new(),
        }
    }

    /// Acknowledge the shutdown from one task.
    pub fn arrive(&self) {
        let mut remaining = self.remaining.lock().expect("shutdown barrier poisoned");
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.condvar.notify_all();
        }
    }

    /// Wait until every expected task acknowledged, or the timeout
    /// elapses.
    pub fn wait(&self, timeout: Duration) {
        let remaining = self.remaining.lock().expect("shutdown barrier poisoned");
        let _unused = self
            .condvar
            .wait_timeout_while(remaining, timeout, |remaining| *remaining > 0);
    }
}

/// Shutdown entry point, called on low-battery power-off or the
/// auto-power-off timeout.
pub struct Power {
    bus: Arc<EventBus>,
    barrier: Arc<ShutdownBarrier>,
    switch: Arc<dyn PowerSwitch>,
}

impl Power {
    pub(crate) fn new(
        bus: Arc<EventBus>,
        barrier: Arc<ShutdownBarrier>,
        switch: Arc<dyn PowerSwitch>,
    ) -> Self {
        Self {
            bus,
            barrier,
            switch,
        }
    }

    /// Broadcast the shutdown notification, wait for the UI tasks to
    /// acknowledge, then cut power.
    pub fn shutdown(&self) {
        info!("powering off");
        self.bus.on_shutdown.notify(());
        self.barrier.wait(SHUTDOWN_ACK_TIMEOUT);
        self.switch.power_off();
    }
}
