//! Settings event bus.
//!
//! A typed publish/subscribe family with a fixed set of event kinds.
//! Subscriptions are append-only; publication invokes every subscriber
//! synchronously on the publishing task, so handlers must return
//! promptly and must not block.

use std::sync::Mutex;

use crate::types::UserSetting;

type Handler<T> = Box<dyn Fn(T) + Send + Sync>;

/// A single subscribable event kind carrying a payload of type `T`.
pub struct Event<T> {
    handlers: Mutex<Vec<Handler<T>>>,
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Copy> Event<T> {
    /// Subscribe to this event.
    pub fn subscribe(&self, handler: impl Fn(T) + Send + Sync + 'static) {
        self.handlers
            .lock()
            .expect("event handler list poisoned")
            .push(Box::new(handler));
    }

    /// Invoke all subscribed handlers on the calling task.
    pub fn notify(&self, payload: T) {
        let handlers = self.handlers.lock().expect("event handler list poisoned");
        for handler in handlers.iter() {
            handler(payload);
        }
    }
}

/// The full family of internal events.
///
/// Owned behind an `Arc` by the device context; every subsystem that
/// publishes or subscribes holds a clone.
#[derive(Default)]
pub struct EventBus {
    /// System startup. Notified only once.
    pub on_start: Event<()>,
    /// The system is about to shut down. Notified only once.
    pub on_shutdown: Event<()>,
    /// Host connection established.
    pub on_connected: Event<()>,
    /// No host connection; discovery mode started.
    pub on_disconnected: Event<()>,
    /// The clutch bite point has changed.
    pub on_bite_point: Event<u8>,
    /// New battery state of charge.
    pub on_battery_level: Event<i16>,
    /// Low battery. Repeated at timed intervals while the condition
    /// persists.
    pub on_low_battery: Event<()>,
    /// Request to load a user setting from persistent storage.
    pub load_setting: Event<UserSetting>,
    /// Request to save a user setting to persistent storage.
    pub save_setting: Event<UserSetting>,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn every_subscriber_runs_once_per_notification() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            bus.on_start.subscribe(move |()| {
                count.fetch_add(1, Ordering::Relaxed);
            });
        }
        bus.on_start.notify(());
        assert_eq!(count.load(Ordering::Relaxed), 3);
        bus.on_start.notify(());
        assert_eq!(count.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn payloads_reach_subscribers() {
        let bus = EventBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.save_setting.subscribe(move |kind| {
            sink.lock().unwrap().push(kind);
        });
        bus.save_setting.notify(UserSetting::BitePoint);
        bus.save_setting.notify(UserSetting::InputMap);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![UserSetting::BitePoint, UserSetting::InputMap]
        );
    }
}
