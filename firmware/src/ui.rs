//! User interface instances and their frame-server tasks.
//!
//! Each registered UI owns a private event mailbox served by its own
//! task at idle priority. Telemetry frames are delivered at the UI's
//! maximum frame rate; a null frame is delivered when no telemetry
//! arrived in the last two seconds.

use std::sync::{Arc, Mutex};

use embassy_time::{with_timeout, Duration, Instant};
use futures::channel::mpsc;
use futures::StreamExt;
use log::debug;

use crate::power::ShutdownBarrier;
use crate::types::TelemetryData;

/// Time without telemetry frames after which a null frame is served.
const NO_TELEMETRY_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of each UI event mailbox.
const UI_MAILBOX_CAPACITY: usize = 32;

/// Notifications and telemetry display.
///
/// All methods run on the UI's own low-priority task and must return
/// promptly.
pub trait UserInterface: Send {
    /// Maximum frames per second the underlying display supports.
    /// Zero disables the frame server (notifications only).
    fn max_fps(&self) -> u8 {
        0
    }

    /// Whether powertrain telemetry should be delivered.
    fn requires_powertrain_telemetry(&self) -> bool {
        false
    }

    /// Whether ECU telemetry should be delivered.
    fn requires_ecu_telemetry(&self) -> bool {
        false
    }

    /// Whether race control telemetry should be delivered.
    fn requires_race_control_telemetry(&self) -> bool {
        false
    }

    /// Whether gauge telemetry should be delivered.
    fn requires_gauge_telemetry(&self) -> bool {
        false
    }

    /// Called just once after initialization.
    fn on_start(&mut self) {}

    /// New telemetry data, or `None` when no frame arrived in the last
    /// two seconds. Always called just before
    /// [`serve_single_frame`](UserInterface::serve_single_frame).
    fn on_telemetry(&mut self, data: Option<&TelemetryData>) {
        let _ = data;
    }

    /// Draw a single frame. Called at timed intervals; do not assume
    /// perfect timing.
    fn serve_single_frame(&mut self, elapsed_ms: u32) {
        let _ = elapsed_ms;
    }

    /// The bite point changed.
    fn on_bite_point(&mut self, bite_point: u8) {
        let _ = bite_point;
    }

    /// The device connected to a host.
    fn on_connected(&mut self) {}

    /// The device entered discovery mode.
    fn on_discovering(&mut self) {}

    /// Low battery. Repeated while the condition persists.
    fn on_low_battery(&mut self) {}

    /// Cut power to the UI hardware. Not reversible.
    fn shutdown(&mut self) {}
}

/// One queued UI notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEvent {
    /// The bite point changed.
    BitePoint(u8),
    /// Host connection established.
    Connected,
    /// Discovery mode started.
    Discovering,
    /// Low battery.
    LowBattery,
    /// Terminate the task.
    Shutdown,
}

/// Create a UI mailbox.
#[must_use]
pub fn mailbox() -> (mpsc::Sender<UiEvent>, mpsc::Receiver<UiEvent>) {
    mpsc::channel(UI_MAILBOX_CAPACITY)
}

/// The task serving one UI instance.
pub struct FrameServer {
    ui: Box<dyn UserInterface>,
    rx: mpsc::Receiver<UiEvent>,
    telemetry: Arc<Mutex<TelemetryData>>,
    barrier: Arc<ShutdownBarrier>,
}

impl FrameServer {
    pub(crate) fn new(
        ui: Box<dyn UserInterface>,
        rx: mpsc::Receiver<UiEvent>,
        telemetry: Arc<Mutex<TelemetryData>>,
        barrier: Arc<ShutdownBarrier>,
    ) -> Self {
        Self {
            ui,
            rx,
            telemetry,
            barrier,
        }
    }

    /// Task body: serve notifications and frames until shutdown.
    ///
    /// # Errors
    ///
    /// Infallible in practice; typed to match the other task bodies.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let max_fps = self.ui.max_fps();
        let telemetry_required = self.ui.requires_powertrain_telemetry()
            || self.ui.requires_ecu_telemetry()
            || self.ui.requires_race_control_telemetry()
            || self.ui.requires_gauge_telemetry();
        let frame_period = if max_fps > 0 {
            Some(Duration::from_millis(1000 / u64::from(max_fps)))
        } else {
            None
        };

        self.ui.on_start();
        debug!("frame server started (max fps {max_fps})");

        let mut last_frame_id = 0u32;
        let mut telemetry_received = false;
        let mut previous_telemetry = Instant::now();
        let mut frame_timestamp = Instant::now();

        loop {
            // The single long wait of this task: the mailbox, bounded
            // by the frame period when one applies.
            let first = match frame_period {
                Some(period) => with_timeout(period, self.rx.next()).await.ok(),
                None => Some(self.rx.next().await),
            };
            let mut shutdown = matches!(first, Some(None));
            if let Some(Some(event)) = first {
                shutdown |= self.handle(event);
            }
            while let Ok(Some(event)) = self.rx.try_next() {
                shutdown |= self.handle(event);
            }
            if shutdown {
                break;
            }

            if frame_period.is_some() {
                if telemetry_required {
                    let now = Instant::now();
                    let snapshot = *self.telemetry.lock().expect("telemetry lock poisoned");
                    if snapshot.frame_id != last_frame_id {
                        telemetry_received = true;
                        last_frame_id = snapshot.frame_id;
                        previous_telemetry = now;
                        self.ui.on_telemetry(Some(&snapshot));
                    } else if telemetry_received && now - previous_telemetry >= NO_TELEMETRY_TIMEOUT
                    {
                        telemetry_received = false;
                        self.ui.on_telemetry(None);
                    }
                }
                let elapsed = Instant::now() - frame_timestamp;
                let elapsed_ms = u32::try_from(elapsed.as_millis()).unwrap_or(u32::MAX);
                self.ui.serve_single_frame(elapsed_ms);
            }
            frame_timestamp = Instant::now();
        }

        self.ui.shutdown();
        self.barrier.arrive();
        Ok(())
    }

    fn handle(&mut self, event: UiEvent) -> bool {
        match event {
            UiEvent::BitePoint(value) => self.ui.on_bite_point(value),
            UiEvent::Connected => self.ui.on_connected(),
            UiEvent::Discovering => self.ui.on_discovering(),
            UiEvent::LowBattery => self.ui.on_low_battery(),
            UiEvent::Shutdown => return true,
        }
        false
    }
}
