use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controller::lifecycle::{ConnectionLifecycle, LinkStatus};
use crate::controller::report::{decode_input_report, Buttons, ControllerState, DPad};
use crate::hid::{HidBackend, HostError, HostEvent};
use crate::pipeline::{FeaturePipeline, FeatureProducer};

// Collector settings
#[derive(Clone, Debug)]
pub struct CollectorSettings {
    /// Longest single wait inside the host run loop; bounds stop latency.
    pub poll_timeout: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(50),
        }
    }
}

// Counters for the periodic stats line
#[derive(Debug, Default, Clone, Copy)]
pub struct CollectorStats {
    pub reports: u64,
    pub decode_errors: u64,
    pub host_errors: u64,
}

/// Event-delivery side of the driver.
///
/// Owns the host backend and the producer half of the feature pipeline.
/// Events are handled strictly in arrival order on one thread.
pub struct EventCollector {
    backend: Box<dyn HidBackend>,
    lifecycle: Arc<ConnectionLifecycle>,
    pipeline: Arc<FeaturePipeline>,
    producer: FeatureProducer,
    state_sender: watch::Sender<Option<ControllerState>>,
    settings: CollectorSettings,

    // Session clock and last handed-out timestamp
    session_start: Instant,
    last_timestamp: Duration,

    // Last seen input, to log presses and releases
    last_buttons: Buttons,
    last_dpad: DPad,

    stats: CollectorStats,
}

impl EventCollector {
    pub fn new(
        backend: Box<dyn HidBackend>,
        lifecycle: Arc<ConnectionLifecycle>,
        pipeline: Arc<FeaturePipeline>,
        state_sender: watch::Sender<Option<ControllerState>>,
        settings: CollectorSettings,
    ) -> Self {
        debug!("Creating Event Collector with settings: {:?}", settings);
        Self {
            backend,
            lifecycle,
            pipeline,
            producer: FeatureProducer::new(),
            state_sender,
            settings,
            session_start: Instant::now(),
            last_timestamp: Duration::ZERO,
            last_buttons: Buttons::empty(),
            last_dpad: DPad::Neutral,
            stats: CollectorStats::default(),
        }
    }

    pub fn stats(&self) -> CollectorStats {
        self.stats
    }

    // Session-relative time, never earlier than the previous sample
    fn next_timestamp(&mut self) -> Duration {
        let now = self.session_start.elapsed().max(self.last_timestamp);
        self.last_timestamp = now;
        now
    }

    /// Waits for one host event and handles it. Returns whether an event
    /// arrived before the poll timeout.
    pub fn collect_next_event(&mut self) -> Result<bool, HostError> {
        match self.backend.next_event(self.settings.poll_timeout)? {
            Some(event) => {
                self.handle_event(event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn handle_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::DeviceMatched(handle) => {
                let status = self.lifecycle.on_device_matched(handle);
                if status == LinkStatus::Connecting {
                    warn!("Controller attached without handshake, commands will still be attempted");
                }
            }
            HostEvent::DeviceRemoved => {
                self.lifecycle.on_device_removed();
                self.producer.reset();
                self.last_buttons = Buttons::empty();
                self.last_dpad = DPad::Neutral;
                self.state_sender.send_replace(None);
            }
            HostEvent::InputReport(bytes) => self.handle_input_report(&bytes),
        }
    }

    fn handle_input_report(&mut self, bytes: &[u8]) {
        let timestamp = self.next_timestamp();
        let state = match decode_input_report(bytes, timestamp) {
            Ok(state) => state,
            Err(e) => {
                self.stats.decode_errors += 1;
                debug!("Discarding input report: {}", e);
                return;
            }
        };
        self.stats.reports += 1;

        self.log_input_changes(&state);

        self.lifecycle.update_state(state);
        self.pipeline.submit(&mut self.producer, &state);
        self.state_sender.send_replace(Some(state));
    }

    fn log_input_changes(&mut self, state: &ControllerState) {
        let pressed = state.buttons - self.last_buttons;
        let released = self.last_buttons - state.buttons;
        let now = Local::now();

        for (name, _) in pressed.iter_names() {
            info!("Button pressed: {} at {}", name, now.format("%H:%M:%S.%3f"));
        }
        for (name, _) in released.iter_names() {
            debug!("Button released: {}", name);
        }
        if state.dpad != self.last_dpad {
            if state.dpad.is_neutral() {
                debug!("D-pad released");
            } else {
                info!("D-pad: {}", state.dpad);
            }
        }

        self.last_buttons = state.buttons;
        self.last_dpad = state.dpad;
    }

    /// Runs until `token` is cancelled. Host errors are logged and the loop
    /// keeps going. On exit the link is shut down and the published state
    /// cleared; dropping `self` on return releases the backend.
    pub fn run_collection_loop(mut self, token: CancellationToken) -> CollectorStats {
        info!("Starting Event Collector loop");

        let mut event_count = 0u64;
        let mut last_log_time = Local::now();
        let log_interval = chrono::Duration::seconds(10);

        while !token.is_cancelled() {
            match self.collect_next_event() {
                Ok(true) => event_count += 1,
                Ok(false) => {}
                Err(e) => {
                    self.stats.host_errors += 1;
                    error!("Error collecting event: {}", e);
                    // Avoid spinning on a persistently failing host
                    std::thread::sleep(self.settings.poll_timeout);
                }
            }

            let now = Local::now();
            if now - last_log_time > log_interval {
                info!(
                    "Event Collector stats: {} events in last {} seconds (avg {:.2}/sec), {} decode errors",
                    event_count,
                    log_interval.num_seconds(),
                    event_count as f64 / log_interval.num_seconds() as f64,
                    self.stats.decode_errors
                );
                event_count = 0;
                last_log_time = now;
            }
        }

        // Nothing attached outlives the loop
        self.lifecycle.shutdown();
        self.state_sender.send_replace(None);

        info!("Event Collector loop stopped");
        self.stats
    }
}
