//! Controller Handle - Driver facade for the Pro Controller
//!
//! Composes the connection lifecycle, the feature pipeline and the host
//! subsystem, and owns the two worker threads:
//!
//! 1. **Event-delivery thread**: drives the host run loop, decodes input
//!    reports, feeds the pipeline and publishes the latest state
//! 2. **Consumption thread**: steps the pipeline at a fixed cadence and
//!    routes classifier signals back to the device as rumble pulses
//!
//! Every public operation takes `&self` and may be called from any thread.
//!

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::event_collector::{CollectorSettings, CollectorStats, EventCollector};
use super::lifecycle::{CommandOutcome, ConnectionLifecycle, LinkStatus};
use super::report::{ControllerState, IndicatorPattern, RumbleCommand};
use crate::config::Config;
use crate::hid::{DeviceInfo, DeviceMatcher, HidBackend, HidProvider, InitError, WriteError};
use crate::inference::Classifier;
use crate::pipeline::processor::{run_consumption_loop, DEFAULT_STEP_INTERVAL};
use crate::pipeline::FeaturePipeline;

/// Runtime settings of the driver
///
/// Usually built from the on-disk [`Config`]; tests construct it directly
/// with short intervals.
#[derive(Clone, Debug)]
pub struct DriverSettings {
    /// Device the host backend matches against
    pub matcher: DeviceMatcher,

    /// Settings of the event-delivery loop
    pub collector: CollectorSettings,

    /// Pause between two consumption steps
    ///
    /// 16ms gives roughly 60 classifier calls per second regardless of how
    /// fast the controller reports.
    pub step_interval: Duration,

    /// Whether the feature pipeline runs from the first report on
    pub pipeline_enabled: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            matcher: DeviceMatcher::SWITCH_PRO,
            collector: CollectorSettings::default(),
            step_interval: DEFAULT_STEP_INTERVAL,
            pipeline_enabled: true,
        }
    }
}

impl From<&Config> for DriverSettings {
    fn from(config: &Config) -> Self {
        Self {
            matcher: DeviceMatcher::SWITCH_PRO,
            collector: CollectorSettings {
                poll_timeout: Duration::from_millis(config.driver.poll_timeout_ms),
            },
            step_interval: Duration::from_millis(config.driver.step_interval_ms),
            pipeline_enabled: config.driver.pipeline_enabled,
        }
    }
}

/// Errors surfaced by the driver facade
///
/// Per-report and per-command failures never show up here; they are logged
/// where they happen or returned from the command itself.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Host HID subsystem could not be created or opened
    #[error("Initialization error: {0}")]
    Init(#[from] InitError),

    /// `start()` without a successful `initialize()`
    #[error("Driver is not initialized")]
    NotInitialized,

    /// Worker thread could not be spawned
    #[error("Failed to spawn {name} thread: {reason}")]
    Spawn { name: &'static str, reason: String },
}

/// Snapshot of the driver for presentation.
#[derive(Debug, Clone)]
pub struct DriverStatus {
    pub link: LinkStatus,
    pub device: Option<DeviceInfo>,
    pub connected_since: Option<DateTime<Local>>,
    pub latest_state: Option<ControllerState>,
    pub initialized: bool,
    pub running: bool,
    pub pipeline_enabled: bool,
    pub queued_features: usize,
    pub dropped_features: u64,
    pub classifier: String,
}

// Running worker threads and their shared stop signal
struct Workers {
    token: CancellationToken,
    collector: JoinHandle<CollectorStats>,
    consumer: JoinHandle<()>,
}

impl Workers {
    fn thread_ids(&self) -> [ThreadId; 2] {
        [self.collector.thread().id(), self.consumer.thread().id()]
    }
}

/// Handle for the complete driver lifecycle
///
/// # Threading Model
///
/// ```text
/// host ──► event-delivery thread ──► ConnectionLifecycle ◄── caller (rumble, indicator)
///                 │                          ▲
///                 ▼                          │ gesture pulse
///           FeatureQueue ──► consumption thread
/// ```
///
/// # Resource Management
///
/// `initialize()` opens the host subsystem and `start()` moves it into the
/// event-delivery thread. `stop()` cancels both threads, joins them and so
/// releases the host subsystem before it returns, even when called from the
/// consumption thread. Dropping the handle stops it.
///
/// # Examples
///
/// ```rust,no_run
/// use procontroller::controller::{ControllerHandle, DriverSettings};
/// use procontroller::controller::report::RumbleCommand;
/// use procontroller::hid::hidapi_backend::HidApiProvider;
/// use procontroller::inference::UnavailableClassifier;
///
/// let driver = ControllerHandle::new(
///     DriverSettings::default(),
///     Box::new(HidApiProvider::default()),
///     Box::new(UnavailableClassifier),
/// );
/// driver.initialize()?;
/// driver.start()?;
/// let outcome = driver.rumble(RumbleCommand::new(0x00, 0x20, 100));
/// println!("rumble: {:?}", outcome);
/// driver.stop();
/// # Ok::<(), procontroller::controller::DriverError>(())
/// ```
pub struct ControllerHandle {
    settings: DriverSettings,
    provider: Box<dyn HidProvider>,
    lifecycle: Arc<ConnectionLifecycle>,
    pipeline: Arc<FeaturePipeline>,
    classifier: Arc<Mutex<Box<dyn Classifier>>>,
    classifier_name: String,

    // Opened but not yet handed to the event-delivery thread
    backend: Mutex<Option<Box<dyn HidBackend>>>,
    workers: Mutex<Option<Workers>>,

    state_sender: watch::Sender<Option<ControllerState>>,
    state_receiver: watch::Receiver<Option<ControllerState>>,
}

impl ControllerHandle {
    pub fn new(
        settings: DriverSettings,
        provider: Box<dyn HidProvider>,
        classifier: Box<dyn Classifier>,
    ) -> Self {
        info!(
            "Creating driver with {} host backend and {} classifier",
            provider.name(),
            classifier.name()
        );
        debug!("Driver settings: {:?}", settings);

        let (state_sender, state_receiver) = watch::channel(None);
        let classifier_name = classifier.name().to_string();
        let pipeline = Arc::new(FeaturePipeline::new(settings.pipeline_enabled));

        Self {
            settings,
            provider,
            lifecycle: Arc::new(ConnectionLifecycle::new()),
            pipeline,
            classifier: Arc::new(Mutex::new(classifier)),
            classifier_name,
            backend: Mutex::new(None),
            workers: Mutex::new(None),
            state_sender,
            state_receiver,
        }
    }

    /// Opens the host subsystem for the configured device.
    ///
    /// # Errors
    ///
    /// [`DriverError::Init`] when the host subsystem is unavailable. Nothing
    /// is retried; the driver cannot start until a later call succeeds.
    pub fn initialize(&self) -> Result<(), DriverError> {
        if self.workers.lock().is_some() {
            debug!("initialize() while running, nothing to do");
            return Ok(());
        }

        let mut backend = self.backend.lock();
        if backend.is_some() {
            debug!("Host subsystem already open");
            return Ok(());
        }

        info!("Opening {} host subsystem", self.provider.name());
        match self.provider.open(self.settings.matcher) {
            Ok(opened) => {
                *backend = Some(opened);
                info!("Driver initialized");
                Ok(())
            }
            Err(e) => {
                error!("Failed to initialize driver: {}", e);
                Err(e.into())
            }
        }
    }

    /// Spawns both worker threads. Calling it while running is a no-op.
    pub fn start(&self) -> Result<(), DriverError> {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            debug!("Driver already running");
            return Ok(());
        }

        let backend = self.backend.lock().take().ok_or(DriverError::NotInitialized)?;
        let token = CancellationToken::new();

        let collector = EventCollector::new(
            backend,
            self.lifecycle.clone(),
            self.pipeline.clone(),
            self.state_sender.clone(),
            self.settings.collector.clone(),
        );
        let collector_token = token.clone();
        let collector = thread::Builder::new()
            .name("procontroller-events".to_string())
            .spawn(move || collector.run_collection_loop(collector_token))
            .map_err(|e| DriverError::Spawn {
                name: "event-delivery",
                reason: e.to_string(),
            })?;

        let pipeline = self.pipeline.clone();
        let lifecycle = self.lifecycle.clone();
        let classifier = self.classifier.clone();
        let step_interval = self.settings.step_interval;
        let consumer_token = token.clone();
        let consumer = thread::Builder::new()
            .name("procontroller-consumer".to_string())
            .spawn(move || {
                run_consumption_loop(pipeline, lifecycle, classifier, step_interval, consumer_token)
            });

        let consumer = match consumer {
            Ok(handle) => handle,
            Err(e) => {
                token.cancel();
                if collector.join().is_err() {
                    error!("Event-delivery thread panicked");
                }
                return Err(DriverError::Spawn {
                    name: "consumption",
                    reason: e.to_string(),
                });
            }
        };

        *workers = Some(Workers {
            token,
            collector,
            consumer,
        });
        info!("Driver started");
        Ok(())
    }

    /// Stops both threads and releases the host subsystem.
    ///
    /// Safe to call repeatedly. From inside a worker thread it joins the
    /// other worker and only signals cancellation to the calling one, which
    /// finishes once control returns to its loop.
    pub fn stop(&self) {
        // Release the lock before joining so a worker may call stop() too
        let workers = self.workers.lock().take();
        let unused_backend = self.backend.lock().take();

        if let Some(workers) = workers {
            info!("Stopping driver");
            workers.token.cancel();

            let current = thread::current().id();
            let [collector_id, consumer_id] = workers.thread_ids();

            if collector_id == current {
                warn!("stop() called from the event-delivery thread, not waiting for it to exit");
            } else {
                match workers.collector.join() {
                    Ok(stats) => info!(
                        "Event-delivery thread exited after {} reports ({} decode errors, {} host errors)",
                        stats.reports, stats.decode_errors, stats.host_errors
                    ),
                    Err(_) => error!("Event-delivery thread panicked"),
                }
            }

            if consumer_id == current {
                warn!("stop() called from the consumption thread, not waiting for it to exit");
            } else if workers.consumer.join().is_err() {
                error!("Consumption thread panicked");
            }
        }

        if unused_backend.is_some() {
            debug!("Releasing host subsystem that was never started");
        }
        drop(unused_backend);

        // The event-delivery thread is gone (or is the caller), so nothing
        // can re-attach a device or publish a state after this
        self.lifecycle.shutdown();
        self.state_sender.send_replace(None);
    }

    /// Sends a rumble command to the attached controller.
    ///
    /// Returns [`CommandOutcome::NotConnected`] without writing anything when
    /// no controller is attached.
    pub fn rumble(&self, command: RumbleCommand) -> Result<CommandOutcome, WriteError> {
        let outcome = self.lifecycle.issue_rumble(command);
        match &outcome {
            Ok(CommandOutcome::Sent) => debug!("Rumble sent: {:?}", command),
            Ok(CommandOutcome::NotConnected) => info!("Rumble ignored, no controller connected"),
            Err(e) => warn!("Rumble failed: {}", e),
        }
        outcome
    }

    pub fn set_indicator(&self, pattern: IndicatorPattern) -> Result<CommandOutcome, WriteError> {
        let outcome = self.lifecycle.issue_indicator(pattern);
        match &outcome {
            Ok(CommandOutcome::Sent) => debug!("Indicator set to 0x{:x}", pattern.bits()),
            Ok(CommandOutcome::NotConnected) => info!("Indicator ignored, no controller connected"),
            Err(e) => warn!("Indicator failed: {}", e),
        }
        outcome
    }

    pub fn enable_feature_pipeline(&self, enabled: bool) {
        self.pipeline.set_enabled(enabled);
    }

    pub fn is_running(&self) -> bool {
        self.workers.lock().is_some()
    }

    /// Receiver for the latest decoded state. `None` while no controller is
    /// attached.
    pub fn subscribe(&self) -> watch::Receiver<Option<ControllerState>> {
        self.state_receiver.clone()
    }

    pub fn status(&self) -> DriverStatus {
        let running = self.is_running();
        DriverStatus {
            link: self.lifecycle.status(),
            device: self.lifecycle.device_info(),
            connected_since: self.lifecycle.connected_since(),
            latest_state: self.lifecycle.latest_state(),
            initialized: running || self.backend.lock().is_some(),
            running,
            pipeline_enabled: self.pipeline.is_enabled(),
            queued_features: self.pipeline.queue().len(),
            dropped_features: self.pipeline.queue().dropped(),
            classifier: self.classifier_name.clone(),
        }
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::mock::MockHost;
    use crate::inference::UnavailableClassifier;

    fn driver(host: &MockHost) -> ControllerHandle {
        let settings = DriverSettings {
            collector: CollectorSettings {
                poll_timeout: Duration::from_millis(5),
            },
            step_interval: Duration::from_millis(2),
            ..DriverSettings::default()
        };
        ControllerHandle::new(
            settings,
            Box::new(host.provider()),
            Box::new(UnavailableClassifier),
        )
    }

    #[test]
    fn start_requires_initialize() {
        let host = MockHost::new();
        let driver = driver(&host);
        assert!(matches!(driver.start(), Err(DriverError::NotInitialized)));
        assert!(!driver.is_running());
    }

    #[test]
    fn initialize_failure_is_surfaced() {
        let host = MockHost::new();
        host.fail_open("no HID manager");
        let driver = driver(&host);

        assert!(matches!(driver.initialize(), Err(DriverError::Init(_))));
        assert!(matches!(driver.start(), Err(DriverError::NotInitialized)));
    }

    #[test]
    fn stop_is_idempotent_and_releases_backend() {
        let host = MockHost::new();
        let driver = driver(&host);
        driver.initialize().unwrap();
        driver.start().unwrap();
        assert!(driver.is_running());

        driver.stop();
        driver.stop();

        assert!(!driver.is_running());
        assert_eq!(host.opened(), 1);
        assert_eq!(host.released(), 1);
        assert!(matches!(driver.start(), Err(DriverError::NotInitialized)));
    }

    #[test]
    fn stop_releases_backend_that_never_started() {
        let host = MockHost::new();
        let driver = driver(&host);
        driver.initialize().unwrap();
        driver.stop();
        assert_eq!(host.released(), 1);
        assert!(!driver.status().initialized);
    }

    #[test]
    fn commands_without_controller_are_noops() {
        let host = MockHost::new();
        let driver = driver(&host);
        assert_eq!(
            driver.rumble(RumbleCommand::new(0x10, 0x20, 30)),
            Ok(CommandOutcome::NotConnected)
        );
        assert_eq!(
            driver.set_indicator(IndicatorPattern::new(0x0f)),
            Ok(CommandOutcome::NotConnected)
        );
        assert!(host.writes().is_empty());
    }

    #[test]
    fn status_reflects_settings() {
        let host = MockHost::new();
        let driver = driver(&host);
        let status = driver.status();
        assert_eq!(status.link, LinkStatus::Disconnected);
        assert!(status.pipeline_enabled);
        assert!(!status.initialized);
        assert_eq!(status.classifier, "unavailable");

        driver.enable_feature_pipeline(false);
        assert!(!driver.status().pipeline_enabled);
    }
}
