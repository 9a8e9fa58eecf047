use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::features::FeatureProducer;
use super::queue::FeatureQueue;
use crate::controller::lifecycle::{CommandOutcome, ConnectionLifecycle};
use crate::controller::report::{ControllerState, RumbleCommand};
use crate::inference::{Classifier, Label};

/// Default pause between two consumption steps (~60 Hz).
pub const DEFAULT_STEP_INTERVAL: Duration = Duration::from_millis(16);

/// Haptic pulse played when a gesture is detected.
pub const GESTURE_PULSE: RumbleCommand = RumbleCommand::new(0x30, 0x30, 50);

// Action requested by a classification result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Haptic { low: u16, high: u16 },
}

impl Signal {
    pub fn gesture() -> Self {
        Signal::Haptic {
            low: GESTURE_PULSE.low_frequency,
            high: GESTURE_PULSE.high_frequency,
        }
    }

    pub fn to_rumble(self) -> RumbleCommand {
        match self {
            Signal::Haptic { low, high } => {
                RumbleCommand::new(low, high, GESTURE_PULSE.duration_ms)
            }
        }
    }
}

/// Maps a label to the signal it triggers. Only a detected gesture does.
pub fn signal_for(label: Label) -> Option<Signal> {
    match label {
        Label::GestureDetected => Some(Signal::gesture()),
        Label::NoGesture | Label::Unknown | Label::Unavailable => None,
    }
}

/// Shared half of the feature pipeline: the queue plus the enable switch.
///
/// The producer calls [`FeaturePipeline::submit`] from the event-delivery
/// thread with its own [`FeatureProducer`]; the consumption loop calls
/// [`FeaturePipeline::consumption_step`].
pub struct FeaturePipeline {
    queue: FeatureQueue,
    run: Mutex<RunState>,
}

// Enable switch and run counter change together
#[derive(Debug, Clone, Copy)]
struct RunState {
    enabled: bool,
    generation: u64,
}

impl FeaturePipeline {
    pub fn new(enabled: bool) -> Self {
        Self {
            queue: FeatureQueue::new(),
            run: Mutex::new(RunState {
                enabled,
                generation: 0,
            }),
        }
    }

    /// Turning the pipeline on starts a fresh run: stale vectors are
    /// discarded and the producer's timestamp history is reset.
    ///
    /// Holds the run lock throughout, so no submit can straddle the switch.
    pub fn set_enabled(&self, enabled: bool) {
        let mut run = self.run.lock();
        if enabled && !run.enabled {
            self.queue.clear();
            run.generation += 1;
            run.enabled = true;
            info!("Feature pipeline enabled (run {})", run.generation);
        } else if !enabled && run.enabled {
            run.enabled = false;
            info!("Feature pipeline disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.run.lock().enabled
    }

    pub fn generation(&self) -> u64 {
        self.run.lock().generation
    }

    pub fn queue(&self) -> &FeatureQueue {
        &self.queue
    }

    /// Derives and enqueues the vector for `state` when enabled. Returns
    /// whether a vector was enqueued.
    pub fn submit(&self, producer: &mut FeatureProducer, state: &ControllerState) -> bool {
        let run = self.run.lock();
        if !run.enabled {
            return false;
        }
        let vector = producer.produce(state, run.generation);
        if self.queue.enqueue(vector).is_some() {
            trace!("Consumer is behind, oldest feature vector dropped");
        }
        true
    }

    /// Pops the oldest vector and classifies it. An empty queue is a no-op.
    pub fn consumption_step(&self, classifier: &mut dyn Classifier) -> Option<Signal> {
        let vector = self.queue.dequeue()?;
        let label = classifier.classify(&vector);
        trace!("{} classified vector as {}", classifier.name(), label);
        signal_for(label)
    }
}

#[derive(Debug, Default)]
struct ConsumerStats {
    cycles: u64,
    classified: u64,
    signals: u64,
}

/// Consumption loop body. Steps at a fixed interval until `token` fires and
/// routes signals to the lifecycle as rumble commands.
pub fn run_consumption_loop(
    pipeline: Arc<FeaturePipeline>,
    lifecycle: Arc<ConnectionLifecycle>,
    classifier: Arc<Mutex<Box<dyn Classifier>>>,
    step_interval: Duration,
    token: CancellationToken,
) {
    info!(
        "Starting consumption loop with {}ms interval",
        step_interval.as_millis()
    );

    let mut stats = ConsumerStats::default();
    let mut last_stats_time = Local::now();
    let stats_interval = chrono::Duration::seconds(30);

    while !token.is_cancelled() {
        if pipeline.is_enabled() {
            let had_input = !pipeline.queue().is_empty();
            let signal = {
                let mut classifier = classifier.lock();
                pipeline.consumption_step(&mut **classifier)
            };
            if had_input {
                stats.classified += 1;
            }

            if let Some(signal) = signal {
                stats.signals += 1;
                debug!("Gesture detected, sending {:?}", signal);
                match lifecycle.issue_rumble(signal.to_rumble()) {
                    Ok(CommandOutcome::Sent) => {}
                    Ok(CommandOutcome::NotConnected) => {
                        debug!("Gesture signal dropped, no controller attached")
                    }
                    Err(e) => warn!("Gesture rumble failed: {}", e),
                }
            }
        }
        stats.cycles += 1;

        let now = Local::now();
        if now - last_stats_time > stats_interval {
            let elapsed_seconds = (now - last_stats_time).num_seconds().max(1);
            info!(
                "Consumer stats: {} cycles, {} vectors classified, {} signals in {} seconds ({} dropped total)",
                stats.cycles,
                stats.classified,
                stats.signals,
                elapsed_seconds,
                pipeline.queue().dropped()
            );
            stats = ConsumerStats::default();
            last_stats_time = now;
        }

        std::thread::sleep(step_interval);
    }

    info!("Consumption loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::report::{Buttons, DPad, StickPosition};
    use crate::inference::UnavailableClassifier;
    use crate::pipeline::features::{FeatureVector, BUTTON_FLAGS};

    // Reports a gesture whenever A is held
    struct AButtonClassifier;

    impl Classifier for AButtonClassifier {
        fn classify(&mut self, features: &FeatureVector) -> Label {
            if features.button_flags()[0] > 0.5 {
                Label::GestureDetected
            } else {
                Label::NoGesture
            }
        }

        fn name(&self) -> &str {
            "a-button"
        }
    }

    fn sample(ms: u64, buttons: Buttons) -> ControllerState {
        ControllerState {
            left_stick: StickPosition::CENTER,
            right_stick: StickPosition::CENTER,
            buttons,
            dpad: DPad::Neutral,
            timestamp: Duration::from_millis(ms),
        }
    }

    #[test]
    fn empty_queue_step_is_noop() {
        let pipeline = FeaturePipeline::new(true);
        assert_eq!(pipeline.consumption_step(&mut AButtonClassifier), None);
    }

    #[test]
    fn gesture_maps_to_haptic_signal() {
        let pipeline = FeaturePipeline::new(true);
        let mut producer = FeatureProducer::new();
        pipeline.submit(&mut producer, &sample(0, Buttons::A));
        pipeline.submit(&mut producer, &sample(16, Buttons::B));

        assert_eq!(
            pipeline.consumption_step(&mut AButtonClassifier),
            Some(Signal::Haptic {
                low: 0x30,
                high: 0x30
            })
        );
        assert_eq!(pipeline.consumption_step(&mut AButtonClassifier), None);
        assert!(pipeline.queue().is_empty());
    }

    #[test]
    fn unavailable_classifier_never_signals() {
        let pipeline = FeaturePipeline::new(true);
        let mut producer = FeatureProducer::new();
        pipeline.submit(&mut producer, &sample(0, Buttons::A));
        assert_eq!(pipeline.consumption_step(&mut UnavailableClassifier), None);
        assert!(pipeline.queue().is_empty());
    }

    #[test]
    fn disabled_pipeline_enqueues_nothing() {
        let pipeline = FeaturePipeline::new(false);
        let mut producer = FeatureProducer::new();
        assert!(!pipeline.submit(&mut producer, &sample(0, Buttons::A)));
        assert!(pipeline.queue().is_empty());
    }

    #[test]
    fn enabling_starts_a_fresh_run() {
        let pipeline = FeaturePipeline::new(true);
        let mut producer = FeatureProducer::new();
        pipeline.submit(&mut producer, &sample(100, Buttons::empty()));

        pipeline.set_enabled(false);
        pipeline.set_enabled(true);
        assert!(pipeline.queue().is_empty());
        assert_eq!(pipeline.generation(), 1);

        pipeline.submit(&mut producer, &sample(5_000, Buttons::empty()));
        let vector = pipeline.queue().dequeue().unwrap();
        assert_eq!(vector.time_delta(), 0.0);
        assert_eq!(vector.button_flags()[0], 0.0);
        assert_eq!(vector.values()[BUTTON_FLAGS + 1], 0.0);
    }

    #[test]
    fn toggling_under_load_never_carries_history_across_runs() {
        let pipeline = FeaturePipeline::new(true);
        let mut deltas = Vec::new();

        // One report per millisecond of session time; inside a run the
        // delta is 1ms, the first vector of a run starts at 0
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let mut producer = FeatureProducer::new();
                for ms in 0..20_000 {
                    pipeline.submit(&mut producer, &sample(ms, Buttons::empty()));
                }
            });

            for _ in 0..500 {
                pipeline.set_enabled(false);
                std::thread::yield_now();
                pipeline.set_enabled(true);
                while let Some(vector) = pipeline.queue().dequeue() {
                    deltas.push(vector.time_delta());
                }
            }
        });
        while let Some(vector) = pipeline.queue().dequeue() {
            deltas.push(vector.time_delta());
        }

        assert!(!deltas.is_empty());
        for delta in deltas {
            assert!(
                delta == 0.0 || (delta - 0.001).abs() < 1e-9,
                "delta {} spans a disabled period",
                delta
            );
        }
    }

    #[test]
    fn signal_rumble_uses_pulse_duration() {
        assert_eq!(Signal::gesture().to_rumble(), GESTURE_PULSE);
    }
}
