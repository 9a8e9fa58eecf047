//! Feature derivation: one [`ControllerState`] in, one [`FeatureVector`] out.

use std::time::Duration;

use tracing::trace;

use crate::controller::report::{Buttons, ControllerState, StickPosition};

pub const FEATURE_COUNT: usize = 17;

// Vector layout
pub const LEFT_STICK_X: usize = 0;
pub const LEFT_STICK_Y: usize = 1;
pub const RIGHT_STICK_X: usize = 2;
pub const RIGHT_STICK_Y: usize = 3;
pub const LEFT_TRIGGER: usize = 4;
pub const RIGHT_TRIGGER: usize = 5;
pub const BUTTON_FLAGS: usize = 6;
pub const LEFT_MAGNITUDE: usize = 14;
pub const RIGHT_MAGNITUDE: usize = 15;
pub const TIME_DELTA: usize = 16;

/// Buttons carried in the flag slots, in slot order.
pub const FEATURE_BUTTONS: [Buttons; 8] = [
    Buttons::A,
    Buttons::B,
    Buttons::X,
    Buttons::Y,
    Buttons::L,
    Buttons::R,
    Buttons::ZL,
    Buttons::ZR,
];

const AXIS_SCALE: f64 = 255.0;

/// Fixed-length numeric summary of one sample.
///
/// Sticks and triggers are in `[0.0, 1.0]`, button flags are `0.0` or `1.0`,
/// the time delta is in seconds and never negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    pub fn button_flags(&self) -> &[f64] {
        &self.0[BUTTON_FLAGS..BUTTON_FLAGS + FEATURE_BUTTONS.len()]
    }

    pub fn time_delta(&self) -> f64 {
        self.0[TIME_DELTA]
    }

    pub fn left_magnitude(&self) -> f64 {
        self.0[LEFT_MAGNITUDE]
    }

    pub fn right_magnitude(&self) -> f64 {
        self.0[RIGHT_MAGNITUDE]
    }
}

fn normalize(axis: u8) -> f64 {
    f64::from(axis) / AXIS_SCALE
}

fn magnitude(x: f64, y: f64) -> f64 {
    (x * x + y * y).sqrt()
}

fn stick_axes(stick: StickPosition) -> (f64, f64) {
    (normalize(stick.x), normalize(stick.y))
}

/// Derives the feature vector of `state`. `previous` is the timestamp of the
/// sample before it, `None` for the first sample of a run.
pub fn derive(state: &ControllerState, previous: Option<Duration>) -> FeatureVector {
    let mut values = [0.0; FEATURE_COUNT];

    let (lx, ly) = stick_axes(state.left_stick);
    let (rx, ry) = stick_axes(state.right_stick);
    values[LEFT_STICK_X] = lx;
    values[LEFT_STICK_Y] = ly;
    values[RIGHT_STICK_X] = rx;
    values[RIGHT_STICK_Y] = ry;

    // No analog triggers on this device
    values[LEFT_TRIGGER] = 0.0;
    values[RIGHT_TRIGGER] = 0.0;

    for (slot, button) in FEATURE_BUTTONS.iter().enumerate() {
        values[BUTTON_FLAGS + slot] = if state.is_pressed(*button) { 1.0 } else { 0.0 };
    }

    values[LEFT_MAGNITUDE] = magnitude(lx, ly);
    values[RIGHT_MAGNITUDE] = magnitude(rx, ry);

    values[TIME_DELTA] = previous
        .and_then(|prev| state.timestamp.checked_sub(prev))
        .map_or(0.0, |delta| delta.as_secs_f64());

    FeatureVector(values)
}

/// Producer-side derivation state. Lives on the event-delivery thread only.
#[derive(Debug, Default)]
pub struct FeatureProducer {
    previous: Option<Duration>,
    generation: u64,
}

impl FeatureProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the vector for `state` and remembers its timestamp. A new
    /// pipeline `generation` resets the history so the first delta is 0.0.
    pub fn produce(&mut self, state: &ControllerState, generation: u64) -> FeatureVector {
        if generation != self.generation {
            trace!("Pipeline generation {} -> {}, resetting history", self.generation, generation);
            self.generation = generation;
            self.previous = None;
        }

        let vector = derive(state, self.previous);
        self.previous = Some(state.timestamp);
        vector
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}
