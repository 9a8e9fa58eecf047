//! Feature Pipeline
//!
//! Decouples the high-rate input thread from the inference collaborator:
//!
//! ```text
//! event-delivery thread                     consumption thread (~60 Hz)
//! ControllerState ──► derive ──► FeatureQueue ──► Classifier ──► Signal
//!                    (producer)   (cap 100,                        │
//!                                 drop-oldest)        issue_rumble ◄┘
//! ```
//!
//! 1. [`features`] - pure derivation plus the producer-owned timestamp history
//! 2. [`queue`] - bounded FIFO, the only structure shared by both threads
//! 3. [`processor`] - enable switch, consumption step and the worker loop

pub mod features;
pub mod processor;
pub mod queue;

pub use features::{derive, FeatureProducer, FeatureVector, FEATURE_COUNT};
pub use processor::{FeaturePipeline, Signal};
pub use queue::{FeatureQueue, QUEUE_CAPACITY};
