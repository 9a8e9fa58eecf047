//! Controller subsystem for the Switch Pro Controller
//!
//! Implements the device-facing half of the driver:
//!
//! 1. [`report`] - Byte-exact input decoding and output framing
//! 2. [`lifecycle`] - Single-device connection state machine
//! 3. [`event_collector`] - Event-delivery loop over the host backend
//! 4. [`controller_handle`] - Driver facade and worker lifecycle
//!
//! # Architecture
//!
//! ```text
//! HID host ──► Collector ──► Lifecycle ──► watch<ControllerState>
//!              (decode)         │
//!                  │            ▼
//!                  └──► FeaturePipeline ──► Classifier ──► rumble
//! ```
//!
//! The collector and the pipeline consumer run on their own threads; the
//! consumer steps every 16ms.

pub mod controller_handle;
pub mod event_collector;
pub mod lifecycle;
pub mod report;

pub use controller_handle::{ControllerHandle, DriverError, DriverSettings, DriverStatus};
pub use event_collector::{CollectorSettings, CollectorStats};
pub use lifecycle::{CommandOutcome, ConnectionLifecycle, LinkStatus};
pub use report::{
    Buttons, ControllerState, DPad, DecodeError, IndicatorPattern, RumbleCommand, StickPosition,
};
