//! Driver for the Nintendo Switch Pro Controller over HID.
//!
//! Decodes input reports, frames rumble and indicator commands, tracks the
//! connection of a single controller and feeds per-sample feature vectors
//! to a gesture classifier at a bounded rate.

pub mod config;
pub mod controller;
pub mod hid;
pub mod inference;
pub mod pipeline;
