//! Host HID subsystem seam
//!
//! The driver never talks to the operating system directly. It depends on
//! three capabilities:
//!
//! 1. [`HidProvider`] - create and open the host subsystem for one
//!    vendor/product pair (the only fatal failure point of the driver)
//! 2. [`HidBackend`] - the blocking run-loop primitive that yields
//!    [`HostEvent`]s: device matched, device removed, input report
//! 3. [`ReportWriter`] - the exact-length write primitive keyed by report id
//!
//! ```text
//! HidProvider::open ──► HidBackend::next_event ──► HostEvent
//!                                 │
//!                     DeviceMatched(DeviceHandle) ──► ReportWriter::write_report
//! ```
//!
//! [`hidapi_backend`] implements them over `hidapi`; [`mock`] is a scripted
//! test double.

pub mod hidapi_backend;
pub mod mock;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::controller::report::{PRODUCT_ID, VENDOR_ID};

/// Vendor/product pair a backend matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceMatcher {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceMatcher {
    pub const SWITCH_PRO: DeviceMatcher = DeviceMatcher {
        vendor_id: VENDOR_ID,
        product_id: PRODUCT_ID,
    };

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl Default for DeviceMatcher {
    fn default() -> Self {
        Self::SWITCH_PRO
    }
}

/// Descriptive properties of a matched device, logged on connect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: Option<String>,
    pub serial: Option<String>,
    pub path: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:04x}:{:04x}]",
            self.product.as_deref().unwrap_or("unknown product"),
            self.vendor_id,
            self.product_id
        )
    }
}

/// Host subsystem could not be created or opened.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("HID subsystem unavailable: {0}")]
    Unavailable(String),
}

/// A single output report write was rejected by the host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("Device rejected report 0x{report_id:02x}: {reason}")]
    Rejected { report_id: u8, reason: String },

    #[error("Short write for report 0x{report_id:02x}: {written} of {expected} bytes")]
    ShortWrite {
        report_id: u8,
        written: usize,
        expected: usize,
    },

    #[error("Device is gone")]
    Disconnected,
}

/// Transient run-loop failure. Logged by the event loop, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    #[error("Failed to open matched device {path}: {reason}")]
    DeviceOpen { path: String, reason: String },
}

/// Synchronous write primitive of one attached device.
pub trait ReportWriter: Send + Sync {
    /// Writes `data` as an output report with the given id. Returns the
    /// number of payload bytes the host accepted.
    fn write_report(&self, report_id: u8, data: &[u8]) -> Result<usize, WriteError>;
}

/// Handle to the attached device, owned by the connection lifecycle.
#[derive(Clone)]
pub struct DeviceHandle {
    info: DeviceInfo,
    writer: Arc<dyn ReportWriter>,
}

impl DeviceHandle {
    pub fn new(info: DeviceInfo, writer: Arc<dyn ReportWriter>) -> Self {
        Self { info, writer }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Writes a full frame, treating a partial write as a failure.
    pub fn write_report(&self, report_id: u8, data: &[u8]) -> Result<(), WriteError> {
        let written = self.writer.write_report(report_id, data)?;
        if written < data.len() {
            return Err(WriteError::ShortWrite {
                report_id,
                written,
                expected: data.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Events delivered by the host run loop, serially and in arrival order.
#[derive(Debug, Clone)]
pub enum HostEvent {
    DeviceMatched(DeviceHandle),
    DeviceRemoved,
    /// Raw input report of the matched device, report id in byte 0.
    InputReport(Vec<u8>),
}

/// Blocking run loop of an opened host subsystem.
///
/// Dropping the backend releases the host subsystem.
pub trait HidBackend: Send {
    /// Waits up to `timeout` for the next event. `Ok(None)` means the wait
    /// timed out with nothing to deliver.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<HostEvent>, HostError>;
}

/// Factory for the host subsystem.
pub trait HidProvider: Send + Sync {
    fn open(&self, matcher: DeviceMatcher) -> Result<Box<dyn HidBackend>, InitError>;

    fn name(&self) -> &str;
}
