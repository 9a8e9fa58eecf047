//! Scripted host subsystem for tests.
//!
//! A [`MockHost`] is shared between the test and the backend it hands out:
//! the test pushes events and inspects writes, the driver consumes events
//! through [`HidBackend::next_event`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{
    DeviceHandle, DeviceInfo, DeviceMatcher, HidBackend, HidProvider, HostError, HostEvent,
    InitError, ReportWriter, WriteError,
};

/// One output report as the device saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub report_id: u8,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct MockDevice {
    writes: Mutex<Vec<RecordedWrite>>,
    failing_writes: AtomicUsize,
    reject_all: AtomicBool,
}

impl ReportWriter for MockDevice {
    fn write_report(&self, report_id: u8, data: &[u8]) -> Result<usize, WriteError> {
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(WriteError::Rejected {
                report_id,
                reason: "mock device rejects all writes".to_string(),
            });
        }

        let pending = self.failing_writes.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_writes.store(pending - 1, Ordering::SeqCst);
            return Err(WriteError::Rejected {
                report_id,
                reason: "injected failure".to_string(),
            });
        }

        self.writes.lock().push(RecordedWrite {
            report_id,
            data: data.to_vec(),
        });
        Ok(data.len())
    }
}

#[derive(Default)]
struct Shared {
    events: Mutex<VecDeque<HostEvent>>,
    ready: Condvar,
    device: Arc<MockDevice>,
    open_failure: Mutex<Option<String>>,
    opened: AtomicUsize,
    released: AtomicUsize,
}

/// Test-side handle of the scripted host.
#[derive(Clone, Default)]
pub struct MockHost {
    shared: Arc<Shared>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider that hands out backends bound to this host.
    pub fn provider(&self) -> MockHidProvider {
        MockHidProvider { host: self.clone() }
    }

    /// Makes the next `open` calls fail with the given reason.
    pub fn fail_open(&self, reason: impl Into<String>) {
        *self.shared.open_failure.lock() = Some(reason.into());
    }

    /// A handle writing into this host's device, as delivered on match.
    pub fn device_handle(&self) -> DeviceHandle {
        DeviceHandle::new(
            DeviceInfo {
                vendor_id: DeviceMatcher::SWITCH_PRO.vendor_id,
                product_id: DeviceMatcher::SWITCH_PRO.product_id,
                product: Some("Pro Controller".to_string()),
                serial: Some("MOCK-0001".to_string()),
                path: "mock://pro-controller".to_string(),
            },
            self.shared.device.clone(),
        )
    }

    pub fn push_event(&self, event: HostEvent) {
        self.shared.events.lock().push_back(event);
        self.shared.ready.notify_all();
    }

    pub fn connect(&self) {
        self.push_event(HostEvent::DeviceMatched(self.device_handle()));
    }

    pub fn disconnect(&self) {
        self.push_event(HostEvent::DeviceRemoved);
    }

    pub fn input_report(&self, bytes: &[u8]) {
        self.push_event(HostEvent::InputReport(bytes.to_vec()));
    }

    pub fn pending_events(&self) -> usize {
        self.shared.events.lock().len()
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.shared.device.writes.lock().clone()
    }

    pub fn clear_writes(&self) {
        self.shared.device.writes.lock().clear();
    }

    /// Rejects the next `count` writes.
    pub fn fail_next_writes(&self, count: usize) {
        self.shared.device.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn reject_all_writes(&self, reject: bool) {
        self.shared.device.reject_all.store(reject, Ordering::SeqCst);
    }

    /// Number of backends opened so far.
    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Number of backends dropped so far.
    pub fn released(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }
}

pub struct MockHidProvider {
    host: MockHost,
}

impl HidProvider for MockHidProvider {
    fn open(&self, _matcher: DeviceMatcher) -> Result<Box<dyn HidBackend>, InitError> {
        if let Some(reason) = self.host.shared.open_failure.lock().clone() {
            return Err(InitError::Unavailable(reason));
        }
        self.host.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockBackend {
            shared: self.host.shared.clone(),
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub struct MockBackend {
    shared: Arc<Shared>,
}

impl HidBackend for MockBackend {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<HostEvent>, HostError> {
        let mut events = self.shared.events.lock();
        if events.is_empty() {
            let _ = self.shared.ready.wait_for(&mut events, timeout);
        }
        Ok(events.pop_front())
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.shared.released.fetch_add(1, Ordering::SeqCst);
    }
}
