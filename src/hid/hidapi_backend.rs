//! `hidapi` implementation of the host subsystem.
//!
//! hidapi has no callbacks, so matching and removal are derived: while no
//! device is open the backend rescans the device list at a fixed interval,
//! and a failed read on the open device is reported as removal.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    DeviceHandle, DeviceInfo, DeviceMatcher, HidBackend, HidProvider, HostError, HostEvent,
    InitError, ReportWriter, WriteError,
};

/// Largest input report the Pro Controller sends.
const INPUT_BUFFER_LEN: usize = 64;

/// Longest a single read holds the device lock, so writers queued behind
/// the reader wait at most this long.
const READ_SLICE: Duration = Duration::from_millis(4);

#[derive(Debug, Clone)]
pub struct HidApiProvider {
    rescan_interval: Duration,
}

impl HidApiProvider {
    pub fn new(rescan_interval: Duration) -> Self {
        Self { rescan_interval }
    }
}

impl Default for HidApiProvider {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl HidProvider for HidApiProvider {
    fn open(&self, matcher: DeviceMatcher) -> Result<Box<dyn HidBackend>, InitError> {
        info!("Initializing hidapi host subsystem");
        let api = match HidApi::new() {
            Ok(api) => api,
            Err(e) => {
                warn!("Failed to create hidapi context: {}", e);
                return Err(InitError::Unavailable(e.to_string()));
            }
        };

        info!(
            "hidapi ready, matching {:04x}:{:04x}",
            matcher.vendor_id, matcher.product_id
        );
        Ok(Box::new(HidApiBackend {
            api,
            matcher,
            rescan_interval: self.rescan_interval,
            last_scan: None,
            device: None,
        }))
    }

    fn name(&self) -> &str {
        "hidapi"
    }
}

// Writes go through the same mutex the reader uses
struct HidApiWriter {
    device: Arc<Mutex<HidDevice>>,
}

impl ReportWriter for HidApiWriter {
    fn write_report(&self, report_id: u8, data: &[u8]) -> Result<usize, WriteError> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(report_id);
        frame.extend_from_slice(data);

        let written = self
            .device
            .lock()
            .write(&frame)
            .map_err(|e| WriteError::Rejected {
                report_id,
                reason: e.to_string(),
            })?;

        // hidapi counts the report id byte
        Ok(written.saturating_sub(1))
    }
}

pub struct HidApiBackend {
    api: HidApi,
    matcher: DeviceMatcher,
    rescan_interval: Duration,
    last_scan: Option<Instant>,
    device: Option<Arc<Mutex<HidDevice>>>,
}

impl HidApiBackend {
    fn scan_due(&self) -> bool {
        self.last_scan
            .map_or(true, |last| last.elapsed() >= self.rescan_interval)
    }

    fn try_match(&mut self) -> Result<Option<HostEvent>, HostError> {
        self.last_scan = Some(Instant::now());
        self.api
            .refresh_devices()
            .map_err(|e| HostError::Enumeration(e.to_string()))?;

        let matcher = self.matcher;
        let Some(candidate) = self
            .api
            .device_list()
            .find(|d| matcher.matches(d.vendor_id(), d.product_id()))
        else {
            debug!("No matching device present");
            return Ok(None);
        };

        let info = DeviceInfo {
            vendor_id: candidate.vendor_id(),
            product_id: candidate.product_id(),
            product: candidate.product_string().map(str::to_owned),
            serial: candidate.serial_number().map(str::to_owned),
            path: candidate.path().to_string_lossy().into_owned(),
        };

        let device = candidate
            .open_device(&self.api)
            .map_err(|e| HostError::DeviceOpen {
                path: info.path.clone(),
                reason: e.to_string(),
            })?;

        let device = Arc::new(Mutex::new(device));
        self.device = Some(device.clone());
        debug!("Opened {} at {}", info, info.path);

        Ok(Some(HostEvent::DeviceMatched(DeviceHandle::new(
            info,
            Arc::new(HidApiWriter { device }),
        ))))
    }

    fn read_report(&mut self, timeout: Duration) -> Result<Option<HostEvent>, HostError> {
        let Some(device) = self.device.clone() else {
            return Ok(None);
        };

        let mut buf = [0u8; INPUT_BUFFER_LEN];
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            // Lock is released between slices so writes can interleave
            let result = device.lock().read_timeout(&mut buf, read_slice_ms(remaining));

            match result {
                Ok(0) if remaining > READ_SLICE => continue,
                Ok(0) => return Ok(None),
                Ok(len) => return Ok(Some(HostEvent::InputReport(buf[..len].to_vec()))),
                Err(e) => {
                    // hidapi only fails reads on an open device once it is gone
                    warn!("Read failed, treating device as removed: {}", e);
                    self.device = None;
                    self.last_scan = None;
                    return Ok(Some(HostEvent::DeviceRemoved));
                }
            }
        }
    }
}

// hidapi takes milliseconds as i32; 0 would mean "do not wait at all"
fn read_slice_ms(remaining: Duration) -> i32 {
    let slice = remaining.min(READ_SLICE).max(Duration::from_millis(1));
    i32::try_from(slice.as_millis()).unwrap_or(i32::MAX)
}

impl HidBackend for HidApiBackend {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<HostEvent>, HostError> {
        if self.device.is_some() {
            return self.read_report(timeout);
        }

        if self.scan_due() {
            if let Some(event) = self.try_match()? {
                return Ok(Some(event));
            }
        }

        thread::sleep(timeout);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_sliced_to_keep_writes_responsive() {
        assert_eq!(read_slice_ms(Duration::from_millis(50)), 4);
        assert_eq!(read_slice_ms(Duration::from_secs(3600)), 4);
        assert_eq!(read_slice_ms(Duration::from_millis(3)), 3);
        assert_eq!(read_slice_ms(Duration::ZERO), 1);
    }
}
