//! Connection Lifecycle - single-device link state machine
//!
//! Tracks the one controller slot of the driver and owns the attached
//! [`DeviceHandle`] exclusively. Every outbound command goes through here.
//!
//! # State Machine
//!
//! ```text
//!                 device matched            handshake accepted
//! Disconnected ───────────────────► Connecting ─────────────────► Connected
//!      ▲                               │   (or any later command     │
//!      │                               │    accepted by the device)  │
//!      └───────────────────────────────┴─────────────────────────────┘
//!                     device removed / shutdown
//! ```
//!
//! The typed states are [`DeviceLink`] under statum; [`ConnectionState`]
//! wraps them so runtime events can drive transitions, and
//! [`ConnectionLifecycle`] puts that behind a mutex for the three contexts
//! that touch it (event loop, consumption loop, API caller).

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use statum::{machine, state};
use tracing::{debug, error, info, warn};

use crate::controller::report::{ControllerState, IndicatorPattern, OutputReport, RumbleCommand};
use crate::hid::{DeviceHandle, DeviceInfo, WriteError};

/// Indicator shown once the handshake is accepted.
pub const DEFAULT_INDICATOR: IndicatorPattern = IndicatorPattern::FIRST;

/// Short pulse confirming the rumble path after the handshake.
pub const DIAGNOSTIC_RUMBLE: RumbleCommand = RumbleCommand::new(0x00, 0x20, 100);

/// Result of a command that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Frame written to the device.
    Sent,
    /// No device attached; nothing was written.
    NotConnected,
}

/// Coarse link state for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Disconnected,
    Connecting(DeviceHandle),
    Connected(DeviceHandle),
}

#[machine]
pub struct DeviceLink<S: LinkState> {
    // Wall-clock time of the last match, kept for status output
    connected_since: Option<DateTime<Local>>,

    // Number of frames the device accepted on this link
    frames_sent: u64,
}

impl DeviceLink<Disconnected> {
    pub fn create() -> Self {
        Self::new(None, 0)
    }

    pub fn attach(mut self, handle: DeviceHandle) -> DeviceLink<Connecting> {
        info!("Controller matched: {}", handle.info());
        if let Some(serial) = &handle.info().serial {
            info!("  Serial: {}", serial);
        }
        info!("  Path: {}", handle.info().path);

        self.connected_since = Some(Local::now());
        self.frames_sent = 0;
        self.transition_with(handle)
    }
}

impl DeviceLink<Connecting> {
    fn handle(&self) -> Option<&DeviceHandle> {
        self.get_state_data()
    }

    pub fn send(&mut self, report: OutputReport) -> Result<(), WriteError> {
        let handle = self.handle().ok_or(WriteError::Disconnected)?;
        write_frame(handle, &report)?;
        self.frames_sent += 1;
        Ok(())
    }

    /// Writes the handshake frame. Failure leaves the link in `Connecting`.
    pub fn handshake(&mut self) -> Result<(), WriteError> {
        debug!("Sending handshake");
        self.send(OutputReport::Handshake)
    }

    /// Promotes the link once the device has accepted a frame.
    pub fn confirm(self) -> ConnectionState {
        match self.handle().cloned() {
            Some(handle) => {
                info!("Controller connected: {}", handle.info());
                ConnectionState::Connected(self.transition_with(handle))
            }
            None => {
                error!("Connecting link lost its device handle");
                ConnectionState::Disconnected(self.transition())
            }
        }
    }

    pub fn detach(self) -> DeviceLink<Disconnected> {
        info!("Controller removed before the handshake completed");
        self.transition()
    }
}

impl DeviceLink<Connected> {
    fn handle(&self) -> Option<&DeviceHandle> {
        self.get_state_data()
    }

    pub fn send(&mut self, report: OutputReport) -> Result<(), WriteError> {
        let handle = self.handle().ok_or(WriteError::Disconnected)?;
        write_frame(handle, &report)?;
        self.frames_sent += 1;
        Ok(())
    }

    pub fn detach(self) -> DeviceLink<Disconnected> {
        info!(
            "Controller disconnected after {} frames",
            self.frames_sent
        );
        self.transition()
    }
}

fn write_frame(handle: &DeviceHandle, report: &OutputReport) -> Result<(), WriteError> {
    let frame = report.encode();
    match handle.write_report(report.report_id(), &frame) {
        Ok(()) => {
            debug!("Wrote {} ({} bytes)", report, frame.len());
            Ok(())
        }
        Err(e) => {
            warn!("Failed to write {}: {}", report, e);
            Err(e)
        }
    }
}

/// Runtime view over the typed link states.
pub enum ConnectionState {
    Disconnected(DeviceLink<Disconnected>),
    Connecting(DeviceLink<Connecting>),
    Connected(DeviceLink<Connected>),
}

impl ConnectionState {
    pub fn status(&self) -> LinkStatus {
        match self {
            ConnectionState::Disconnected(_) => LinkStatus::Disconnected,
            ConnectionState::Connecting(_) => LinkStatus::Connecting,
            ConnectionState::Connected(_) => LinkStatus::Connected,
        }
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        match self {
            ConnectionState::Disconnected(_) => None,
            ConnectionState::Connecting(link) => link.handle().map(|h| h.info().clone()),
            ConnectionState::Connected(link) => link.handle().map(|h| h.info().clone()),
        }
    }

    fn connected_since(&self) -> Option<DateTime<Local>> {
        match self {
            ConnectionState::Disconnected(_) => None,
            ConnectionState::Connecting(link) => link.connected_since,
            ConnectionState::Connected(link) => link.connected_since,
        }
    }

    fn on_device_matched(self, handle: DeviceHandle) -> Self {
        let link = match self {
            ConnectionState::Disconnected(link) => link,
            other => {
                warn!(
                    "Ignoring {}: a controller is already attached",
                    handle.info()
                );
                return other;
            }
        };

        let mut connecting = link.attach(handle);
        match connecting.handshake() {
            Ok(()) => {
                info!("✓ Controller initialized successfully");
                if let Err(e) = connecting.send(OutputReport::Indicator(DEFAULT_INDICATOR)) {
                    warn!("Default indicator not applied: {}", e);
                }
                if let Err(e) = connecting.send(OutputReport::Rumble(DIAGNOSTIC_RUMBLE)) {
                    warn!("Diagnostic rumble not played: {}", e);
                }
                connecting.confirm()
            }
            Err(e) => {
                error!("✗ Failed to initialize controller: {}", e);
                ConnectionState::Connecting(connecting)
            }
        }
    }

    fn on_device_removed(self) -> Self {
        match self {
            ConnectionState::Disconnected(link) => {
                debug!("Removal event without an attached controller");
                ConnectionState::Disconnected(link)
            }
            ConnectionState::Connecting(link) => ConnectionState::Disconnected(link.detach()),
            ConnectionState::Connected(link) => ConnectionState::Disconnected(link.detach()),
        }
    }

    fn issue(self, report: OutputReport) -> (Self, Result<CommandOutcome, WriteError>) {
        match self {
            ConnectionState::Disconnected(link) => {
                debug!("No controller attached, dropping {}", report);
                (
                    ConnectionState::Disconnected(link),
                    Ok(CommandOutcome::NotConnected),
                )
            }
            ConnectionState::Connecting(mut link) => match link.send(report) {
                Ok(()) => {
                    info!("Device accepted {} without a handshake, promoting link", report);
                    (link.confirm(), Ok(CommandOutcome::Sent))
                }
                Err(e) => (ConnectionState::Connecting(link), Err(e)),
            },
            ConnectionState::Connected(mut link) => {
                let result = link.send(report).map(|()| CommandOutcome::Sent);
                (ConnectionState::Connected(link), result)
            }
        }
    }
}

struct LifecycleInner {
    // Always Some outside of a transition
    state: Option<ConnectionState>,
    latest_state: Option<ControllerState>,
}

impl LifecycleInner {
    fn transition(&mut self, apply: impl FnOnce(ConnectionState) -> ConnectionState) {
        let current = self
            .state
            .take()
            .unwrap_or_else(|| ConnectionState::Disconnected(DeviceLink::create()));
        self.state = Some(apply(current));
    }

    fn current(&self) -> Option<&ConnectionState> {
        self.state.as_ref()
    }
}

/// Thread-safe owner of the single [`ConnectionState`].
pub struct ConnectionLifecycle {
    inner: Mutex<LifecycleInner>,
}

impl Default for ConnectionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LifecycleInner {
                state: Some(ConnectionState::Disconnected(DeviceLink::create())),
                latest_state: None,
            }),
        }
    }

    /// Attaches a matched device: handshake, then indicator and diagnostic
    /// rumble, then `Connected`. A failed handshake leaves it `Connecting`.
    pub fn on_device_matched(&self, handle: DeviceHandle) -> LinkStatus {
        let mut inner = self.inner.lock();
        inner.transition(|state| state.on_device_matched(handle));
        inner.current().map_or(LinkStatus::Disconnected, ConnectionState::status)
    }

    /// Drops the device handle. Queued feature data is left alone.
    pub fn on_device_removed(&self) {
        let mut inner = self.inner.lock();
        inner.transition(ConnectionState::on_device_removed);
        inner.latest_state = None;
    }

    /// Drops any attached device and the latest sample. Quiet when nothing
    /// is attached, so the driver may call it more than once.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        let attached = inner
            .current()
            .is_some_and(|state| state.status() != LinkStatus::Disconnected);
        if attached {
            inner.transition(ConnectionState::on_device_removed);
        }
        inner.latest_state = None;
    }

    pub fn issue_rumble(&self, command: RumbleCommand) -> Result<CommandOutcome, WriteError> {
        self.issue(OutputReport::Rumble(command))
    }

    pub fn issue_indicator(&self, pattern: IndicatorPattern) -> Result<CommandOutcome, WriteError> {
        self.issue(OutputReport::Indicator(pattern))
    }

    fn issue(&self, report: OutputReport) -> Result<CommandOutcome, WriteError> {
        let mut inner = self.inner.lock();
        let mut outcome = Ok(CommandOutcome::NotConnected);
        inner.transition(|state| {
            let (next, result) = state.issue(report);
            outcome = result;
            next
        });
        outcome
    }

    /// Records the most recent decoded sample, surfaced through the driver
    /// status.
    pub fn update_state(&self, state: ControllerState) {
        self.inner.lock().latest_state = Some(state);
    }

    pub fn latest_state(&self) -> Option<ControllerState> {
        self.inner.lock().latest_state
    }

    pub fn status(&self) -> LinkStatus {
        self.inner
            .lock()
            .current()
            .map_or(LinkStatus::Disconnected, ConnectionState::status)
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.inner.lock().current().and_then(ConnectionState::device_info)
    }

    pub fn connected_since(&self) -> Option<DateTime<Local>> {
        self.inner
            .lock()
            .current()
            .and_then(ConnectionState::connected_since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::report::{RUMBLE_REPORT_ID, SUBCOMMAND_REPORT_ID};
    use crate::hid::mock::{MockHost, RecordedWrite};

    #[test]
    fn starts_disconnected_and_ignores_commands() {
        let host = MockHost::new();
        let lifecycle = ConnectionLifecycle::new();

        assert_eq!(lifecycle.status(), LinkStatus::Disconnected);
        assert_eq!(
            lifecycle.issue_rumble(RumbleCommand::new(0x80, 0xff, 500)),
            Ok(CommandOutcome::NotConnected)
        );
        assert_eq!(
            lifecycle.issue_indicator(IndicatorPattern::new(0x03)),
            Ok(CommandOutcome::NotConnected)
        );
        assert!(host.writes().is_empty());
    }

    #[test]
    fn match_runs_handshake_then_feedback() {
        let host = MockHost::new();
        let lifecycle = ConnectionLifecycle::new();

        let status = lifecycle.on_device_matched(host.device_handle());

        assert_eq!(status, LinkStatus::Connected);
        assert!(lifecycle.connected_since().is_some());
        assert_eq!(
            lifecycle.device_info().and_then(|info| info.product),
            Some("Pro Controller".to_string())
        );
        assert_eq!(
            host.writes(),
            vec![
                RecordedWrite {
                    report_id: SUBCOMMAND_REPORT_ID,
                    data: vec![0x80, 0x01],
                },
                RecordedWrite {
                    report_id: SUBCOMMAND_REPORT_ID,
                    data: vec![0x01, 0x01],
                },
                RecordedWrite {
                    report_id: RUMBLE_REPORT_ID,
                    data: vec![0x10, 0x80, 0, 0, 0, 0x20, 0x00, 0x00, 0x00, 0, 0, 0, 0],
                },
            ]
        );
    }

    #[test]
    fn failed_handshake_stays_connecting_until_a_command_lands() {
        let host = MockHost::new();
        let lifecycle = ConnectionLifecycle::new();
        host.fail_next_writes(1);

        assert_eq!(
            lifecycle.on_device_matched(host.device_handle()),
            LinkStatus::Connecting
        );
        assert!(host.writes().is_empty());

        host.fail_next_writes(1);
        assert!(lifecycle.issue_indicator(IndicatorPattern::new(0x02)).is_err());
        assert_eq!(lifecycle.status(), LinkStatus::Connecting);

        assert_eq!(
            lifecycle.issue_indicator(IndicatorPattern::new(0x02)),
            Ok(CommandOutcome::Sent)
        );
        assert_eq!(lifecycle.status(), LinkStatus::Connected);
        assert_eq!(host.writes().len(), 1);
    }

    #[test]
    fn write_failure_while_connected_is_reported_not_fatal() {
        let host = MockHost::new();
        let lifecycle = ConnectionLifecycle::new();
        lifecycle.on_device_matched(host.device_handle());

        host.reject_all_writes(true);
        assert!(matches!(
            lifecycle.issue_rumble(RumbleCommand::new(1, 2, 3)),
            Err(WriteError::Rejected { .. })
        ));
        assert_eq!(lifecycle.status(), LinkStatus::Connected);

        host.reject_all_writes(false);
        assert_eq!(
            lifecycle.issue_rumble(RumbleCommand::new(1, 2, 3)),
            Ok(CommandOutcome::Sent)
        );
    }

    #[test]
    fn removal_drops_the_handle() {
        let host = MockHost::new();
        let lifecycle = ConnectionLifecycle::new();
        lifecycle.on_device_matched(host.device_handle());
        host.clear_writes();

        lifecycle.on_device_removed();

        assert_eq!(lifecycle.status(), LinkStatus::Disconnected);
        assert!(lifecycle.device_info().is_none());
        assert!(lifecycle.latest_state().is_none());
        assert_eq!(
            lifecycle.issue_rumble(RumbleCommand::new(0x30, 0x30, 50)),
            Ok(CommandOutcome::NotConnected)
        );
        assert!(host.writes().is_empty());
    }

    #[test]
    fn shutdown_detaches_and_can_repeat() {
        let host = MockHost::new();
        let lifecycle = ConnectionLifecycle::new();
        lifecycle.on_device_matched(host.device_handle());

        lifecycle.shutdown();
        lifecycle.shutdown();

        assert_eq!(lifecycle.status(), LinkStatus::Disconnected);
        assert!(lifecycle.device_info().is_none());
    }

    #[test]
    fn second_match_is_ignored() {
        let host = MockHost::new();
        let lifecycle = ConnectionLifecycle::new();
        lifecycle.on_device_matched(host.device_handle());
        host.clear_writes();

        assert_eq!(
            lifecycle.on_device_matched(host.device_handle()),
            LinkStatus::Connected
        );
        assert!(host.writes().is_empty());
    }
}
