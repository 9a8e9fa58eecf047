//! Report Codec - byte-exact framing for the Pro Controller HID reports
//!
//! Pure functions only: decoding an input report into a [`ControllerState`]
//! and encoding outbound command frames. Nothing here touches the transport.
//!
//! # Input report layout
//!
//! ```text
//! byte 0        report id (ignored)
//! byte 1        Y X B A . . R ZR
//! byte 2        - + L3 R3 HOME CAPTURE . .
//! byte 3        . ZL L . | D-pad nibble (0-7 clockwise from up, >=8 neutral)
//! byte 6 / 8    left stick X / Y
//! byte 10 / 12  right stick X / Y
//! ```
//!
//! # Output frames
//!
//! Every frame has a compile-time length; the host write primitive expects
//! exactly that many bytes for the given report id.

use bitflags::bitflags;
use std::fmt;
use std::time::Duration;

/// Nintendo
pub const VENDOR_ID: u16 = 0x057e;
/// Switch Pro Controller
pub const PRODUCT_ID: u16 = 0x2009;

/// Report id used for the handshake and indicator subcommands.
pub const SUBCOMMAND_REPORT_ID: u8 = 0x01;
/// Report id used for rumble frames.
pub const RUMBLE_REPORT_ID: u8 = 0x10;

/// Smallest input report that reaches the right-stick Y byte.
pub const MIN_INPUT_REPORT_LEN: usize = 13;

pub const RUMBLE_REPORT_LEN: usize = 13;
pub const INDICATOR_REPORT_LEN: usize = 2;
pub const HANDSHAKE_REPORT_LEN: usize = 2;

const HANDSHAKE_FRAME: [u8; HANDSHAKE_REPORT_LEN] = [0x80, 0x01];
const INDICATOR_SELECTOR: u8 = 0x01;
const RUMBLE_HEADER: [u8; 2] = [0x10, 0x80];

const BUTTONS_RIGHT_BYTE: usize = 1;
const BUTTONS_SHARED_BYTE: usize = 2;
const BUTTONS_LEFT_BYTE: usize = 3;
const LEFT_STICK_X_BYTE: usize = 6;
const LEFT_STICK_Y_BYTE: usize = 8;
const RIGHT_STICK_X_BYTE: usize = 10;
const RIGHT_STICK_Y_BYTE: usize = 12;

bitflags! {
    /// Logical buttons of the Pro Controller.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Buttons: u16 {
        const A = 1 << 0;
        const B = 1 << 1;
        const X = 1 << 2;
        const Y = 1 << 3;
        const L = 1 << 4;
        const R = 1 << 5;
        const ZL = 1 << 6;
        const ZR = 1 << 7;
        const MINUS = 1 << 8;
        const PLUS = 1 << 9;
        const L3 = 1 << 10;
        const R3 = 1 << 11;
        const HOME = 1 << 12;
        const CAPTURE = 1 << 13;
    }
}

/// (byte index, bit mask, button) for every button bit in an input report.
pub const BUTTON_LAYOUT: [(usize, u8, Buttons); 14] = [
    (BUTTONS_RIGHT_BYTE, 0x01, Buttons::Y),
    (BUTTONS_RIGHT_BYTE, 0x02, Buttons::X),
    (BUTTONS_RIGHT_BYTE, 0x04, Buttons::B),
    (BUTTONS_RIGHT_BYTE, 0x08, Buttons::A),
    (BUTTONS_RIGHT_BYTE, 0x40, Buttons::R),
    (BUTTONS_RIGHT_BYTE, 0x80, Buttons::ZR),
    (BUTTONS_SHARED_BYTE, 0x01, Buttons::MINUS),
    (BUTTONS_SHARED_BYTE, 0x02, Buttons::PLUS),
    (BUTTONS_SHARED_BYTE, 0x04, Buttons::L3),
    (BUTTONS_SHARED_BYTE, 0x08, Buttons::R3),
    (BUTTONS_SHARED_BYTE, 0x10, Buttons::HOME),
    (BUTTONS_SHARED_BYTE, 0x20, Buttons::CAPTURE),
    (BUTTONS_LEFT_BYTE, 0x20, Buttons::L),
    (BUTTONS_LEFT_BYTE, 0x40, Buttons::ZL),
];

/// D-pad direction, clockwise from up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DPad {
    Up,
    UpRight,
    Right,
    DownRight,
    Down,
    DownLeft,
    Left,
    UpLeft,
    #[default]
    Neutral,
}

impl DPad {
    /// Maps the low nibble of the D-pad status byte; anything >= 8 is neutral.
    pub fn from_nibble(value: u8) -> Self {
        match value & 0x0f {
            0 => DPad::Up,
            1 => DPad::UpRight,
            2 => DPad::Right,
            3 => DPad::DownRight,
            4 => DPad::Down,
            5 => DPad::DownLeft,
            6 => DPad::Left,
            7 => DPad::UpLeft,
            _ => DPad::Neutral,
        }
    }

    pub fn is_neutral(self) -> bool {
        self == DPad::Neutral
    }
}

impl fmt::Display for DPad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self {
            DPad::Up => "↑",
            DPad::UpRight => "↗",
            DPad::Right => "→",
            DPad::DownRight => "↘",
            DPad::Down => "↓",
            DPad::DownLeft => "↙",
            DPad::Left => "←",
            DPad::UpLeft => "↖",
            DPad::Neutral => "•",
        };
        f.write_str(arrow)
    }
}

// Raw stick sample, 0x80 is roughly centred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StickPosition {
    pub x: u8,
    pub y: u8,
}

impl StickPosition {
    pub const CENTER: StickPosition = StickPosition { x: 0x80, y: 0x80 };
}

impl Default for StickPosition {
    fn default() -> Self {
        Self::CENTER
    }
}

/// One decoded input report. Superseded, never mutated, by the next sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerState {
    pub left_stick: StickPosition,
    pub right_stick: StickPosition,
    pub buttons: Buttons,
    pub dpad: DPad,
    /// Offset from the driver session clock at decode time.
    pub timestamp: Duration,
}

impl ControllerState {
    pub fn is_pressed(&self, button: Buttons) -> bool {
        self.buttons.contains(button)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("input report too short: {len} bytes, need at least {min}", min = MIN_INPUT_REPORT_LEN)]
    TooShort { len: usize },
}

/// Rumble request. `duration_ms` is advisory only; the device has no
/// duration register, callers send a stop frame themselves if they need one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RumbleCommand {
    pub low_frequency: u16,
    pub high_frequency: u16,
    pub duration_ms: u32,
}

impl RumbleCommand {
    pub const fn new(low_frequency: u16, high_frequency: u16, duration_ms: u32) -> Self {
        Self {
            low_frequency,
            high_frequency,
            duration_ms,
        }
    }

    pub const fn stop() -> Self {
        Self::new(0, 0, 0)
    }
}

/// Player indicator LEDs, one bit per LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IndicatorPattern(u8);

impl IndicatorPattern {
    pub const FIRST: IndicatorPattern = IndicatorPattern(0x01);

    /// Keeps the low 4 bits only.
    pub const fn new(mask: u8) -> Self {
        Self(mask & 0x0f)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

pub fn decode_input_report(bytes: &[u8], timestamp: Duration) -> Result<ControllerState, DecodeError> {
    if bytes.len() < MIN_INPUT_REPORT_LEN {
        return Err(DecodeError::TooShort { len: bytes.len() });
    }

    let buttons = BUTTON_LAYOUT
        .iter()
        .filter(|(index, mask, _)| bytes[*index] & mask != 0)
        .fold(Buttons::empty(), |acc, (_, _, button)| acc | *button);

    Ok(ControllerState {
        left_stick: StickPosition {
            x: bytes[LEFT_STICK_X_BYTE],
            y: bytes[LEFT_STICK_Y_BYTE],
        },
        right_stick: StickPosition {
            x: bytes[RIGHT_STICK_X_BYTE],
            y: bytes[RIGHT_STICK_Y_BYTE],
        },
        buttons,
        dpad: DPad::from_nibble(bytes[BUTTONS_LEFT_BYTE]),
        timestamp,
    })
}

/// Encodes a rumble frame. High band goes in bytes 5-6, low band in 7-8,
/// both little-endian.
pub fn encode_rumble(command: RumbleCommand) -> [u8; RUMBLE_REPORT_LEN] {
    let mut frame = [0u8; RUMBLE_REPORT_LEN];
    frame[..2].copy_from_slice(&RUMBLE_HEADER);
    frame[5..7].copy_from_slice(&command.high_frequency.to_le_bytes());
    frame[7..9].copy_from_slice(&command.low_frequency.to_le_bytes());
    frame
}

pub fn encode_indicator(pattern: IndicatorPattern) -> [u8; INDICATOR_REPORT_LEN] {
    [INDICATOR_SELECTOR, pattern.bits() & 0x0f]
}

pub fn encode_handshake() -> [u8; HANDSHAKE_REPORT_LEN] {
    HANDSHAKE_FRAME
}

/// A command frame together with the report id it must be written under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputReport {
    Handshake,
    Indicator(IndicatorPattern),
    Rumble(RumbleCommand),
}

impl OutputReport {
    pub fn report_id(&self) -> u8 {
        match self {
            OutputReport::Handshake | OutputReport::Indicator(_) => SUBCOMMAND_REPORT_ID,
            OutputReport::Rumble(_) => RUMBLE_REPORT_ID,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            OutputReport::Handshake => encode_handshake().to_vec(),
            OutputReport::Indicator(pattern) => encode_indicator(*pattern).to_vec(),
            OutputReport::Rumble(command) => encode_rumble(*command).to_vec(),
        }
    }
}

impl fmt::Display for OutputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputReport::Handshake => write!(f, "handshake"),
            OutputReport::Indicator(pattern) => write!(f, "indicator 0x{:x}", pattern.bits()),
            OutputReport::Rumble(command) => write!(
                f,
                "rumble low=0x{:x} high=0x{:x} ({}ms)",
                command.low_frequency, command.high_frequency, command.duration_ms
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(bytes: &[(usize, u8)]) -> Vec<u8> {
        let mut buf = vec![0u8; 14];
        buf[3] = 0x08;
        buf[6] = 0x80;
        buf[8] = 0x80;
        buf[10] = 0x80;
        buf[12] = 0x80;
        for (index, value) in bytes {
            buf[*index] = *value;
        }
        buf
    }

    #[test]
    fn short_reports_are_rejected() {
        for len in 0..MIN_INPUT_REPORT_LEN {
            let buf = vec![0xffu8; len];
            assert_eq!(
                decode_input_report(&buf, Duration::ZERO),
                Err(DecodeError::TooShort { len })
            );
        }
        assert!(decode_input_report(&[0u8; MIN_INPUT_REPORT_LEN], Duration::ZERO).is_ok());
    }

    #[test]
    fn byte_one_bit_three_is_a() {
        let state = decode_input_report(&report(&[(1, 0x08)]), Duration::ZERO).unwrap();
        assert_eq!(state.buttons, Buttons::A);
        assert_eq!(state.dpad, DPad::Neutral);
    }

    #[test]
    fn every_layout_entry_decodes_alone() {
        for (index, mask, button) in BUTTON_LAYOUT {
            let mut buf = report(&[]);
            buf[index] |= mask;
            let state = decode_input_report(&buf, Duration::ZERO).unwrap();
            assert_eq!(state.buttons, button, "byte {index} mask 0x{mask:02x}");
        }
    }

    #[test]
    fn dpad_nibble_shares_byte_with_shoulder_buttons() {
        let state = decode_input_report(&report(&[(3, 0x60)]), Duration::ZERO).unwrap();
        assert_eq!(state.dpad, DPad::Up);
        assert_eq!(state.buttons, Buttons::L | Buttons::ZL);

        let state = decode_input_report(&report(&[(3, 0x48)]), Duration::ZERO).unwrap();
        assert_eq!(state.dpad, DPad::Neutral);
        assert_eq!(state.buttons, Buttons::ZL);
    }

    #[test]
    fn dpad_directions_run_clockwise() {
        let expected = [
            DPad::Up,
            DPad::UpRight,
            DPad::Right,
            DPad::DownRight,
            DPad::Down,
            DPad::DownLeft,
            DPad::Left,
            DPad::UpLeft,
        ];
        for (nibble, direction) in expected.iter().enumerate() {
            assert_eq!(DPad::from_nibble(nibble as u8), *direction);
        }
        for nibble in 8..16 {
            assert_eq!(DPad::from_nibble(nibble), DPad::Neutral);
        }
    }

    #[test]
    fn sticks_and_timestamp_are_carried_raw() {
        let buf = report(&[(6, 0x10), (8, 0x20), (10, 0xf0), (12, 0xff)]);
        let state = decode_input_report(&buf, Duration::from_millis(42)).unwrap();
        assert_eq!(state.left_stick, StickPosition { x: 0x10, y: 0x20 });
        assert_eq!(state.right_stick, StickPosition { x: 0xf0, y: 0xff });
        assert_eq!(state.timestamp, Duration::from_millis(42));
    }

    #[test]
    fn rumble_frame_layout() {
        let frame = encode_rumble(RumbleCommand::new(0x1234, 0xabcd, 300));
        assert_eq!(
            frame,
            [0x10, 0x80, 0, 0, 0, 0xcd, 0xab, 0x34, 0x12, 0, 0, 0, 0]
        );
    }

    #[test]
    fn indicator_keeps_low_nibble() {
        assert_eq!(encode_indicator(IndicatorPattern::new(0xff)), [0x01, 0x0f]);
        assert_eq!(encode_indicator(IndicatorPattern::new(0x05)), [0x01, 0x05]);
        assert_eq!(IndicatorPattern::new(0x30).bits(), 0);
    }

    #[test]
    fn output_reports_use_their_report_ids() {
        assert_eq!(OutputReport::Handshake.report_id(), SUBCOMMAND_REPORT_ID);
        assert_eq!(OutputReport::Handshake.encode(), vec![0x80, 0x01]);
        assert_eq!(
            OutputReport::Indicator(IndicatorPattern::FIRST).report_id(),
            SUBCOMMAND_REPORT_ID
        );
        let rumble = OutputReport::Rumble(RumbleCommand::stop());
        assert_eq!(rumble.report_id(), RUMBLE_REPORT_ID);
        assert_eq!(rumble.encode().len(), RUMBLE_REPORT_LEN);
    }
}
