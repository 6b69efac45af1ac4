//! # Telemetry Decoder
//!
//! Turns a classified frame into a [`PartialUpdate`].
//!
//! Decoding never fails. A frame that is corrupt, truncated or simply not
//! understood yields an empty update, and the reason is reported as a
//! [`DecodeIssue`] for the diagnostic context.
//!
//! ## Protocol responses
//!
//! | Opcode | Sub  | Field          | Bytes     | Scale | Accepted      |
//! |--------|------|----------------|-----------|-------|---------------|
//! | 0x22   | 0x01 | Battery %      | `[5]`     | 1     | ≤ 100         |
//! | 0x22   | 0x01 | Voltage        | `[6..=7]` | ÷100  | 0..=100 V     |
//! | 0x22   | 0x31 | Battery %      | `[5]`     | 1     | ≤ 100         |
//! | 0x22   | 0x29 | Odometer km    | `[6..=7]` | ÷10   |               |
//! | 0x22   | 0x1A | Temperature °C | `[5]`     | 1     |               |
//! | 0x21   | -    | Speed km/h     | `[5..=6]` | ÷100  |               |
//! | 0x21   | -    | Current A      | `[7..=8]` | ÷100  |               |
//!
//! All multi-byte values are little-endian. Fixed-size frames go through
//! the configured [`DecoderCalibration`].

use std::fmt;
use tracing::debug;

use super::checksum;
use super::commands::{
    OPCODE_INFO, OPCODE_REALTIME, SUB_INFO_BATTERY, SUB_INFO_BATTERY_VOLTAGE, SUB_INFO_ODOMETER,
    SUB_INFO_TEMPERATURE,
};
use super::frame::FrameKind;
use super::layout::{read_le, DecoderCalibration, FieldLayout};
use crate::telemetry::update::{FieldUpdate, PartialUpdate};

/// Offset of the length byte in a protocol response
const LENGTH_INDEX: usize = 2;

/// Offset of the opcode in a protocol response
const OPCODE_INDEX: usize = 3;

/// Offset of the subopcode in a protocol response
const SUBOPCODE_INDEX: usize = 4;

/// Why a frame contributed no telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeIssue {
    /// Frame too short or internally inconsistent for its kind
    MalformedFrame,
    /// Trailing checksum byte did not match
    ChecksumMismatch { expected: u8, actual: u8 },
    /// Valid frame with an opcode/subopcode we have no mapping for
    UnrecognizedOpcode { opcode: u8, subopcode: Option<u8> },
}

impl fmt::Display for DecodeIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeIssue::MalformedFrame => f.write_str("malformed frame"),
            DecodeIssue::ChecksumMismatch { expected, actual } => write!(
                f,
                "checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
                expected, actual
            ),
            DecodeIssue::UnrecognizedOpcode { opcode, subopcode: Some(sub) } => {
                write!(f, "unrecognized opcode 0x{:02X}/0x{:02X}", opcode, sub)
            }
            DecodeIssue::UnrecognizedOpcode { opcode, subopcode: None } => {
                write!(f, "unrecognized opcode 0x{:02X}", opcode)
            }
        }
    }
}

/// Result of decoding one frame
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeResult {
    pub update: PartialUpdate,
    pub issue: Option<DecodeIssue>,
}

impl DecodeResult {
    fn fields(update: PartialUpdate) -> Self {
        Self { update, issue: None }
    }

    fn rejected(source: FrameKind, issue: DecodeIssue) -> Self {
        Self {
            update: PartialUpdate::empty(source),
            issue: Some(issue),
        }
    }

    /// Whether the frame passed structural and checksum validation
    pub fn is_valid(&self) -> bool {
        !matches!(
            self.issue,
            Some(DecodeIssue::MalformedFrame) | Some(DecodeIssue::ChecksumMismatch { .. })
        )
    }
}

/// Decoder for one device variant
#[derive(Debug, Clone, Default)]
pub struct TelemetryDecoder {
    calibration: DecoderCalibration,
}

impl TelemetryDecoder {
    /// Create a decoder using the given fixed-frame layouts
    pub fn new(calibration: DecoderCalibration) -> Self {
        Self { calibration }
    }

    pub fn calibration(&self) -> &DecoderCalibration {
        &self.calibration
    }

    /// Decode a classified frame
    ///
    /// # Arguments
    ///
    /// * `kind` - Kind returned by [`classify`](super::frame::classify) for `bytes`
    /// * `bytes` - Complete frame as received
    ///
    /// # Returns
    ///
    /// * `DecodeResult` - Possibly empty update, plus the reason if nothing was decoded
    pub fn decode(&self, kind: FrameKind, bytes: &[u8]) -> DecodeResult {
        match kind {
            FrameKind::ProtocolResponse => decode_protocol_response(bytes),
            FrameKind::MainTelemetry8 => decode_fixed(kind, bytes, &self.calibration.main_frame),
            FrameKind::ExtendedTelemetry16 => {
                decode_fixed(kind, bytes, &self.calibration.extended_frame)
            }
            FrameKind::Empty
            | FrameKind::KeepAlive
            | FrameKind::DiagnosticPlaceholder
            | FrameKind::SimpleResponse
            | FrameKind::Unknown => DecodeResult::fields(PartialUpdate::empty(kind)),
        }
    }
}

/// Decode with the default calibration, discarding the issue
///
/// # Examples
///
/// ```
/// use scoot_link::protocol::decoder::decode;
/// use scoot_link::protocol::frame::FrameKind;
/// use scoot_link::telemetry::update::FieldId;
///
/// let frame = [0x55, 0xAA, 0x03, 0x22, 0x01, 42, 0x03 ^ 0x22 ^ 0x01 ^ 42];
/// let update = decode(FrameKind::ProtocolResponse, &frame);
/// assert_eq!(update.value(FieldId::BatteryPercent), Some(42.0));
/// ```
pub fn decode(kind: FrameKind, bytes: &[u8]) -> PartialUpdate {
    TelemetryDecoder::default().decode(kind, bytes).update
}

/// Decode a checksummed `0x55 0xAA` response
fn decode_protocol_response(frame: &[u8]) -> DecodeResult {
    let source = FrameKind::ProtocolResponse;

    if frame.len() < checksum::MIN_CHECKED_FRAME_LEN {
        return DecodeResult::rejected(source, DecodeIssue::MalformedFrame);
    }

    if !checksum::validate(frame) {
        let expected = checksum::compute(frame);
        let actual = frame[frame.len() - 1];
        debug!(
            "Discarding response {}: checksum 0x{:02X} != 0x{:02X}",
            hex::encode(frame),
            actual,
            expected
        );
        return DecodeResult::rejected(source, DecodeIssue::ChecksumMismatch { expected, actual });
    }

    let length = frame[LENGTH_INDEX] as usize;
    let checksum_index = frame.len() - 1;

    // The length byte counts opcode through payload; it must at least cover
    // the opcode and must not claim bytes past the checksum
    if length == 0 || OPCODE_INDEX + length > checksum_index {
        return DecodeResult::rejected(source, DecodeIssue::MalformedFrame);
    }

    let body = &frame[..OPCODE_INDEX + length];
    let opcode = body[OPCODE_INDEX];
    let subopcode = if length >= 2 { Some(body[SUBOPCODE_INDEX]) } else { None };

    let mut update = PartialUpdate::empty(source);

    match (opcode, subopcode) {
        (OPCODE_INFO, Some(SUB_INFO_BATTERY_VOLTAGE)) => {
            push_battery(&mut update, body);
            if let Some(raw) = read_le(body, 6, 2) {
                let volts = f64::from(raw) / 100.0;
                if (0.0..=100.0).contains(&volts) {
                    update.push(FieldUpdate::Voltage(volts));
                }
            }
        }
        (OPCODE_INFO, Some(SUB_INFO_BATTERY)) => push_battery(&mut update, body),
        (OPCODE_INFO, Some(SUB_INFO_ODOMETER)) => {
            if let Some(raw) = read_le(body, 6, 2) {
                update.push(FieldUpdate::OdometerKm(f64::from(raw) / 10.0));
            }
        }
        (OPCODE_INFO, Some(SUB_INFO_TEMPERATURE)) => {
            if let Some(raw) = read_le(body, 5, 1) {
                update.push(FieldUpdate::Temperature(f64::from(raw)));
            }
        }
        (OPCODE_REALTIME, _) => {
            // A checksummed realtime reply is the controller's own reading,
            // so zero speed here means standing still
            update.mark_authoritative();
            if let Some(raw) = read_le(body, 5, 2) {
                update.push(FieldUpdate::Speed(f64::from(raw) / 100.0));
            }
            if let Some(raw) = read_le(body, 7, 2) {
                update.push(FieldUpdate::Current(f64::from(raw) / 100.0));
            }
        }
        _ => {
            debug!("Retaining unrecognized response {} for diagnostics", hex::encode(frame));
            return DecodeResult::rejected(
                source,
                DecodeIssue::UnrecognizedOpcode { opcode, subopcode },
            );
        }
    }

    DecodeResult::fields(update)
}

fn push_battery(update: &mut PartialUpdate, body: &[u8]) {
    if let Some(raw) = read_le(body, 5, 1) {
        if raw <= 100 {
            update.push(FieldUpdate::BatteryPercent(f64::from(raw)));
        }
    }
}

/// Decode a fixed-size frame through its configured layouts
fn decode_fixed(kind: FrameKind, frame: &[u8], layouts: &[FieldLayout]) -> DecodeResult {
    let mut update = PartialUpdate::empty(kind);

    for layout in layouts {
        if let Some(field) = layout.decode(frame) {
            update.push(field);
        }
    }

    DecodeResult::fields(update)
}
