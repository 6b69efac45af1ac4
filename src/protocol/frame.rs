//! # Frame Classification
//!
//! Every BLE notification is one frame. Frames are classified purely from
//! their length and leading bytes; the precedence order of the checks in
//! [`classify`] matters because several signatures overlap (a 4-byte
//! `0xAA .. 0xFF 0xFF` buffer is a diagnostic placeholder, not a simple
//! response).

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;

use super::checksum::{FRAME_HEADER_0, FRAME_HEADER_1};

/// Keep-alive notification payload
pub const KEEP_ALIVE_FRAME: [u8; 2] = [0x00, 0x01];

/// Leading byte of the 8-byte main telemetry frame
pub const MAIN_TELEMETRY_HEADER: u8 = 0x08;

/// Length of the main telemetry frame
pub const MAIN_TELEMETRY_LEN: usize = 8;

/// Leading byte of the 16-byte extended telemetry frame
pub const EXTENDED_TELEMETRY_HEADER: u8 = 0x5A;

/// Length of the extended telemetry frame
pub const EXTENDED_TELEMETRY_LEN: usize = 16;

/// Leading byte of headerless simple responses
pub const SIMPLE_RESPONSE_HEADER: u8 = 0xAA;

/// Minimum length of a protocol response
pub const MIN_PROTOCOL_RESPONSE_LEN: usize = 6;

/// Structural kind of a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameKind {
    /// Zero-length notification
    Empty,
    /// `[0x00, 0x01]` link keep-alive, also the polling trigger
    KeepAlive,
    /// 4-byte frame ending in `0xFF 0xFF`
    DiagnosticPlaceholder,
    /// 8-byte frame starting with `0x08`
    MainTelemetry8,
    /// 16-byte frame starting with `0x5A`
    ExtendedTelemetry16,
    /// Checksummed `0x55 0xAA` response
    ProtocolResponse,
    /// `0xAA`-prefixed response with no checksum
    SimpleResponse,
    /// Anything else
    Unknown,
}

impl FrameKind {
    /// All frame kinds, in classification precedence order.
    pub const ALL: [FrameKind; 8] = [
        FrameKind::Empty,
        FrameKind::KeepAlive,
        FrameKind::DiagnosticPlaceholder,
        FrameKind::MainTelemetry8,
        FrameKind::ExtendedTelemetry16,
        FrameKind::ProtocolResponse,
        FrameKind::SimpleResponse,
        FrameKind::Unknown,
    ];

    /// Position of this kind in [`FrameKind::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether frames of this kind can carry telemetry fields
    pub fn carries_telemetry(self) -> bool {
        matches!(
            self,
            FrameKind::MainTelemetry8 | FrameKind::ExtendedTelemetry16 | FrameKind::ProtocolResponse
        )
    }

    /// Whether this kind may legitimately report a field as zero
    pub fn is_authoritative(self) -> bool {
        self == FrameKind::MainTelemetry8
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::Empty => "empty",
            FrameKind::KeepAlive => "keep-alive",
            FrameKind::DiagnosticPlaceholder => "diagnostic-placeholder",
            FrameKind::MainTelemetry8 => "main-telemetry-8",
            FrameKind::ExtendedTelemetry16 => "extended-telemetry-16",
            FrameKind::ProtocolResponse => "protocol-response",
            FrameKind::SimpleResponse => "simple-response",
            FrameKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Classify a notification buffer
///
/// Total: every input, including the empty slice, maps to exactly one kind.
///
/// # Examples
///
/// ```
/// use scoot_link::protocol::frame::{classify, FrameKind};
///
/// assert_eq!(classify(&[]), FrameKind::Empty);
/// assert_eq!(classify(&[0x00, 0x01]), FrameKind::KeepAlive);
/// assert_eq!(
///     classify(&[0x55, 0xAA, 0x03, 0x22, 0x01, 0x00, 0x20]),
///     FrameKind::ProtocolResponse
/// );
/// ```
pub fn classify(bytes: &[u8]) -> FrameKind {
    let len = bytes.len();

    if len == 0 {
        return FrameKind::Empty;
    }

    if bytes == &KEEP_ALIVE_FRAME[..] {
        return FrameKind::KeepAlive;
    }

    if len == 4 && bytes[2] == 0xFF && bytes[3] == 0xFF {
        return FrameKind::DiagnosticPlaceholder;
    }

    if len == MAIN_TELEMETRY_LEN && bytes[0] == MAIN_TELEMETRY_HEADER {
        return FrameKind::MainTelemetry8;
    }

    if len == EXTENDED_TELEMETRY_LEN && bytes[0] == EXTENDED_TELEMETRY_HEADER {
        return FrameKind::ExtendedTelemetry16;
    }

    if len >= MIN_PROTOCOL_RESPONSE_LEN && bytes[0] == FRAME_HEADER_0 && bytes[1] == FRAME_HEADER_1 {
        return FrameKind::ProtocolResponse;
    }

    if len >= 3 && bytes[0] == SIMPLE_RESPONSE_HEADER {
        return FrameKind::SimpleResponse;
    }

    FrameKind::Unknown
}

/// One received notification and the time it arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: Bytes,
    received_at: DateTime<Utc>,
}

impl RawFrame {
    /// Wrap a received buffer with an explicit receipt time
    pub fn new(bytes: impl Into<Bytes>, received_at: DateTime<Utc>) -> Self {
        Self {
            bytes: bytes.into(),
            received_at,
        }
    }

    /// Wrap a buffer received just now
    pub fn now(bytes: impl Into<Bytes>) -> Self {
        Self::new(bytes, Utc::now())
    }

    /// Parse a frame from a hex string such as `"55aa0322012a08"`
    ///
    /// Whitespace and `:` separators are ignored, so `"55 AA 03"` and
    /// `"55:aa:03"` are accepted too.
    pub fn from_hex(text: &str, received_at: DateTime<Utc>) -> crate::error::Result<Self> {
        let cleaned: String = text
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':')
            .collect();
        let bytes = hex::decode(&cleaned).map_err(|e| {
            crate::error::ScootLinkError::Protocol(format!("Invalid hex frame '{}': {}", text, e))
        })?;
        Ok(Self::new(bytes, received_at))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Structural kind of this frame
    pub fn kind(&self) -> FrameKind {
        classify(&self.bytes)
    }

    /// Lowercase hex rendering for logs
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_empty() {
        assert_eq!(classify(&[]), FrameKind::Empty);
    }

    #[test]
    fn test_classify_keep_alive() {
        assert_eq!(classify(&[0x00, 0x01]), FrameKind::KeepAlive);
        assert_eq!(classify(&[0x00, 0x02]), FrameKind::Unknown);
        assert_eq!(classify(&[0x01, 0x00]), FrameKind::Unknown);
    }

    #[test]
    fn test_classify_diagnostic_placeholder() {
        assert_eq!(classify(&[0x12, 0x34, 0xFF, 0xFF]), FrameKind::DiagnosticPlaceholder);
        assert_eq!(classify(&[0x12, 0x34, 0xFF, 0xFE]), FrameKind::Unknown);
    }

    #[test]
    fn test_classify_placeholder_beats_simple_response() {
        assert_eq!(classify(&[0xAA, 0x00, 0xFF, 0xFF]), FrameKind::DiagnosticPlaceholder);
        assert_eq!(classify(&[0xAA, 0x00, 0xFF, 0x00]), FrameKind::SimpleResponse);
    }

    #[test]
    fn test_classify_main_telemetry() {
        let frame = [0x08, 0x00, 0xF4, 0x01, 0, 0, 0, 0];
        assert_eq!(classify(&frame), FrameKind::MainTelemetry8);

        // Same header, wrong length
        assert_eq!(classify(&[0x08, 0x00, 0xF4, 0x01, 0, 0, 0]), FrameKind::Unknown);
    }

    #[test]
    fn test_classify_extended_telemetry() {
        let mut frame = [0u8; 16];
        frame[0] = 0x5A;
        assert_eq!(classify(&frame), FrameKind::ExtendedTelemetry16);

        let mut frame = [0u8; 15];
        frame[0] = 0x5A;
        assert_eq!(classify(&frame), FrameKind::Unknown);
    }

    #[test]
    fn test_classify_protocol_response() {
        let frame = [0x55, 0xAA, 0x03, 0x22, 0x01, 0x00, 0x20];
        assert_eq!(classify(&frame), FrameKind::ProtocolResponse);

        // Too short for a response even with the right header
        assert_eq!(classify(&[0x55, 0xAA, 0x01, 0x21, 0x20]), FrameKind::Unknown);
    }

    #[test]
    fn test_classify_fixed_size_beats_protocol_header() {
        // A 16-byte frame starting 0x5A never reaches the 0x55 0xAA check,
        // but a 16-byte 0x55 0xAA frame is still a response
        let mut frame = [0u8; 16];
        frame[0] = 0x55;
        frame[1] = 0xAA;
        assert_eq!(classify(&frame), FrameKind::ProtocolResponse);
    }

    #[test]
    fn test_classify_simple_response() {
        assert_eq!(classify(&[0xAA, 0x01, 0x02]), FrameKind::SimpleResponse);
        assert_eq!(classify(&[0xAA, 0x01]), FrameKind::Unknown);
    }

    #[test]
    fn test_classify_total_over_lengths() {
        for len in 0..=64 {
            for fill in [0x00u8, 0x55, 0xAA, 0xFF] {
                let frame = vec![fill; len];
                let _ = classify(&frame);
            }
        }
    }

    #[test]
    fn test_frame_kind_index_matches_all() {
        for (i, kind) in FrameKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_raw_frame_from_hex() {
        let frame = RawFrame::from_hex("55 AA 03 22 01 00 20", Utc::now()).unwrap();
        assert_eq!(frame.bytes(), &[0x55, 0xAA, 0x03, 0x22, 0x01, 0x00, 0x20]);
        assert_eq!(frame.kind(), FrameKind::ProtocolResponse);
        assert_eq!(frame.to_hex(), "55aa0322010020");

        let frame = RawFrame::from_hex("00:01", Utc::now()).unwrap();
        assert_eq!(frame.kind(), FrameKind::KeepAlive);
    }

    #[test]
    fn test_raw_frame_from_bad_hex() {
        assert!(RawFrame::from_hex("5", Utc::now()).is_err());
        assert!(RawFrame::from_hex("zz", Utc::now()).is_err());
    }
}
