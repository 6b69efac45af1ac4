//! # XOR Checksum
//!
//! Single-byte XOR checksum used by `0x55 0xAA` protocol frames.
//!
//! ```text
//! [0x55][0xAA][length][opcode][subopcode?][payload...][checksum]
//!             |<------------- XOR range ------------->|
//! ```
//!
//! The checksum covers everything after the two header bytes up to, but not
//! including, the checksum byte itself.

use crate::error::{Result, ScootLinkError};

/// First header byte of a protocol frame
pub const FRAME_HEADER_0: u8 = 0x55;

/// Second header byte of a protocol frame
pub const FRAME_HEADER_1: u8 = 0xAA;

/// Minimum checksummed frame: header(2) + length(1) + opcode(1) + checksum(1)
pub const MIN_CHECKED_FRAME_LEN: usize = 5;

/// Largest frame we will build, bounded by the negotiated BLE MTU
pub const MAX_FRAME_LEN: usize = 180;

/// Frames shorter than this have no defined checksum
const MIN_CHECKSUM_INPUT_LEN: usize = 4;

/// XOR every byte of `data` together.
fn xor_fold(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &byte| acc ^ byte)
}

/// Compute the checksum a frame should carry
///
/// XOR of the bytes in `[2, len - 1)`. Returns `0` for frames shorter than
/// four bytes, where the checksum is undefined.
///
/// # Examples
///
/// ```
/// use scoot_link::protocol::checksum::compute;
///
/// let frame = [0x55, 0xAA, 0x03, 0x22, 0x01, 0x00, 0x20];
/// assert_eq!(compute(&frame), 0x20);
/// ```
pub fn compute(frame: &[u8]) -> u8 {
    if frame.len() < MIN_CHECKSUM_INPUT_LEN {
        return 0;
    }

    xor_fold(&frame[2..frame.len() - 1])
}

/// Check the trailing checksum byte of a frame
///
/// Always `false` for frames shorter than [`MIN_CHECKED_FRAME_LEN`].
pub fn validate(frame: &[u8]) -> bool {
    match frame.last() {
        Some(&last) if frame.len() >= MIN_CHECKED_FRAME_LEN => last == compute(frame),
        _ => false,
    }
}

/// Assemble a complete outbound protocol frame
///
/// Layout: header, length (opcode + optional subopcode + payload), opcode,
/// subopcode, payload, checksum over everything after the header.
///
/// # Errors
///
/// Returns error if the frame would exceed [`MAX_FRAME_LEN`].
///
/// # Examples
///
/// ```
/// use scoot_link::protocol::checksum::{build, validate};
///
/// let frame = build(0x22, Some(0x01), &[]).unwrap();
/// assert_eq!(frame, vec![0x55, 0xAA, 0x02, 0x22, 0x01, 0x21]);
/// assert!(validate(&frame));
/// ```
pub fn build(opcode: u8, subopcode: Option<u8>, payload: &[u8]) -> Result<Vec<u8>> {
    let length = 1 + usize::from(subopcode.is_some()) + payload.len();
    let total = 2 + 1 + length + 1;

    if total > MAX_FRAME_LEN {
        return Err(ScootLinkError::Protocol(format!(
            "Frame size {} exceeds maximum {}",
            total, MAX_FRAME_LEN
        )));
    }

    let mut frame = Vec::with_capacity(total);
    frame.push(FRAME_HEADER_0);
    frame.push(FRAME_HEADER_1);
    frame.push(length as u8);
    frame.push(opcode);
    if let Some(sub) = subopcode {
        frame.push(sub);
    }
    frame.extend_from_slice(payload);

    let checksum = xor_fold(&frame[2..]);
    frame.push(checksum);

    Ok(frame)
}
