//! # Field Layouts
//!
//! The fixed-size telemetry frames have no published layout, and different
//! firmware revisions disagree on offsets, widths, scale factors and even
//! the temperature encoding. Rather than hard-coding one guess, each frame
//! kind is decoded through a list of [`FieldLayout`]s selected per device
//! variant in configuration.
//!
//! The built-in default reproduces the layout observed on the reference
//! controller:
//!
//! | Field   | Offset | Width | Raw range | Scale            |
//! |---------|--------|-------|-----------|------------------|
//! | Speed   | 2      | u16le | 1..=8000  | ÷100 × 2.56 km/h |
//! | Voltage | 6      | u16le | 200..=700 | ÷10 V            |
//!
//! The extended 16-byte frame has no established mapping and defaults to
//! no fields.

use serde::Deserialize;

use crate::telemetry::update::{FieldId, FieldUpdate};

/// Empirical speed factor of the main frame (raw/100 × 2.56)
pub const MAIN_SPEED_SCALE: f64 = 2.56 / 100.0;

/// How raw integer bits turn into a base value before scaling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawEncoding {
    /// Raw value as-is
    #[default]
    #[serde(alias = "raw")]
    Unsigned,
    /// Two's complement over the field width
    Signed,
    /// `raw - 40`, a common temperature encoding
    Offset40,
    /// `(raw - 20) / 10`, seen on one temperature variant
    Offset20Tenths,
}

impl RawEncoding {
    /// Apply this encoding to a raw little-endian value of `width` bytes
    pub fn apply(self, raw: u32, width: usize) -> f64 {
        match self {
            RawEncoding::Unsigned => f64::from(raw),
            RawEncoding::Signed => match width {
                1 => f64::from(raw as u8 as i8),
                2 => f64::from(raw as u16 as i16),
                _ => f64::from(raw as i32),
            },
            RawEncoding::Offset40 => f64::from(raw) - 40.0,
            RawEncoding::Offset20Tenths => (f64::from(raw) - 20.0) / 10.0,
        }
    }
}

/// Where one field lives in a fixed-size frame and how to scale it
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldLayout {
    pub field: FieldId,
    pub offset: usize,
    /// Bytes, little-endian: 1, 2 or 4
    #[serde(default = "default_width")]
    pub width: usize,
    /// Multiplier applied after the encoding
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Reject raw values below this
    #[serde(default)]
    pub min_raw: Option<u32>,
    /// Reject raw values above this
    #[serde(default)]
    pub max_raw: Option<u32>,
    #[serde(default)]
    pub encoding: RawEncoding,
}

fn default_width() -> usize { 2 }
fn default_scale() -> f64 { 1.0 }

impl FieldLayout {
    pub fn new(field: FieldId, offset: usize, width: usize, scale: f64) -> Self {
        Self {
            field,
            offset,
            width,
            scale,
            min_raw: None,
            max_raw: None,
            encoding: RawEncoding::Unsigned,
        }
    }

    /// Restrict accepted raw values to `min..=max`
    pub fn with_raw_range(mut self, min: u32, max: u32) -> Self {
        self.min_raw = Some(min);
        self.max_raw = Some(max);
        self
    }

    pub fn with_encoding(mut self, encoding: RawEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Read the raw little-endian value, if the frame is long enough
    pub fn read_raw(&self, frame: &[u8]) -> Option<u32> {
        read_le(frame, self.offset, self.width)
    }

    /// Decode this field from a frame
    ///
    /// `None` when the frame is too short, the raw value is outside the
    /// accepted range, or the field cannot be expressed numerically.
    pub fn decode(&self, frame: &[u8]) -> Option<FieldUpdate> {
        let raw = self.read_raw(frame)?;

        if self.min_raw.is_some_and(|min| raw < min) || self.max_raw.is_some_and(|max| raw > max) {
            return None;
        }

        let value = self.encoding.apply(raw, self.width) * self.scale;
        FieldUpdate::from_numeric(self.field, value)
    }

    /// Check this layout against a frame size
    pub fn check(&self, frame_len: usize) -> std::result::Result<(), String> {
        if !matches!(self.width, 1 | 2 | 4) {
            return Err(format!("{}: width must be 1, 2 or 4 (got {})", self.field, self.width));
        }
        if self.offset.saturating_add(self.width) > frame_len {
            return Err(format!(
                "{}: offset {} + width {} exceeds frame length {}",
                self.field, self.offset, self.width, frame_len
            ));
        }
        if !self.field.is_numeric() {
            return Err(format!("{}: not a numeric field", self.field));
        }
        if !self.scale.is_finite() || self.scale == 0.0 {
            return Err(format!("{}: scale must be finite and non-zero", self.field));
        }
        if let (Some(min), Some(max)) = (self.min_raw, self.max_raw) {
            if min > max {
                return Err(format!("{}: min_raw {} exceeds max_raw {}", self.field, min, max));
            }
        }
        Ok(())
    }
}

/// Read a little-endian unsigned integer of 1, 2 or 4 bytes
pub fn read_le(frame: &[u8], offset: usize, width: usize) -> Option<u32> {
    let end = offset.checked_add(width)?;
    let bytes = frame.get(offset..end)?;

    match width {
        1 => Some(u32::from(bytes[0])),
        2 => Some(u32::from(u16::from_le_bytes([bytes[0], bytes[1]]))),
        4 => Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        _ => None,
    }
}

/// Layouts for both fixed-size frame kinds of one device variant
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecoderCalibration {
    /// Free-form label for logs
    #[serde(default = "default_variant")]
    pub variant: String,

    #[serde(default = "default_main_frame")]
    pub main_frame: Vec<FieldLayout>,

    #[serde(default)]
    pub extended_frame: Vec<FieldLayout>,
}

fn default_variant() -> String { "reference".to_string() }

fn default_main_frame() -> Vec<FieldLayout> {
    vec![
        FieldLayout::new(FieldId::Speed, 2, 2, MAIN_SPEED_SCALE).with_raw_range(1, 8000),
        FieldLayout::new(FieldId::Voltage, 6, 2, 0.1).with_raw_range(200, 700),
    ]
}

impl Default for DecoderCalibration {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            main_frame: default_main_frame(),
            extended_frame: Vec::new(),
        }
    }
}
