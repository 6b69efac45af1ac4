//! # Heuristic Field Scanner
//!
//! Operator tool for bootstrapping a layout for an unseen controller
//! variant. Given frames captured while the true values are known (read off
//! the dashboard, a multimeter, the odometer), it proposes byte windows that
//! plausibly hold each value.
//!
//! | Field       | Window      | Raw compared against     |
//! |-------------|-------------|--------------------------|
//! | Battery %   | 1 byte      | percent                  |
//! | Temperature | 1 byte      | °C, as-is or `raw - 40`  |
//! | Voltage     | 2 bytes LE  | volts × 10               |
//! | Speed       | 2 bytes LE  | km/h × 100               |
//! | Odometer    | 4 bytes LE  | km × 100 (decameters)    |
//!
//! A single frame produces plenty of coincidences; run
//! [`scan_many`](FieldScanner::scan_many) over a capture and trust the
//! offsets that keep matching.
//!
//! ## Usage
//!
//! ```
//! use scoot_link::scanner::{scan, CalibrationTarget, MatchQuality, ScanField};
//!
//! let mut frame = [0u8; 16];
//! frame[5..9].copy_from_slice(&35600u32.to_le_bytes());
//!
//! let target = CalibrationTarget { odometer_km: Some(356.0), ..Default::default() };
//! let candidates = scan(&frame, &target);
//! let best = candidates.best(ScanField::Odometer).unwrap();
//! assert_eq!(best.offset, 5);
//! assert_eq!(best.quality, MatchQuality::Exact);
//! ```

pub mod frequency;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::protocol::layout::{read_le, RawEncoding};
use crate::telemetry::update::FieldId;

pub use frequency::{FrequencyReport, OffsetFrequency, DEFAULT_STABLE_RATIO};

/// Relative slack when deciding a raw value equals the scaled target
const EXACT_EPSILON: f64 = 1e-6;

/// Known-true reference values for one capture session
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CalibrationTarget {
    #[serde(default)]
    pub odometer_km: Option<f64>,
    #[serde(default)]
    pub battery_percent: Option<f64>,
    #[serde(default)]
    pub voltage: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub speed_kmh: Option<f64>,
}

impl CalibrationTarget {
    pub fn is_empty(&self) -> bool {
        ScanField::ALL.iter().all(|field| field.target(self).is_none())
    }
}

/// How far a decoded value may sit from its target and still be reported
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScanTolerances {
    #[serde(default = "default_percent_tolerance")]
    pub percent: f64,
    #[serde(default = "default_temperature_tolerance")]
    pub temperature: f64,
    /// Volts
    #[serde(default = "default_voltage_tolerance")]
    pub voltage: f64,
    /// km/h
    #[serde(default = "default_speed_tolerance")]
    pub speed: f64,
    /// km
    #[serde(default = "default_odometer_tolerance")]
    pub odometer: f64,
}

fn default_percent_tolerance() -> f64 { 1.0 }
fn default_temperature_tolerance() -> f64 { 2.0 }
fn default_voltage_tolerance() -> f64 { 0.5 }
fn default_speed_tolerance() -> f64 { 0.5 }
fn default_odometer_tolerance() -> f64 { 0.5 }

impl Default for ScanTolerances {
    fn default() -> Self {
        Self {
            percent: default_percent_tolerance(),
            temperature: default_temperature_tolerance(),
            voltage: default_voltage_tolerance(),
            speed: default_speed_tolerance(),
            odometer: default_odometer_tolerance(),
        }
    }
}

/// Fields the scanner knows how to look for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScanField {
    BatteryPercent,
    Temperature,
    Voltage,
    Speed,
    Odometer,
}

impl ScanField {
    pub const ALL: [ScanField; 5] = [
        ScanField::BatteryPercent,
        ScanField::Temperature,
        ScanField::Voltage,
        ScanField::Speed,
        ScanField::Odometer,
    ];

    /// Window width in bytes
    pub fn width(self) -> usize {
        match self {
            ScanField::BatteryPercent | ScanField::Temperature => 1,
            ScanField::Voltage | ScanField::Speed => 2,
            ScanField::Odometer => 4,
        }
    }

    /// Raw units per display unit
    pub fn raw_factor(self) -> f64 {
        match self {
            ScanField::BatteryPercent | ScanField::Temperature => 1.0,
            ScanField::Voltage => 10.0,
            ScanField::Speed | ScanField::Odometer => 100.0,
        }
    }

    /// Encodings worth trying for this field
    pub fn encodings(self) -> &'static [RawEncoding] {
        match self {
            ScanField::Temperature => &[RawEncoding::Unsigned, RawEncoding::Offset40],
            _ => &[RawEncoding::Unsigned],
        }
    }

    pub fn field_id(self) -> FieldId {
        match self {
            ScanField::BatteryPercent => FieldId::BatteryPercent,
            ScanField::Temperature => FieldId::Temperature,
            ScanField::Voltage => FieldId::Voltage,
            ScanField::Speed => FieldId::Speed,
            ScanField::Odometer => FieldId::OdometerKm,
        }
    }

    pub fn target(self, targets: &CalibrationTarget) -> Option<f64> {
        match self {
            ScanField::BatteryPercent => targets.battery_percent,
            ScanField::Temperature => targets.temperature,
            ScanField::Voltage => targets.voltage,
            ScanField::Speed => targets.speed_kmh,
            ScanField::Odometer => targets.odometer_km,
        }
    }

    pub fn tolerance(self, tolerances: &ScanTolerances) -> f64 {
        match self {
            ScanField::BatteryPercent => tolerances.percent,
            ScanField::Temperature => tolerances.temperature,
            ScanField::Voltage => tolerances.voltage,
            ScanField::Speed => tolerances.speed,
            ScanField::Odometer => tolerances.odometer,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScanField::BatteryPercent => "battery",
            ScanField::Temperature => "temperature",
            ScanField::Voltage => "voltage",
            ScanField::Speed => "speed",
            ScanField::Odometer => "odometer",
        }
    }
}

impl fmt::Display for ScanField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How closely a window matched its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchQuality {
    /// Raw value equals the scaled target
    Exact,
    /// Decoded value within tolerance of the target
    Near,
}

/// One byte window that plausibly encodes a field
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub field: ScanField,
    pub offset: usize,
    pub width: usize,
    pub encoding: RawEncoding,
    pub raw: u32,
    /// Value in display units
    pub decoded_value: f64,
    pub quality: MatchQuality,
    /// `|decoded_value - target|`
    pub distance: f64,
}

/// Per-field candidates for one frame, best first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedCandidates {
    by_field: BTreeMap<ScanField, Vec<Candidate>>,
}

impl RankedCandidates {
    pub fn get(&self, field: ScanField) -> &[Candidate] {
        self.by_field.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn best(&self, field: ScanField) -> Option<&Candidate> {
        self.get(field).first()
    }

    /// Fields that produced at least one candidate
    pub fn fields(&self) -> impl Iterator<Item = ScanField> + '_ {
        self.by_field
            .iter()
            .filter(|(_, candidates)| !candidates.is_empty())
            .map(|(field, _)| *field)
    }

    pub fn is_empty(&self) -> bool {
        self.by_field.values().all(Vec::is_empty)
    }
}

/// Scanner configured with match tolerances
#[derive(Debug, Clone, Default)]
pub struct FieldScanner {
    tolerances: ScanTolerances,
}

impl FieldScanner {
    pub fn new(tolerances: ScanTolerances) -> Self {
        Self { tolerances }
    }

    pub fn tolerances(&self) -> &ScanTolerances {
        &self.tolerances
    }

    /// Propose windows in one frame for every field with a target
    ///
    /// Candidates are ordered exact matches first, then by distance from
    /// the target, then by offset. Zero targets are skipped: every zero
    /// byte would match them.
    pub fn scan(&self, frame: &[u8], targets: &CalibrationTarget) -> RankedCandidates {
        let mut ranked = RankedCandidates::default();

        for field in ScanField::ALL {
            let Some(target) = field.target(targets) else {
                continue;
            };
            if target == 0.0 || !target.is_finite() {
                continue;
            }

            let mut candidates = self.scan_field(frame, field, target);
            candidates.sort_by(|a, b| {
                a.quality
                    .cmp(&b.quality)
                    .then(a.distance.total_cmp(&b.distance))
                    .then(a.offset.cmp(&b.offset))
            });
            ranked.by_field.insert(field, candidates);
        }

        ranked
    }

    fn scan_field(&self, frame: &[u8], field: ScanField, target: f64) -> Vec<Candidate> {
        let width = field.width();
        let factor = field.raw_factor();
        let tolerance = field.tolerance(&self.tolerances);
        let expected = target * factor;
        let mut candidates = Vec::new();

        if frame.len() < width {
            return candidates;
        }

        for offset in 0..=frame.len() - width {
            let Some(raw) = read_le(frame, offset, width) else {
                continue;
            };

            for &encoding in field.encodings() {
                let base = encoding.apply(raw, width);
                let decoded_value = base / factor;
                let distance = (decoded_value - target).abs();

                let quality = if (base - expected).abs() <= EXACT_EPSILON * expected.abs().max(1.0) {
                    MatchQuality::Exact
                } else if distance <= tolerance {
                    MatchQuality::Near
                } else {
                    continue;
                };

                candidates.push(Candidate {
                    field,
                    offset,
                    width,
                    encoding,
                    raw,
                    decoded_value,
                    quality,
                    distance,
                });
            }
        }

        candidates
    }
}

/// Scan one frame with default tolerances
pub fn scan(frame: &[u8], targets: &CalibrationTarget) -> RankedCandidates {
    FieldScanner::default().scan(frame, targets)
}

/// Tally candidate offsets across frames with default tolerances
pub fn scan_many<F: AsRef<[u8]>>(frames: &[F], targets: &CalibrationTarget) -> FrequencyReport {
    FieldScanner::default().scan_many(frames, targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_odometer_exact() {
        let mut frame = [0u8; 12];
        frame[5..9].copy_from_slice(&35600u32.to_le_bytes());

        let target = CalibrationTarget {
            odometer_km: Some(356.00),
            ..Default::default()
        };
        let ranked = scan(&frame, &target);
        let best = ranked.best(ScanField::Odometer).unwrap();

        assert_eq!(best.offset, 5);
        assert_eq!(best.width, 4);
        assert_eq!(best.raw, 35600);
        assert_eq!(best.quality, MatchQuality::Exact);
        assert!((best.decoded_value - 356.0).abs() < 1e-9);
    }

    #[test]
    fn test_scan_exact_before_near() {
        // 87 exact at offset 3, 86 near at offset 1
        let frame = [0x00, 86, 0x00, 87, 0x00];
        let target = CalibrationTarget {
            battery_percent: Some(87.0),
            ..Default::default()
        };
        let candidates = scan(&frame, &target);
        let battery = candidates.get(ScanField::BatteryPercent);

        assert_eq!(battery.len(), 2);
        assert_eq!(battery[0].offset, 3);
        assert_eq!(battery[0].quality, MatchQuality::Exact);
        assert_eq!(battery[1].offset, 1);
        assert_eq!(battery[1].quality, MatchQuality::Near);
    }

    #[test]
    fn test_scan_near_sorted_by_distance() {
        let frame = 482u16
            .to_le_bytes()
            .into_iter()
            .chain(0u16.to_le_bytes())
            .chain(479u16.to_le_bytes())
            .collect::<Vec<u8>>();
        let target = CalibrationTarget {
            voltage: Some(48.1),
            ..Default::default()
        };
        let ranked = scan(&frame, &target);
        let voltage = ranked.get(ScanField::Voltage);

        // 48.2 (offset 0) is closer than 47.9 (offset 4)
        assert_eq!(voltage.len(), 2);
        assert_eq!(voltage[0].offset, 0);
        assert_eq!(voltage[1].offset, 4);
        assert!(voltage.iter().all(|c| c.quality == MatchQuality::Near));
    }

    #[test]
    fn test_scan_voltage_exact_with_fraction() {
        let frame = 483u16.to_le_bytes();
        let target = CalibrationTarget {
            voltage: Some(48.3),
            ..Default::default()
        };
        let best = scan(&frame, &target).best(ScanField::Voltage).cloned().unwrap();
        assert_eq!(best.quality, MatchQuality::Exact);
    }

    #[test]
    fn test_scan_temperature_offset40() {
        // 25 °C encoded as raw 65
        let frame = [0x00, 65, 0x00];
        let target = CalibrationTarget {
            temperature: Some(25.0),
            ..Default::default()
        };
        let best = scan(&frame, &target).best(ScanField::Temperature).cloned().unwrap();
        assert_eq!(best.offset, 1);
        assert_eq!(best.encoding, RawEncoding::Offset40);
        assert_eq!(best.quality, MatchQuality::Exact);
    }

    #[test]
    fn test_scan_speed() {
        let mut frame = vec![0u8; 8];
        frame[2..4].copy_from_slice(&1250u16.to_le_bytes());
        let target = CalibrationTarget {
            speed_kmh: Some(12.5),
            ..Default::default()
        };
        let best = scan(&frame, &target).best(ScanField::Speed).cloned().unwrap();
        assert_eq!(best.offset, 2);
        assert_eq!(best.quality, MatchQuality::Exact);
    }

    #[test]
    fn test_scan_skips_missing_and_zero_targets() {
        let frame = [0u8; 8];
        let target = CalibrationTarget {
            speed_kmh: Some(0.0),
            ..Default::default()
        };
        let ranked = scan(&frame, &target);
        assert!(ranked.is_empty());
        assert_eq!(ranked.fields().count(), 0);
    }

    #[test]
    fn test_scan_short_frames() {
        let target = CalibrationTarget {
            odometer_km: Some(356.0),
            battery_percent: Some(50.0),
            ..Default::default()
        };
        assert!(scan(&[], &target).is_empty());
        assert!(scan(&[0x00, 0x01, 0x02], &target).get(ScanField::Odometer).is_empty());
    }

    #[test]
    fn test_custom_tolerances() {
        let frame = [80u8];
        let target = CalibrationTarget {
            battery_percent: Some(85.0),
            ..Default::default()
        };
        assert!(scan(&frame, &target).is_empty());

        let scanner = FieldScanner::new(ScanTolerances {
            percent: 5.0,
            ..Default::default()
        });
        assert_eq!(scanner.scan(&frame, &target).get(ScanField::BatteryPercent).len(), 1);
    }

    #[test]
    fn test_calibration_target_is_empty() {
        assert!(CalibrationTarget::default().is_empty());
        let target = CalibrationTarget {
            voltage: Some(48.0),
            ..Default::default()
        };
        assert!(!target.is_empty());
    }
}
