//! Cross-frame frequency analysis for scanner candidates
//!
//! A window that matches the dashboard value in one frame is probably a
//! coincidence. A window that matches in 37 of 40 frames is probably the
//! field.

use std::collections::BTreeMap;
use tracing::debug;

use super::{CalibrationTarget, FieldScanner, MatchQuality, ScanField};
use crate::protocol::layout::{FieldLayout, RawEncoding};

/// Share of frames an offset must match to be called stable
pub const DEFAULT_STABLE_RATIO: f64 = 0.75;

/// How often one window matched across a capture
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetFrequency {
    pub offset: usize,
    pub width: usize,
    pub encoding: RawEncoding,
    /// Frames where this window matched (exact or near)
    pub hits: usize,
    /// Frames where this window matched exactly
    pub exact_hits: usize,
}

/// Aggregate of [`FieldScanner::scan`] over many frames
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrequencyReport {
    frames_scanned: usize,
    /// Fields that had a usable target
    targeted: Vec<ScanField>,
    by_field: BTreeMap<ScanField, Vec<OffsetFrequency>>,
}

impl FrequencyReport {
    pub fn frames_scanned(&self) -> usize {
        self.frames_scanned
    }

    /// Offsets for a field, most frequent first
    pub fn offsets(&self, field: ScanField) -> &[OffsetFrequency] {
        self.by_field.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Most frequent offset if it matched at least `min_ratio` of frames
    pub fn stable(&self, field: ScanField, min_ratio: f64) -> Option<&OffsetFrequency> {
        let top = self.offsets(field).first()?;
        if self.frames_scanned == 0 {
            return None;
        }
        let ratio = top.hits as f64 / self.frames_scanned as f64;
        (ratio >= min_ratio).then_some(top)
    }

    /// Human-readable findings, one line per targeted field
    ///
    /// # Examples
    ///
    /// ```text
    /// odometer stable at offset 9 across 37/40 frames
    /// temperature stable at offset 4 (offset40) across 40/40 frames
    /// voltage: no stable offset, best guess offset 6 in 12/40 frames
    /// speed: no candidates in 40 frames
    /// ```
    pub fn recommendations(&self) -> Vec<String> {
        self.targeted
            .iter()
            .map(|&field| self.recommend(field))
            .collect()
    }

    fn recommend(&self, field: ScanField) -> String {
        let total = self.frames_scanned;

        match self.offsets(field).first() {
            None => format!("{}: no candidates in {} frames", field, total),
            Some(top) => {
                let encoding = match top.encoding {
                    RawEncoding::Unsigned => String::new(),
                    RawEncoding::Signed => " (signed)".to_string(),
                    RawEncoding::Offset40 => " (offset40)".to_string(),
                    RawEncoding::Offset20Tenths => " (offset20_tenths)".to_string(),
                };
                if self.stable(field, DEFAULT_STABLE_RATIO).is_some() {
                    format!(
                        "{} stable at offset {}{} across {}/{} frames",
                        field, top.offset, encoding, top.hits, total
                    )
                } else {
                    format!(
                        "{}: no stable offset, best guess offset {}{} in {}/{} frames",
                        field, top.offset, encoding, top.hits, total
                    )
                }
            }
        }
    }

    /// Turn stable offsets into layout entries for the calibration file
    ///
    /// Scales convert the raw integer to display units the same way the
    /// scanner compared them.
    pub fn suggest_layout(&self, min_ratio: f64) -> Vec<FieldLayout> {
        self.targeted
            .iter()
            .filter_map(|&field| {
                let top = self.stable(field, min_ratio)?;
                Some(
                    FieldLayout::new(field.field_id(), top.offset, top.width, 1.0 / field.raw_factor())
                        .with_encoding(top.encoding),
                )
            })
            .collect()
    }
}

impl FieldScanner {
    /// Scan every frame and tally which windows keep matching
    ///
    /// Each window counts at most once per frame. Offsets are ranked by
    /// hits, then exact hits, then offset.
    pub fn scan_many<F: AsRef<[u8]>>(&self, frames: &[F], targets: &CalibrationTarget) -> FrequencyReport {
        let mut tallies: BTreeMap<ScanField, BTreeMap<(usize, RawEncoding), OffsetFrequency>> =
            BTreeMap::new();

        for frame in frames {
            let ranked = self.scan(frame.as_ref(), targets);

            for field in ranked.fields() {
                let tally = tallies.entry(field).or_default();
                for candidate in ranked.get(field) {
                    let entry = tally
                        .entry((candidate.offset, candidate.encoding))
                        .or_insert_with(|| OffsetFrequency {
                            offset: candidate.offset,
                            width: candidate.width,
                            encoding: candidate.encoding,
                            hits: 0,
                            exact_hits: 0,
                        });
                    entry.hits += 1;
                    if candidate.quality == MatchQuality::Exact {
                        entry.exact_hits += 1;
                    }
                }
            }
        }

        let targeted: Vec<ScanField> = ScanField::ALL
            .into_iter()
            .filter(|field| field.target(targets).is_some_and(|t| t != 0.0 && t.is_finite()))
            .collect();

        let by_field = tallies
            .into_iter()
            .map(|(field, tally)| {
                let mut offsets: Vec<OffsetFrequency> = tally.into_values().collect();
                offsets.sort_by(|a, b| {
                    b.hits
                        .cmp(&a.hits)
                        .then(b.exact_hits.cmp(&a.exact_hits))
                        .then(a.offset.cmp(&b.offset))
                });
                (field, offsets)
            })
            .collect();

        debug!(frames = frames.len(), fields = targeted.len(), "scan complete");

        FrequencyReport {
            frames_scanned: frames.len(),
            targeted,
            by_field,
        }
    }
}
