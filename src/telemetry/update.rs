//! # Partial Updates
//!
//! A decoder never touches the snapshot. It returns a [`PartialUpdate`]: the
//! handful of fields one frame actually spoke to, each as an explicit tagged
//! value. A field that is absent was not decoded; a field present with `0.0`
//! was decoded as zero.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::protocol::frame::FrameKind;

/// Identifies one snapshot field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldId {
    Speed,
    BatteryPercent,
    Voltage,
    Current,
    Temperature,
    BatteryTemperature,
    OdometerKm,
    TripDistanceKm,
    RideTime,
    ErrorCodes,
    WarningCodes,
    FirmwareVersion,
    BluetoothVersion,
}

impl FieldId {
    /// Whether a frame layout can decode this field from raw bytes
    pub fn is_numeric(self) -> bool {
        !matches!(self, FieldId::FirmwareVersion | FieldId::BluetoothVersion)
    }

    /// Whether zero is an ordinary reading for this field on any frame
    ///
    /// Current sits at zero whenever the motor is idle and a cleared code
    /// bitfield is zero; everything else reads zero only from a frame kind
    /// that is authoritative for it.
    pub fn zero_is_ordinary(self) -> bool {
        matches!(self, FieldId::Current | FieldId::ErrorCodes | FieldId::WarningCodes)
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldId::Speed => "speed",
            FieldId::BatteryPercent => "battery_percent",
            FieldId::Voltage => "voltage",
            FieldId::Current => "current",
            FieldId::Temperature => "temperature",
            FieldId::BatteryTemperature => "battery_temperature",
            FieldId::OdometerKm => "odometer_km",
            FieldId::TripDistanceKm => "trip_distance_km",
            FieldId::RideTime => "ride_time",
            FieldId::ErrorCodes => "error_codes",
            FieldId::WarningCodes => "warning_codes",
            FieldId::FirmwareVersion => "firmware_version",
            FieldId::BluetoothVersion => "bluetooth_version",
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// km/h
    Speed(f64),
    /// 0-100
    BatteryPercent(f64),
    /// Volts
    Voltage(f64),
    /// Amperes, signed
    Current(f64),
    /// Controller temperature in °C
    Temperature(f64),
    /// Battery temperature in °C
    BatteryTemperature(f64),
    OdometerKm(f64),
    TripDistanceKm(f64),
    RideTime(Duration),
    ErrorCodes(u16),
    WarningCodes(u16),
    FirmwareVersion(String),
    BluetoothVersion(String),
}

impl FieldUpdate {
    pub fn id(&self) -> FieldId {
        match self {
            FieldUpdate::Speed(_) => FieldId::Speed,
            FieldUpdate::BatteryPercent(_) => FieldId::BatteryPercent,
            FieldUpdate::Voltage(_) => FieldId::Voltage,
            FieldUpdate::Current(_) => FieldId::Current,
            FieldUpdate::Temperature(_) => FieldId::Temperature,
            FieldUpdate::BatteryTemperature(_) => FieldId::BatteryTemperature,
            FieldUpdate::OdometerKm(_) => FieldId::OdometerKm,
            FieldUpdate::TripDistanceKm(_) => FieldId::TripDistanceKm,
            FieldUpdate::RideTime(_) => FieldId::RideTime,
            FieldUpdate::ErrorCodes(_) => FieldId::ErrorCodes,
            FieldUpdate::WarningCodes(_) => FieldId::WarningCodes,
            FieldUpdate::FirmwareVersion(_) => FieldId::FirmwareVersion,
            FieldUpdate::BluetoothVersion(_) => FieldId::BluetoothVersion,
        }
    }

    /// Build a numeric field from a scaled value
    ///
    /// Returns `None` for version strings and for values that cannot be
    /// represented (negative durations, code bitfields outside `u16`).
    pub fn from_numeric(id: FieldId, value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }

        let update = match id {
            FieldId::Speed => FieldUpdate::Speed(value),
            FieldId::BatteryPercent => FieldUpdate::BatteryPercent(value),
            FieldId::Voltage => FieldUpdate::Voltage(value),
            FieldId::Current => FieldUpdate::Current(value),
            FieldId::Temperature => FieldUpdate::Temperature(value),
            FieldId::BatteryTemperature => FieldUpdate::BatteryTemperature(value),
            FieldId::OdometerKm => FieldUpdate::OdometerKm(value),
            FieldId::TripDistanceKm => FieldUpdate::TripDistanceKm(value),
            FieldId::RideTime => FieldUpdate::RideTime(Duration::try_from_secs_f64(value).ok()?),
            FieldId::ErrorCodes => FieldUpdate::ErrorCodes(to_code(value)?),
            FieldId::WarningCodes => FieldUpdate::WarningCodes(to_code(value)?),
            FieldId::FirmwareVersion | FieldId::BluetoothVersion => return None,
        };

        Some(update)
    }

    /// Numeric value of this field, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldUpdate::Speed(v)
            | FieldUpdate::BatteryPercent(v)
            | FieldUpdate::Voltage(v)
            | FieldUpdate::Current(v)
            | FieldUpdate::Temperature(v)
            | FieldUpdate::BatteryTemperature(v)
            | FieldUpdate::OdometerKm(v)
            | FieldUpdate::TripDistanceKm(v) => Some(*v),
            FieldUpdate::RideTime(d) => Some(d.as_secs_f64()),
            FieldUpdate::ErrorCodes(c) | FieldUpdate::WarningCodes(c) => Some(f64::from(*c)),
            FieldUpdate::FirmwareVersion(_) | FieldUpdate::BluetoothVersion(_) => None,
        }
    }

    /// Whether this value reads as zero
    pub fn is_zero(&self) -> bool {
        match self {
            FieldUpdate::FirmwareVersion(s) | FieldUpdate::BluetoothVersion(s) => s.is_empty(),
            other => other.as_f64() == Some(0.0),
        }
    }
}

fn to_code(value: f64) -> Option<u16> {
    let rounded = value.round();
    if (0.0..=f64::from(u16::MAX)).contains(&rounded) {
        Some(rounded as u16)
    } else {
        None
    }
}

/// The sparse set of fields decoded from one frame
#[derive(Debug, Clone, PartialEq)]
pub struct PartialUpdate {
    source: FrameKind,
    authoritative: bool,
    fields: Vec<FieldUpdate>,
}

impl PartialUpdate {
    /// An update from `source` with no fields
    pub fn empty(source: FrameKind) -> Self {
        Self {
            source,
            authoritative: source.is_authoritative(),
            fields: Vec::new(),
        }
    }

    /// Let this update report its fields as zero
    ///
    /// Set by the decoder for responses that answer a dedicated request,
    /// such as the realtime reply reporting a standstill.
    pub fn mark_authoritative(&mut self) {
        self.authoritative = true;
    }

    /// Whether zero values in this update may overwrite non-zero readings
    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    /// Add a field, replacing any earlier value for the same field
    pub fn push(&mut self, update: FieldUpdate) {
        let id = update.id();
        match self.fields.iter_mut().find(|f| f.id() == id) {
            Some(existing) => *existing = update,
            None => self.fields.push(update),
        }
    }

    /// Builder-style [`push`](Self::push)
    pub fn with(mut self, update: FieldUpdate) -> Self {
        self.push(update);
        self
    }

    /// Frame kind this update was decoded from
    pub fn source(&self) -> FrameKind {
        self.source
    }

    pub fn fields(&self) -> &[FieldUpdate] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn get(&self, id: FieldId) -> Option<&FieldUpdate> {
        self.fields.iter().find(|f| f.id() == id)
    }

    pub fn contains(&self, id: FieldId) -> bool {
        self.get(id).is_some()
    }

    /// Numeric value of a field, if present
    pub fn value(&self, id: FieldId) -> Option<f64> {
        self.get(id).and_then(FieldUpdate::as_f64)
    }
}
