//! # Telemetry Aggregator
//!
//! Folds partial updates into the canonical [`TelemetrySnapshot`].
//!
//! A decoded value only lands in the snapshot if it is physically
//! plausible, and a field that already holds a non-zero value is never
//! reset to zero by an update that is not authoritative for it. The
//! odometer additionally never goes backwards within a session.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::snapshot::TelemetrySnapshot;
use super::update::{FieldId, FieldUpdate, PartialUpdate};

/// Highest believable road speed in km/h
pub const MAX_SPEED_KMH: f64 = 150.0;

/// Highest believable pack voltage
pub const MAX_VOLTAGE: f64 = 150.0;

/// Largest believable current magnitude in amperes
pub const MAX_CURRENT_AMPS: f64 = 300.0;

/// Temperature band for controller and battery sensors, °C
pub const TEMPERATURE_RANGE: (f64, f64) = (-40.0, 150.0);

/// Largest believable odometer reading in km
pub const MAX_ODOMETER_KM: f64 = 1_000_000.0;

/// Why a decoded value was not merged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Outside the field's physical range
    Implausible,
    /// Zero from an update not authoritative for it
    AmbiguousZero,
    /// Odometer lower than the current reading
    Regression,
}

/// Check one decoded value against the current snapshot
pub fn check_field(
    current: &TelemetrySnapshot,
    update: &FieldUpdate,
    authoritative: bool,
) -> std::result::Result<(), Rejection> {
    let id = update.id();

    if update.is_zero() && !id.zero_is_ordinary() && !authoritative && !current_is_zero(current, id) {
        return Err(Rejection::AmbiguousZero);
    }

    let plausible = match update {
        FieldUpdate::Speed(v) => (0.0..=MAX_SPEED_KMH).contains(v),
        FieldUpdate::BatteryPercent(v) => (0.0..=100.0).contains(v),
        FieldUpdate::Voltage(v) => (0.0..=MAX_VOLTAGE).contains(v),
        FieldUpdate::Current(v) => v.abs() <= MAX_CURRENT_AMPS,
        FieldUpdate::Temperature(v) | FieldUpdate::BatteryTemperature(v) => {
            (TEMPERATURE_RANGE.0..=TEMPERATURE_RANGE.1).contains(v)
        }
        FieldUpdate::OdometerKm(v) => {
            if (0.0..=MAX_ODOMETER_KM).contains(v) && *v < current.odometer_km {
                return Err(Rejection::Regression);
            }
            (0.0..=MAX_ODOMETER_KM).contains(v)
        }
        FieldUpdate::TripDistanceKm(v) => (0.0..=MAX_ODOMETER_KM).contains(v),
        FieldUpdate::RideTime(_) | FieldUpdate::ErrorCodes(_) | FieldUpdate::WarningCodes(_) => true,
        FieldUpdate::FirmwareVersion(s) | FieldUpdate::BluetoothVersion(s) => !s.trim().is_empty(),
    };

    if plausible {
        Ok(())
    } else {
        Err(Rejection::Implausible)
    }
}

fn current_is_zero(snapshot: &TelemetrySnapshot, id: FieldId) -> bool {
    match id {
        FieldId::Speed => snapshot.speed == 0.0,
        FieldId::BatteryPercent => snapshot.battery_percent == 0.0,
        FieldId::Voltage => snapshot.voltage == 0.0,
        FieldId::Current => snapshot.current == 0.0,
        FieldId::Temperature => snapshot.temperature == 0.0,
        FieldId::BatteryTemperature => snapshot.battery_temperature == 0.0,
        FieldId::OdometerKm => snapshot.odometer_km == 0.0,
        FieldId::TripDistanceKm => snapshot.trip_distance_km == 0.0,
        FieldId::RideTime => snapshot.total_ride_time.is_zero(),
        FieldId::ErrorCodes => snapshot.error_codes == 0,
        FieldId::WarningCodes => snapshot.warning_codes == 0,
        FieldId::FirmwareVersion => snapshot.firmware_version.is_none(),
        FieldId::BluetoothVersion => snapshot.bluetooth_version.is_none(),
    }
}

/// Write one accepted value; returns whether the snapshot changed
fn apply_field(snapshot: &mut TelemetrySnapshot, update: &FieldUpdate) -> bool {
    fn set<T: PartialEq + Clone>(slot: &mut T, value: &T) -> bool {
        if slot == value {
            false
        } else {
            *slot = value.clone();
            true
        }
    }

    match update {
        FieldUpdate::Speed(v) => set(&mut snapshot.speed, v),
        FieldUpdate::BatteryPercent(v) => set(&mut snapshot.battery_percent, v),
        FieldUpdate::Voltage(v) => set(&mut snapshot.voltage, v),
        FieldUpdate::Current(v) => set(&mut snapshot.current, v),
        FieldUpdate::Temperature(v) => set(&mut snapshot.temperature, v),
        FieldUpdate::BatteryTemperature(v) => set(&mut snapshot.battery_temperature, v),
        FieldUpdate::OdometerKm(v) => set(&mut snapshot.odometer_km, v),
        FieldUpdate::TripDistanceKm(v) => set(&mut snapshot.trip_distance_km, v),
        FieldUpdate::RideTime(d) => set(&mut snapshot.total_ride_time, d),
        FieldUpdate::ErrorCodes(c) => set(&mut snapshot.error_codes, c),
        FieldUpdate::WarningCodes(c) => set(&mut snapshot.warning_codes, c),
        FieldUpdate::FirmwareVersion(s) => set(&mut snapshot.firmware_version, &Some(s.clone())),
        FieldUpdate::BluetoothVersion(s) => set(&mut snapshot.bluetooth_version, &Some(s.clone())),
    }
}

/// Merge a partial update into a snapshot
///
/// # Arguments
///
/// * `current` - Snapshot before the update
/// * `partial` - Fields decoded from one frame
/// * `now` - Timestamp recorded if any field is accepted
///
/// # Returns
///
/// * `(TelemetrySnapshot, bool)` - Next snapshot, and whether any telemetry
///   field changed value
///
/// Accepting a value equal to the current one refreshes `last_update` and
/// `is_connected` but reports no change, so merging the same update twice
/// signals "updated" only once.
pub fn merge(
    current: &TelemetrySnapshot,
    partial: &PartialUpdate,
    now: DateTime<Utc>,
) -> (TelemetrySnapshot, bool) {
    let authoritative = partial.is_authoritative();
    let mut next = current.clone();
    let mut accepted = false;
    let mut changed = false;

    for field in partial.fields() {
        match check_field(&next, field, authoritative) {
            Ok(()) => {
                accepted = true;
                changed |= apply_field(&mut next, field);
            }
            Err(reason) => {
                debug!("Rejected {:?} from {}: {:?}", field, partial.source(), reason);
            }
        }
    }

    if !accepted {
        return (next, false);
    }

    if changed {
        next.refresh_derived();
    }
    next.last_update = Some(now);
    next.is_connected = true;

    (next, changed)
}

/// Owner of the canonical snapshot for one session
#[derive(Debug, Clone, Default)]
pub struct TelemetryAggregator {
    snapshot: TelemetrySnapshot,
    updates: u64,
}

impl TelemetryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an update; returns whether any telemetry field changed
    pub fn merge(&mut self, partial: &PartialUpdate, now: DateTime<Utc>) -> bool {
        if partial.is_empty() {
            return false;
        }

        let (next, changed) = merge(&self.snapshot, partial, now);
        self.snapshot = next;
        if changed {
            self.updates += 1;
        }
        changed
    }

    pub fn snapshot(&self) -> &TelemetrySnapshot {
        &self.snapshot
    }

    /// Number of merges that changed the snapshot
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    /// Keep the last readings but flag the link as down
    pub fn mark_disconnected(&mut self) {
        self.snapshot.is_connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::FrameKind;
    use chrono::Duration;

    fn response(fields: Vec<FieldUpdate>) -> PartialUpdate {
        fields
            .into_iter()
            .fold(PartialUpdate::empty(FrameKind::ProtocolResponse), PartialUpdate::with)
    }

    fn main_frame(fields: Vec<FieldUpdate>) -> PartialUpdate {
        fields
            .into_iter()
            .fold(PartialUpdate::empty(FrameKind::MainTelemetry8), PartialUpdate::with)
    }

    #[test]
    fn test_merge_sets_fields_and_timestamp() {
        let now = Utc::now();
        let (next, changed) = merge(
            &TelemetrySnapshot::default(),
            &response(vec![FieldUpdate::BatteryPercent(42.0)]),
            now,
        );

        assert!(changed);
        assert_eq!(next.battery_percent, 42.0);
        assert_eq!(next.last_update, Some(now));
        assert!(next.is_connected);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(1);
        let update = response(vec![
            FieldUpdate::BatteryPercent(42.0),
            FieldUpdate::Voltage(48.2),
        ]);

        let (first, changed_first) = merge(&TelemetrySnapshot::default(), &update, t1);
        let (second, changed_second) = merge(&first, &update, t2);

        assert!(changed_first);
        assert!(!changed_second);
        assert_eq!(second.battery_percent, first.battery_percent);
        assert_eq!(second.voltage, first.voltage);
        assert_eq!(second.last_update, Some(t2));
    }

    #[test]
    fn test_merge_empty_update_is_noop() {
        let current = TelemetrySnapshot {
            voltage: 48.0,
            ..Default::default()
        };
        let (next, changed) = merge(&current, &PartialUpdate::empty(FrameKind::KeepAlive), Utc::now());
        assert!(!changed);
        assert_eq!(next, current);
    }

    #[test]
    fn test_implausible_values_rejected() {
        let current = TelemetrySnapshot {
            battery_percent: 80.0,
            temperature: 30.0,
            ..Default::default()
        };
        let update = response(vec![
            FieldUpdate::BatteryPercent(140.0),
            FieldUpdate::Temperature(220.0),
            FieldUpdate::Speed(-3.0),
        ]);

        let (next, changed) = merge(&current, &update, Utc::now());
        assert!(!changed);
        assert_eq!(next, current);
    }

    #[test]
    fn test_ambiguous_zero_does_not_clobber() {
        let current = TelemetrySnapshot {
            speed: 18.0,
            battery_percent: 60.0,
            ..Default::default()
        };
        let update = response(vec![FieldUpdate::Speed(0.0), FieldUpdate::BatteryPercent(0.0)]);

        let (next, changed) = merge(&current, &update, Utc::now());
        assert!(!changed);
        assert_eq!(next.speed, 18.0);
        assert_eq!(next.battery_percent, 60.0);
    }

    #[test]
    fn test_authoritative_zero_accepted() {
        let current = TelemetrySnapshot {
            speed: 18.0,
            ..Default::default()
        };
        let (next, changed) = merge(&current, &main_frame(vec![FieldUpdate::Speed(0.0)]), Utc::now());
        assert!(changed);
        assert_eq!(next.speed, 0.0);
    }

    #[test]
    fn test_realtime_reply_returns_speed_to_zero() {
        use crate::protocol::checksum::build;
        use crate::protocol::decoder::decode;

        // 0x09C4 = 2500 -> 25.0 km/h, then a standstill
        let moving = build(0x21, None, &[0x00, 0xC4, 0x09]).unwrap();
        let stopped = build(0x21, None, &[0x00, 0x00, 0x00]).unwrap();
        let moving = decode(FrameKind::ProtocolResponse, &moving);
        let stopped = decode(FrameKind::ProtocolResponse, &stopped);
        assert!(stopped.is_authoritative());

        let (next, _) = merge(&TelemetrySnapshot::default(), &moving, Utc::now());
        assert!((next.speed - 25.0).abs() < 1e-9);

        let (next, changed) = merge(&next, &stopped, Utc::now());
        assert!(changed);
        assert_eq!(next.speed, 0.0);
    }

    #[test]
    fn test_current_zero_is_ordinary() {
        let current = TelemetrySnapshot {
            voltage: 48.0,
            current: 5.0,
            power: 240.0,
            ..Default::default()
        };
        let (next, changed) = merge(&current, &response(vec![FieldUpdate::Current(0.0)]), Utc::now());
        assert!(changed);
        assert_eq!(next.current, 0.0);
        assert_eq!(next.power, 0.0);
    }

    #[test]
    fn test_odometer_never_regresses() {
        let current = TelemetrySnapshot {
            odometer_km: 356.0,
            ..Default::default()
        };

        let (next, changed) = merge(&current, &response(vec![FieldUpdate::OdometerKm(355.9)]), Utc::now());
        assert!(!changed);
        assert_eq!(next.odometer_km, 356.0);

        let (next, changed) = merge(&current, &response(vec![FieldUpdate::OdometerKm(356.4)]), Utc::now());
        assert!(changed);
        assert_eq!(next.odometer_km, 356.4);
    }

    #[test]
    fn test_power_derived() {
        let update = response(vec![FieldUpdate::Voltage(50.0), FieldUpdate::Current(-4.0)]);
        let (next, _) = merge(&TelemetrySnapshot::default(), &update, Utc::now());
        assert!((next.power - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_versions_and_codes() {
        let update = response(vec![
            FieldUpdate::FirmwareVersion("1.5.2".to_string()),
            FieldUpdate::BluetoothVersion("  ".to_string()),
            FieldUpdate::ErrorCodes(0b101),
        ]);
        let (next, changed) = merge(&TelemetrySnapshot::default(), &update, Utc::now());
        assert!(changed);
        assert_eq!(next.firmware_version.as_deref(), Some("1.5.2"));
        assert_eq!(next.bluetooth_version, None);
        assert_eq!(next.error_codes, 0b101);

        // Codes may clear back to zero from any frame
        let clear = response(vec![FieldUpdate::ErrorCodes(0)]);
        let (next, changed) = merge(&next, &clear, Utc::now());
        assert!(changed);
        assert_eq!(next.error_codes, 0);
    }

    #[test]
    fn test_aggregator_tracks_updates() {
        let mut aggregator = TelemetryAggregator::new();
        let update = response(vec![FieldUpdate::BatteryPercent(42.0)]);

        assert!(aggregator.merge(&update, Utc::now()));
        assert!(!aggregator.merge(&update, Utc::now()));
        assert_eq!(aggregator.update_count(), 1);
        assert!(aggregator.snapshot().is_connected);

        aggregator.mark_disconnected();
        assert!(!aggregator.snapshot().is_connected);
        assert_eq!(aggregator.snapshot().battery_percent, 42.0);
    }

    #[test]
    fn test_rejected_voltage_keeps_previous() {
        // Main frame with voltageRaw 100 decodes no voltage at all
        let mut aggregator = TelemetryAggregator::new();
        aggregator.merge(&response(vec![FieldUpdate::Voltage(48.0)]), Utc::now());

        let frame = [0x08, 0x00, 0x00, 0x00, 0, 0, 100, 0];
        let update = crate::protocol::decoder::decode(FrameKind::MainTelemetry8, &frame);
        assert!(!update.contains(FieldId::Voltage));

        aggregator.merge(&update, Utc::now());
        assert_eq!(aggregator.snapshot().voltage, 48.0);
    }
}
