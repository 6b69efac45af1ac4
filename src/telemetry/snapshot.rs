//! # Telemetry Snapshot
//!
//! The one canonical view of the vehicle. Only the aggregator writes it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Canonical telemetry state for one vehicle
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TelemetrySnapshot {
    /// km/h
    pub speed: f64,
    /// 0-100
    pub battery_percent: f64,
    /// Volts
    pub voltage: f64,
    /// Amperes, negative while regenerating
    pub current: f64,
    /// Watts, always `|voltage × current|`
    pub power: f64,
    /// Controller temperature in °C
    pub temperature: f64,
    /// Battery temperature in °C
    pub battery_temperature: f64,
    pub odometer_km: f64,
    pub trip_distance_km: f64,
    pub total_ride_time: Duration,
    pub error_codes: u16,
    pub warning_codes: u16,
    pub firmware_version: Option<String>,
    pub bluetooth_version: Option<String>,
    /// Time of the most recent accepted reading
    pub last_update: Option<DateTime<Utc>>,
    pub is_connected: bool,
}

impl TelemetrySnapshot {
    /// Recompute derived fields after a raw field changed
    pub(crate) fn refresh_derived(&mut self) {
        self.power = (self.voltage * self.current).abs();
    }

    /// Total ride time split into hours, minutes and seconds
    pub fn ride_time_hms(&self) -> (u64, u64, u64) {
        let secs = self.total_ride_time.as_secs();
        (secs / 3600, (secs % 3600) / 60, secs % 60)
    }

    /// Total ride time as `"1h 02m 03s"`
    pub fn ride_time_display(&self) -> String {
        let (h, m, s) = self.ride_time_hms();
        format!("{}h {:02}m {:02}s", h, m, s)
    }

    /// Active error code bits, lowest first
    pub fn active_error_bits(&self) -> Vec<u8> {
        set_bits(self.error_codes)
    }

    /// Active warning code bits, lowest first
    pub fn active_warning_bits(&self) -> Vec<u8> {
        set_bits(self.warning_codes)
    }
}

fn set_bits(value: u16) -> Vec<u8> {
    (0..16u8).filter(|bit| value & (1 << bit) != 0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_snapshot() {
        let snapshot = TelemetrySnapshot::default();
        assert_eq!(snapshot.speed, 0.0);
        assert!(!snapshot.is_connected);
        assert!(snapshot.last_update.is_none());
        assert!(snapshot.firmware_version.is_none());
    }

    #[test]
    fn test_power_is_absolute() {
        let mut snapshot = TelemetrySnapshot {
            voltage: 48.0,
            current: -2.5,
            ..Default::default()
        };
        snapshot.refresh_derived();
        assert!((snapshot.power - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_ride_time_display() {
        let snapshot = TelemetrySnapshot {
            total_ride_time: Duration::from_secs(3600 + 2 * 60 + 3),
            ..Default::default()
        };
        assert_eq!(snapshot.ride_time_hms(), (1, 2, 3));
        assert_eq!(snapshot.ride_time_display(), "1h 02m 03s");
    }

    #[test]
    fn test_active_bits() {
        let snapshot = TelemetrySnapshot {
            error_codes: 0b1000_0000_0000_0101,
            ..Default::default()
        };
        assert_eq!(snapshot.active_error_bits(), vec![0, 2, 15]);
        assert!(snapshot.active_warning_bits().is_empty());
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = TelemetrySnapshot {
            battery_percent: 42.0,
            ..Default::default()
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["battery_percent"], 42.0);
        assert_eq!(json["is_connected"], false);
    }
}
