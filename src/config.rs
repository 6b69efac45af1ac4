//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every key has a default, so an empty file is a valid configuration that
//! reproduces the reference controller's behaviour.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::diagnostics::DiagnosticLimits;
use crate::error::{Result, ScootLinkError};
use crate::poller::Pacing;
use crate::protocol::commands::BatteryRequest;
use crate::protocol::frame::{EXTENDED_TELEMETRY_LEN, MAIN_TELEMETRY_LEN};
use crate::protocol::layout::DecoderCalibration;
use crate::scanner::{CalibrationTarget, ScanTolerances};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub calibration: DecoderCalibration,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Polling sequence configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_polling_enabled")]
    pub enabled: bool,

    #[serde(default = "default_command_interval_ms")]
    pub command_interval_ms: u64,

    #[serde(default = "default_backoff_after_failures")]
    pub backoff_after_failures: u32,

    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    #[serde(default)]
    pub battery_request: BatteryRequest,
}

/// Session configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_inbound_queue_capacity")]
    pub inbound_queue_capacity: usize,

    #[serde(default = "default_frame_history")]
    pub frame_history: usize,

    #[serde(default = "default_unknown_protocol_window")]
    pub unknown_protocol_window: u64,
}

/// Field scanner configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    #[serde(default = "default_percent_tolerance")]
    pub percent_tolerance: f64,

    #[serde(default = "default_temperature_tolerance")]
    pub temperature_tolerance: f64,

    #[serde(default = "default_voltage_tolerance")]
    pub voltage_tolerance: f64,

    #[serde(default = "default_speed_tolerance")]
    pub speed_tolerance: f64,

    #[serde(default = "default_odometer_tolerance")]
    pub odometer_tolerance: f64,

    /// Known values for the capture being scanned
    #[serde(default)]
    pub targets: Option<CalibrationTarget>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

// Default value functions
fn default_polling_enabled() -> bool { true }
fn default_command_interval_ms() -> u64 { 200 }
fn default_backoff_after_failures() -> u32 { 3 }
fn default_max_interval_ms() -> u64 { 3200 }

fn default_inbound_queue_capacity() -> usize { 64 }
fn default_frame_history() -> usize { 64 }
fn default_unknown_protocol_window() -> u64 { 40 }

fn default_percent_tolerance() -> f64 { 1.0 }
fn default_temperature_tolerance() -> f64 { 2.0 }
fn default_voltage_tolerance() -> f64 { 0.5 }
fn default_speed_tolerance() -> f64 { 0.5 }
fn default_odometer_tolerance() -> f64 { 0.5 }

fn default_log_level() -> String { "info".to_string() }

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: default_polling_enabled(),
            command_interval_ms: default_command_interval_ms(),
            backoff_after_failures: default_backoff_after_failures(),
            max_interval_ms: default_max_interval_ms(),
            battery_request: BatteryRequest::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inbound_queue_capacity: default_inbound_queue_capacity(),
            frame_history: default_frame_history(),
            unknown_protocol_window: default_unknown_protocol_window(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            percent_tolerance: default_percent_tolerance(),
            temperature_tolerance: default_temperature_tolerance(),
            voltage_tolerance: default_voltage_tolerance(),
            speed_tolerance: default_speed_tolerance(),
            odometer_tolerance: default_odometer_tolerance(),
            targets: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

impl PollingConfig {
    /// Timing for the poll sequencer
    pub fn pacing(&self) -> Pacing {
        Pacing {
            command_interval: Duration::from_millis(self.command_interval_ms),
            backoff_after_failures: self.backoff_after_failures,
            max_interval: Duration::from_millis(self.max_interval_ms),
        }
    }
}

impl ScannerConfig {
    pub fn tolerances(&self) -> ScanTolerances {
        ScanTolerances {
            percent: self.percent_tolerance,
            temperature: self.temperature_tolerance,
            voltage: self.voltage_tolerance,
            speed: self.speed_tolerance,
            odometer: self.odometer_tolerance,
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> ScootLinkError {
    ScootLinkError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use scoot_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Limits for the session's diagnostic context
    pub fn diagnostic_limits(&self) -> DiagnosticLimits {
        DiagnosticLimits {
            frame_history: self.session.frame_history,
            unknown_protocol_window: self.session.unknown_protocol_window,
            unstable_after_failures: self.polling.backoff_after_failures,
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Polling
        if self.polling.command_interval_ms < 10 || self.polling.command_interval_ms > 10000 {
            return Err(invalid("command_interval_ms must be between 10 and 10000"));
        }

        if self.polling.max_interval_ms < self.polling.command_interval_ms
            || self.polling.max_interval_ms > 60000
        {
            return Err(invalid(
                "max_interval_ms must be between command_interval_ms and 60000",
            ));
        }

        // Session
        if self.session.inbound_queue_capacity == 0 || self.session.inbound_queue_capacity > 4096 {
            return Err(invalid("inbound_queue_capacity must be between 1 and 4096"));
        }

        if self.session.frame_history > 4096 {
            return Err(invalid("frame_history must be at most 4096"));
        }

        if self.session.unknown_protocol_window == 0 {
            return Err(invalid("unknown_protocol_window must be greater than 0"));
        }

        // Calibration layouts must fit their frames
        for layout in &self.calibration.main_frame {
            layout
                .check(MAIN_TELEMETRY_LEN)
                .map_err(|e| invalid(format!("calibration.main_frame: {}", e)))?;
        }

        for layout in &self.calibration.extended_frame {
            layout
                .check(EXTENDED_TELEMETRY_LEN)
                .map_err(|e| invalid(format!("calibration.extended_frame: {}", e)))?;
        }

        // Scanner tolerances
        for (name, value) in [
            ("percent_tolerance", self.scanner.percent_tolerance),
            ("temperature_tolerance", self.scanner.temperature_tolerance),
            ("voltage_tolerance", self.scanner.voltage_tolerance),
            ("speed_tolerance", self.scanner.speed_tolerance),
            ("odometer_tolerance", self.scanner.odometer_tolerance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("{} must be a non-negative number", name)));
            }
        }

        // Logging
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid(
                "logging level must be one of: trace, debug, info, warn, error",
            ));
        }

        if self.logging.log_dir.as_deref() == Some("") {
            return Err(invalid("log_dir cannot be empty when set"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::layout::{FieldLayout, RawEncoding};
    use crate::telemetry::update::FieldId;

    fn create_valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_default_config() {
        let config = create_valid_config();
        assert!(config.validate().is_ok());
        assert!(config.polling.enabled);
        assert_eq!(config.polling.command_interval_ms, 200);
        assert_eq!(config.session.inbound_queue_capacity, 64);
        assert_eq!(config.calibration, DecoderCalibration::default());
        assert!(config.scanner.targets.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.polling.max_interval_ms, default_max_interval_ms());
        assert_eq!(config.session.unknown_protocol_window, 40);
        assert_eq!(config.calibration.main_frame.len(), 2);
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[polling]
command_interval_ms = 250
battery_request = "dedicated_opcode"

[session]
frame_history = 16

[calibration]
variant = "gen2"

[[calibration.main_frame]]
field = "speed"
offset = 2
scale = 0.01

[[calibration.main_frame]]
field = "temperature"
offset = 5
width = 1
encoding = "offset40"

[scanner]
voltage_tolerance = 0.2

[scanner.targets]
odometer_km = 356.0
battery_percent = 87

[logging]
level = "debug"
log_dir = "./logs"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.polling.command_interval_ms, 250);
        assert_eq!(config.polling.battery_request, BatteryRequest::DedicatedOpcode);
        assert_eq!(config.session.frame_history, 16);
        assert_eq!(config.calibration.variant, "gen2");
        assert_eq!(config.calibration.main_frame[1].encoding, RawEncoding::Offset40);
        assert_eq!(config.scanner.tolerances().voltage, 0.2);
        assert_eq!(config.scanner.tolerances().percent, 1.0);

        let targets = config.scanner.targets.unwrap();
        assert_eq!(targets.odometer_km, Some(356.0));
        assert_eq!(targets.battery_percent, Some(87.0));
        assert_eq!(targets.voltage, None);

        assert_eq!(config.logging.log_dir.as_deref(), Some("./logs"));
    }

    #[test]
    fn test_shipped_default_file() {
        let config = Config::parse(include_str!("../config/default.toml")).unwrap();
        assert_eq!(config.calibration.variant, "reference");
        assert_eq!(config.calibration.main_frame.len(), 2);
        assert_eq!(config.calibration.main_frame[1].max_raw, Some(700));
        assert!(config.calibration.extended_frame.is_empty());
        assert!(config.scanner.targets.is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/scoot-link.toml");
        assert!(matches!(result, Err(ScootLinkError::Io(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = Config::parse("[polling\ncommand_interval_ms = 1");
        assert!(matches!(result, Err(ScootLinkError::Config(_))));
    }

    #[test]
    fn test_pacing_conversion() {
        let pacing = create_valid_config().polling.pacing();
        assert_eq!(pacing.command_interval, Duration::from_millis(200));
        assert_eq!(pacing.backoff_after_failures, 3);
        assert_eq!(pacing.max_interval, Duration::from_millis(3200));
    }

    #[test]
    fn test_diagnostic_limits() {
        let mut config = create_valid_config();
        config.polling.backoff_after_failures = 5;
        let limits = config.diagnostic_limits();
        assert_eq!(limits.frame_history, 64);
        assert_eq!(limits.unknown_protocol_window, 40);
        assert_eq!(limits.unstable_after_failures, 5);
    }

    #[test]
    fn test_command_interval_too_low() {
        let mut config = create_valid_config();
        config.polling.command_interval_ms = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_command_interval_too_high() {
        let mut config = create_valid_config();
        config.polling.command_interval_ms = 10001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_interval_below_command_interval() {
        let mut config = create_valid_config();
        config.polling.max_interval_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_queue_capacity_zero() {
        let mut config = create_valid_config();
        config.session.inbound_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_protocol_window_zero() {
        let mut config = create_valid_config();
        config.session.unknown_protocol_window = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_history_zero_is_allowed() {
        let mut config = create_valid_config();
        config.session.frame_history = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_layout_past_frame_end() {
        let mut config = create_valid_config();
        config
            .calibration
            .main_frame
            .push(FieldLayout::new(FieldId::OdometerKm, 6, 4, 0.01));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("main_frame"));
    }

    #[test]
    fn test_extended_layout_fits() {
        let mut config = create_valid_config();
        config
            .calibration
            .extended_frame
            .push(FieldLayout::new(FieldId::OdometerKm, 9, 4, 0.01));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_tolerance() {
        let mut config = create_valid_config();
        config.scanner.speed_tolerance = -0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nan_tolerance() {
        let mut config = create_valid_config();
        config.scanner.odometer_tolerance = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = create_valid_config();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_log_dir() {
        let mut config = create_valid_config();
        config.logging.log_dir = Some(String::new());
        assert!(config.validate().is_err());
    }
}
