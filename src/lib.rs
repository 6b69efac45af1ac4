//! # Scoot Link Library
//!
//! Decode BLE telemetry from battery-powered scooter controllers.
//!
//! This library turns raw notification buffers into a single, plausible
//! vehicle state, and drives the request sequence that makes the controller
//! report it. It also carries the operator tooling for working out the byte
//! layout of an unfamiliar controller variant.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod poller;
pub mod protocol;
pub mod scanner;
pub mod session;
pub mod telemetry;
pub mod transport;
