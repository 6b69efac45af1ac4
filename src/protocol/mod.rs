//! # Controller Protocol Module
//!
//! Wire layer for the scooter controller's BLE notification protocol.
//!
//! This module handles:
//! - XOR checksum calculation, validation and command frame assembly
//! - Structural classification of received notification buffers
//! - The polling command table
//! - Telemetry decoding into sparse partial updates
//! - Per-variant field layouts for the fixed-size telemetry frames

pub mod checksum;
pub mod commands;
pub mod decoder;
pub mod frame;
pub mod layout;
