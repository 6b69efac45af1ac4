//! # Telemetry Module
//!
//! Canonical vehicle state and the rules for updating it.
//!
//! This module handles:
//! - The canonical [`TelemetrySnapshot`](snapshot::TelemetrySnapshot)
//! - Sparse, explicitly tagged partial updates produced by the decoder
//! - Merging updates under plausibility and non-regression rules
//! - Deciding whether a merge actually changed anything

pub mod aggregator;
pub mod snapshot;
pub mod update;

pub use aggregator::TelemetryAggregator;
pub use snapshot::TelemetrySnapshot;
pub use update::{FieldId, FieldUpdate, PartialUpdate};
