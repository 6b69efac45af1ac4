//! # Poller Module
//!
//! The controller only reports most values when asked. Once the link shows
//! it is alive (a keep-alive frame), the poller cycles through the request
//! list at a fixed pace for as long as the session lasts.
//!
//! This module handles:
//! - The pure polling state machine ([`PollingSequencer`])
//! - Backoff after repeated write failures
//! - Running the sequencer as a cancellable tokio task ([`spawn_poller`])

pub mod sequencer;
pub mod task;

pub use sequencer::{Pacing, PollRequest, PollingSequencer, SequencerState};
pub use task::{spawn_poller, PollerHandle, PollerSignal};
