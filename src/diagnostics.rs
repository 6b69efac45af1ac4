//! # Diagnostics
//!
//! Per-session record of what the link has been doing: recent raw frames,
//! how many of each kind arrived, why frames were rejected, and whether
//! command writes are getting through. From that it judges
//! [`ProtocolHealth`], which is how a systemic problem (nothing ever
//! validates, writes keep failing) reaches the operator.
//!
//! The context is created by the session and handed to the components
//! that report into it. It is cheap to clone; clones share state.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::protocol::decoder::{DecodeIssue, DecodeResult};
use crate::protocol::frame::{FrameKind, RawFrame};

/// Overall judgement of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolHealth {
    /// Frames are validating and commands are going out
    Healthy,
    /// Nothing has validated yet, but it is too early to give up
    AwaitingTelemetry,
    /// A full window of frames arrived and none validated
    ProtocolUnknown,
    /// Command writes keep failing
    ConnectionUnstable,
}

impl ProtocolHealth {
    /// What the operator should try next, if anything
    pub fn recommendation(self) -> Option<&'static str> {
        match self {
            ProtocolHealth::Healthy => None,
            ProtocolHealth::AwaitingTelemetry => {
                Some("waiting for telemetry; check that keep-alive frames are arriving")
            }
            ProtocolHealth::ProtocolUnknown => Some(
                "no frame has validated; capture frames with known dashboard values and run the field scanner",
            ),
            ProtocolHealth::ConnectionUnstable => {
                Some("command writes keep failing; connection unstable, reconnect the device")
            }
        }
    }
}

impl fmt::Display for ProtocolHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolHealth::Healthy => "healthy",
            ProtocolHealth::AwaitingTelemetry => "awaiting telemetry",
            ProtocolHealth::ProtocolUnknown => "protocol unknown",
            ProtocolHealth::ConnectionUnstable => "connection unstable",
        };
        f.write_str(name)
    }
}

/// Sizing and thresholds for a [`Diagnostics`] context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticLimits {
    /// Raw frames kept for inspection
    pub frame_history: usize,
    /// Consecutive frames without a validation before the protocol is unknown
    pub unknown_protocol_window: u64,
    /// Consecutive write failures before the connection is unstable
    pub unstable_after_failures: u32,
}

impl Default for DiagnosticLimits {
    fn default() -> Self {
        Self {
            frame_history: 64,
            unknown_protocol_window: 40,
            unstable_after_failures: 3,
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagnosticSummary {
    pub frames_seen: u64,
    pub frames_validated: u64,
    /// Frames decoded since the last validated one
    pub frames_since_validated: u64,
    pub checksum_failures: u64,
    pub malformed_frames: u64,
    /// Keyed by frame kind name
    pub frames_by_kind: BTreeMap<String, u64>,
    /// Keyed by `0xOP` or `0xOP/0xSUB`
    pub unrecognized_opcodes: BTreeMap<String, u64>,
    pub commands_sent: u64,
    pub send_failures: u64,
    pub consecutive_send_failures: u32,
}

#[derive(Debug)]
struct DiagnosticState {
    limits: DiagnosticLimits,
    history: VecDeque<RawFrame>,
    kind_counts: [u64; FrameKind::ALL.len()],
    frames_seen: u64,
    frames_validated: u64,
    frames_since_validated: u64,
    checksum_failures: u64,
    malformed_frames: u64,
    unrecognized: BTreeMap<(u8, Option<u8>), u64>,
    commands_sent: u64,
    send_failures: u64,
    consecutive_send_failures: u32,
}

impl DiagnosticState {
    fn new(limits: DiagnosticLimits) -> Self {
        Self {
            limits,
            history: VecDeque::with_capacity(limits.frame_history),
            kind_counts: [0; FrameKind::ALL.len()],
            frames_seen: 0,
            frames_validated: 0,
            frames_since_validated: 0,
            checksum_failures: 0,
            malformed_frames: 0,
            unrecognized: BTreeMap::new(),
            commands_sent: 0,
            send_failures: 0,
            consecutive_send_failures: 0,
        }
    }
}

/// Shared diagnostic context for one session
#[derive(Debug, Clone)]
pub struct Diagnostics {
    inner: Arc<Mutex<DiagnosticState>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DiagnosticLimits::default())
    }
}

impl Diagnostics {
    pub fn new(limits: DiagnosticLimits) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DiagnosticState::new(limits))),
        }
    }

    // Counters stay meaningful even if a holder panicked mid-update
    fn state(&self) -> MutexGuard<'_, DiagnosticState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn limits(&self) -> DiagnosticLimits {
        self.state().limits
    }

    /// Record an inbound frame and its classification
    pub fn record_frame(&self, frame: &RawFrame, kind: FrameKind) {
        let mut state = self.state();
        state.frames_seen += 1;
        state.kind_counts[kind.index()] += 1;

        if state.limits.frame_history > 0 {
            if state.history.len() == state.limits.frame_history {
                state.history.pop_front();
            }
            state.history.push_back(frame.clone());
        }
    }

    /// Record the outcome of decoding a frame of `kind`
    ///
    /// A frame counts as validated when it passed its structural checks
    /// and either carried a checksum or yielded at least one field.
    pub fn record_decode(&self, kind: FrameKind, result: &DecodeResult) {
        let mut state = self.state();

        match result.issue {
            Some(DecodeIssue::MalformedFrame) => state.malformed_frames += 1,
            Some(DecodeIssue::ChecksumMismatch { expected, actual }) => {
                state.checksum_failures += 1;
                debug!(expected, actual, "checksum mismatch");
            }
            Some(DecodeIssue::UnrecognizedOpcode { opcode, subopcode }) => {
                *state.unrecognized.entry((opcode, subopcode)).or_insert(0) += 1;
            }
            None => {}
        }

        let validated = result.is_valid()
            && (kind == FrameKind::ProtocolResponse
                || (kind.carries_telemetry() && !result.update.is_empty()));
        if validated {
            state.frames_validated += 1;
            state.frames_since_validated = 0;
        } else {
            state.frames_since_validated += 1;
        }
    }

    /// Record a successful command write
    pub fn record_send_success(&self) {
        let mut state = self.state();
        state.commands_sent += 1;
        state.consecutive_send_failures = 0;
    }

    /// Record a failed command write
    pub fn record_send_failure(&self, reason: &str) {
        let mut state = self.state();
        state.send_failures += 1;
        state.consecutive_send_failures = state.consecutive_send_failures.saturating_add(1);

        if state.consecutive_send_failures == state.limits.unstable_after_failures {
            warn!(
                failures = state.consecutive_send_failures,
                reason, "command writes keep failing"
            );
        }
    }

    /// Recent raw frames, oldest first
    pub fn recent_frames(&self) -> Vec<RawFrame> {
        self.state().history.iter().cloned().collect()
    }

    /// Forget buffered raw frames and the running streaks
    ///
    /// Totals are kept; they describe the whole session.
    pub fn clear_history(&self) {
        let mut state = self.state();
        state.history.clear();
        state.frames_since_validated = 0;
        state.consecutive_send_failures = 0;
    }

    pub fn frame_count(&self, kind: FrameKind) -> u64 {
        self.state().kind_counts[kind.index()]
    }

    pub fn summary(&self) -> DiagnosticSummary {
        let state = self.state();

        let frames_by_kind = FrameKind::ALL
            .iter()
            .filter(|kind| state.kind_counts[kind.index()] > 0)
            .map(|kind| (kind.to_string(), state.kind_counts[kind.index()]))
            .collect();

        let unrecognized_opcodes = state
            .unrecognized
            .iter()
            .map(|((opcode, subopcode), count)| {
                let key = match subopcode {
                    Some(sub) => format!("0x{:02X}/0x{:02X}", opcode, sub),
                    None => format!("0x{:02X}", opcode),
                };
                (key, *count)
            })
            .collect();

        DiagnosticSummary {
            frames_seen: state.frames_seen,
            frames_validated: state.frames_validated,
            frames_since_validated: state.frames_since_validated,
            checksum_failures: state.checksum_failures,
            malformed_frames: state.malformed_frames,
            frames_by_kind,
            unrecognized_opcodes,
            commands_sent: state.commands_sent,
            send_failures: state.send_failures,
            consecutive_send_failures: state.consecutive_send_failures,
        }
    }

    /// Judge the link from recent traffic
    ///
    /// `ProtocolUnknown` looks only at the last `unknown_protocol_window`
    /// frames, so a link that validated once and then went bad is still
    /// reported.
    pub fn health(&self) -> ProtocolHealth {
        let state = self.state();

        if state.limits.unstable_after_failures > 0
            && state.consecutive_send_failures >= state.limits.unstable_after_failures
        {
            ProtocolHealth::ConnectionUnstable
        } else if state.frames_since_validated >= state.limits.unknown_protocol_window {
            ProtocolHealth::ProtocolUnknown
        } else if state.frames_validated > 0 {
            ProtocolHealth::Healthy
        } else {
            ProtocolHealth::AwaitingTelemetry
        }
    }
}
