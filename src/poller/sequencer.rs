//! Polling state machine
//!
//! Decides which request goes out next and how long to wait after it. It
//! owns no timer and performs no I/O, so every transition can be driven
//! directly from a test; [`task`](super::task) supplies the clock and the
//! transport.
//!
//! ```text
//! Uninitialized --keep-alive--> Initializing --tick--> Cycling(0)
//! Cycling(n) --tick--> Cycling((n + 1) % 5)
//! any --force_reinitialize--> Uninitialized
//! ```

use std::time::Duration;
use tracing::{debug, info};

use crate::protocol::commands::{BatteryRequest, CommandDescriptor, PollCommand, POLL_SEQUENCE};
use crate::protocol::frame::FrameKind;

/// Upper bound on the backoff exponent
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Where the sequencer is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// No keep-alive seen yet; nothing is sent
    Uninitialized,
    /// Keep-alive seen; the next tick starts the cycle
    Initializing,
    /// `step` is the index in [`POLL_SEQUENCE`] of the last request emitted
    Cycling { step: usize },
}

/// Inter-command timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Delay between consecutive requests
    pub command_interval: Duration,
    /// Consecutive write failures tolerated before slowing down
    pub backoff_after_failures: u32,
    /// Longest delay backoff may reach
    pub max_interval: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            command_interval: Duration::from_millis(200),
            backoff_after_failures: 3,
            max_interval: Duration::from_millis(3200),
        }
    }
}

/// One request chosen by [`PollingSequencer::tick`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    pub command: PollCommand,
    pub descriptor: CommandDescriptor,
}

/// Cyclic request scheduler
#[derive(Debug, Clone)]
pub struct PollingSequencer {
    state: SequencerState,
    pacing: Pacing,
    battery: BatteryRequest,
    emitted: u64,
    failures: u64,
    consecutive_failures: u32,
}

impl Default for PollingSequencer {
    fn default() -> Self {
        Self::new(Pacing::default())
    }
}

impl PollingSequencer {
    pub fn new(pacing: Pacing) -> Self {
        Self {
            state: SequencerState::Uninitialized,
            pacing,
            battery: BatteryRequest::default(),
            emitted: 0,
            failures: 0,
            consecutive_failures: 0,
        }
    }

    /// Use a different addressing for the battery request
    pub fn with_battery_request(mut self, battery: BatteryRequest) -> Self {
        self.battery = battery;
        self
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn pacing(&self) -> &Pacing {
        &self.pacing
    }

    /// Whether the sequencer has been triggered and is emitting requests
    pub fn is_active(&self) -> bool {
        self.state != SequencerState::Uninitialized
    }

    /// Feed the kind of an inbound frame
    ///
    /// Returns `true` if this frame started the sequence.
    pub fn observe(&mut self, kind: FrameKind) -> bool {
        kind == FrameKind::KeepAlive && self.observe_keep_alive()
    }

    /// A keep-alive arrived; start the sequence if idle
    pub fn observe_keep_alive(&mut self) -> bool {
        if self.state == SequencerState::Uninitialized {
            info!("Keep-alive received, starting poll sequence");
            self.state = SequencerState::Initializing;
            true
        } else {
            false
        }
    }

    /// Advance one step and return the request to send
    ///
    /// `None` while uninitialized. A step whose write failed is not
    /// repeated; it comes around again on the next cycle.
    pub fn tick(&mut self) -> Option<PollRequest> {
        let step = match self.state {
            SequencerState::Uninitialized => return None,
            SequencerState::Initializing => 0,
            SequencerState::Cycling { step } => (step + 1) % POLL_SEQUENCE.len(),
        };

        self.state = SequencerState::Cycling { step };
        self.emitted += 1;

        let command = POLL_SEQUENCE[step];
        debug!("Poll step {}: {}", step, command);

        Some(PollRequest {
            command,
            descriptor: command.descriptor_with(self.battery),
        })
    }

    /// The last emitted request was written
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// The last emitted request could not be written
    pub fn record_failure(&mut self) {
        self.failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Delay before the next tick
    ///
    /// The base interval while writes succeed; once the failure streak
    /// reaches the threshold it doubles per further failure, capped at
    /// the configured maximum.
    pub fn pacing_interval(&self) -> Duration {
        let base = self.pacing.command_interval;
        let threshold = self.pacing.backoff_after_failures;

        if threshold == 0 || self.consecutive_failures < threshold {
            return base;
        }

        let shift = (self.consecutive_failures - threshold + 1).min(MAX_BACKOFF_SHIFT);
        base.saturating_mul(1u32 << shift).min(self.pacing.max_interval.max(base))
    }

    /// Return to `Uninitialized` and clear every counter
    pub fn force_reinitialize(&mut self) {
        if self.is_active() {
            info!("Poll sequence reset after {} requests", self.emitted);
        }
        self.state = SequencerState::Uninitialized;
        self.emitted = 0;
        self.failures = 0;
        self.consecutive_failures = 0;
    }

    /// Requests emitted since the last reset
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Failed writes since the last reset
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(sequencer: &mut PollingSequencer, n: usize) -> Vec<PollCommand> {
        (0..n).filter_map(|_| sequencer.tick()).map(|r| r.command).collect()
    }

    #[test]
    fn test_idle_until_keep_alive() {
        let mut sequencer = PollingSequencer::default();
        assert_eq!(sequencer.state(), SequencerState::Uninitialized);
        assert!(sequencer.tick().is_none());

        assert!(!sequencer.observe(FrameKind::MainTelemetry8));
        assert!(sequencer.tick().is_none());

        assert!(sequencer.observe(FrameKind::KeepAlive));
        assert_eq!(sequencer.state(), SequencerState::Initializing);
    }

    #[test]
    fn test_first_tick_is_get_info() {
        let mut sequencer = PollingSequencer::default();
        sequencer.observe_keep_alive();

        let request = sequencer.tick().unwrap();
        assert_eq!(request.command, PollCommand::GetInfo);
        assert_eq!(request.descriptor, PollCommand::GetInfo.descriptor());
        assert_eq!(sequencer.state(), SequencerState::Cycling { step: 0 });
    }

    #[test]
    fn test_cycle_length_five() {
        let mut sequencer = PollingSequencer::default();
        sequencer.observe_keep_alive();

        let emitted = commands(&mut sequencer, 6);
        assert_eq!(
            emitted,
            vec![
                PollCommand::GetInfo,
                PollCommand::GetBattery,
                PollCommand::GetOdometer,
                PollCommand::GetRealtime,
                PollCommand::GetTemperature,
                PollCommand::GetInfo,
            ]
        );
        assert_eq!(sequencer.emitted(), 6);
    }

    #[test]
    fn test_repeated_keep_alive_does_not_restart() {
        let mut sequencer = PollingSequencer::default();
        sequencer.observe_keep_alive();
        sequencer.tick();
        sequencer.tick();

        assert!(!sequencer.observe_keep_alive());
        assert_eq!(sequencer.state(), SequencerState::Cycling { step: 1 });
    }

    #[test]
    fn test_failed_step_is_skipped() {
        let mut sequencer = PollingSequencer::default();
        sequencer.observe_keep_alive();

        assert_eq!(sequencer.tick().unwrap().command, PollCommand::GetInfo);
        sequencer.record_failure();
        assert_eq!(sequencer.tick().unwrap().command, PollCommand::GetBattery);
        assert_eq!(sequencer.failures(), 1);
    }

    #[test]
    fn test_backoff() {
        let mut sequencer = PollingSequencer::new(Pacing {
            command_interval: Duration::from_millis(200),
            backoff_after_failures: 3,
            max_interval: Duration::from_millis(1000),
        });

        sequencer.record_failure();
        sequencer.record_failure();
        assert_eq!(sequencer.pacing_interval(), Duration::from_millis(200));

        sequencer.record_failure();
        assert_eq!(sequencer.pacing_interval(), Duration::from_millis(400));

        sequencer.record_failure();
        assert_eq!(sequencer.pacing_interval(), Duration::from_millis(800));

        sequencer.record_failure();
        assert_eq!(sequencer.pacing_interval(), Duration::from_millis(1000));

        for _ in 0..100 {
            sequencer.record_failure();
        }
        assert_eq!(sequencer.pacing_interval(), Duration::from_millis(1000));

        sequencer.record_success();
        assert_eq!(sequencer.pacing_interval(), Duration::from_millis(200));
    }

    #[test]
    fn test_force_reinitialize() {
        let mut sequencer = PollingSequencer::default();
        sequencer.observe_keep_alive();
        sequencer.tick();
        sequencer.record_failure();

        sequencer.force_reinitialize();
        assert_eq!(sequencer.state(), SequencerState::Uninitialized);
        assert_eq!(sequencer.emitted(), 0);
        assert_eq!(sequencer.failures(), 0);
        assert_eq!(sequencer.consecutive_failures(), 0);
        assert!(sequencer.tick().is_none());

        // Starts over from GetInfo
        sequencer.observe_keep_alive();
        assert_eq!(sequencer.tick().unwrap().command, PollCommand::GetInfo);
    }

    #[test]
    fn test_dedicated_battery_opcode() {
        let mut sequencer =
            PollingSequencer::default().with_battery_request(BatteryRequest::DedicatedOpcode);
        sequencer.observe_keep_alive();
        sequencer.tick();

        let battery = sequencer.tick().unwrap();
        assert_eq!(battery.command, PollCommand::GetBattery);
        assert_eq!(battery.descriptor.opcode, 0x23);
        assert_eq!(battery.descriptor.subopcode, None);
    }
}
