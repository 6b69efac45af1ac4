//! # Telemetry Session
//!
//! One connection's worth of state. The host's BLE layer pushes every
//! notification into an mpsc channel as a [`RawFrame`]; the session
//! consumes them strictly in order and runs each through
//! classify → decode → merge without blocking. Snapshot changes are
//! published on a `watch` channel. Outbound, the session owns the poller
//! task and forwards keep-alives to it.
//!
//! ## Usage
//!
//! ```no_run
//! use scoot_link::config::Config;
//! use scoot_link::protocol::frame::RawFrame;
//! use scoot_link::session::{inbound_channel, TelemetrySession};
//! use scoot_link::transport::LoggingSink;
//!
//! # async fn example() -> scoot_link::error::Result<()> {
//! let config = Config::default();
//! let mut session = TelemetrySession::from_config(&config);
//! session.attach_poller(LoggingSink::new()).await;
//!
//! let (tx, mut rx) = inbound_channel(config.session.inbound_queue_capacity);
//! let mut updates = session.subscribe();
//!
//! tx.send(RawFrame::now(vec![0x00, 0x01])).await.ok();
//! drop(tx);
//! session.run(&mut rx).await;
//!
//! println!("{:?}", *updates.borrow_and_update());
//! session.disconnect(&mut rx).await?;
//! # Ok(())
//! # }
//! ```

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::diagnostics::{Diagnostics, ProtocolHealth};
use crate::error::Result;
use crate::poller::{spawn_poller, PollerHandle, PollingSequencer};
use crate::protocol::decoder::{DecodeIssue, TelemetryDecoder};
use crate::protocol::frame::{FrameKind, RawFrame};
use crate::telemetry::{TelemetryAggregator, TelemetrySnapshot};
use crate::transport::CommandSink;

/// Bounded channel carrying notifications into a session
pub fn inbound_channel(capacity: usize) -> (mpsc::Sender<RawFrame>, mpsc::Receiver<RawFrame>) {
    mpsc::channel(capacity.max(1))
}

/// What happened to one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    pub kind: FrameKind,
    /// Fields the decoder produced (before plausibility checks)
    pub decoded_fields: usize,
    pub issue: Option<DecodeIssue>,
    /// Whether a new snapshot was published
    pub published: bool,
}

/// Live telemetry session for one connected scooter
#[derive(Debug)]
pub struct TelemetrySession {
    decoder: TelemetryDecoder,
    aggregator: TelemetryAggregator,
    diagnostics: Diagnostics,
    snapshot_tx: watch::Sender<TelemetrySnapshot>,
    sequencer_template: PollingSequencer,
    poller: Option<PollerHandle>,
}

impl TelemetrySession {
    /// Create a session without a poller
    pub fn new(decoder: TelemetryDecoder, diagnostics: Diagnostics, sequencer: PollingSequencer) -> Self {
        let (snapshot_tx, _) = watch::channel(TelemetrySnapshot::default());

        Self {
            decoder,
            aggregator: TelemetryAggregator::new(),
            diagnostics,
            snapshot_tx,
            sequencer_template: sequencer,
            poller: None,
        }
    }

    /// Create a session from loaded configuration
    pub fn from_config(config: &Config) -> Self {
        info!("Using calibration variant '{}'", config.calibration.variant);

        Self::new(
            TelemetryDecoder::new(config.calibration.clone()),
            Diagnostics::new(config.diagnostic_limits()),
            PollingSequencer::new(config.polling.pacing())
                .with_battery_request(config.polling.battery_request),
        )
    }

    /// Receive every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> &TelemetrySnapshot {
        self.aggregator.snapshot()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn health(&self) -> ProtocolHealth {
        self.diagnostics.health()
    }

    pub fn has_poller(&self) -> bool {
        self.poller.is_some()
    }

    /// Start polling through `sink`
    ///
    /// The poller stays idle until the next keep-alive frame. Any poller
    /// already attached is stopped first.
    pub async fn attach_poller<S>(&mut self, sink: S)
    where
        S: CommandSink + 'static,
    {
        if let Some(Err(e)) = self.stop_poller().await {
            warn!("Previous poller ended abnormally: {}", e);
        }
        self.poller = Some(spawn_poller(
            self.sequencer_template.clone(),
            sink,
            self.diagnostics.clone(),
        ));
    }

    /// Send the attached poller back to its uninitialized state
    ///
    /// Polling resumes on the next keep-alive. Returns `false` when no
    /// poller is attached or its task has already ended.
    pub fn reinitialize_poller(&self) -> bool {
        match &self.poller {
            Some(poller) => poller.reinitialize(),
            None => false,
        }
    }

    async fn stop_poller(&mut self) -> Option<Result<PollingSequencer>> {
        let handle = self.poller.take()?;
        Some(handle.stop().await)
    }

    /// Run one frame through classify → decode → merge
    ///
    /// Never fails; a frame that cannot be decoded only shows up in the
    /// diagnostics and in the returned outcome.
    pub fn process_frame(&mut self, frame: &RawFrame) -> FrameOutcome {
        let kind = frame.kind();
        debug!("Frame {} ({})", frame.to_hex(), kind);

        self.diagnostics.record_frame(frame, kind);

        if kind == FrameKind::KeepAlive {
            if let Some(poller) = &self.poller {
                poller.notify_keep_alive();
            }
        }

        let result = self.decoder.decode(kind, frame.bytes());
        self.diagnostics.record_decode(kind, &result);

        let was_connected = self.aggregator.snapshot().is_connected;
        let changed = self.aggregator.merge(&result.update, frame.received_at());
        let reconnected = !was_connected && self.aggregator.snapshot().is_connected;

        let published = changed || reconnected;
        if published {
            self.publish();
        }

        FrameOutcome {
            kind,
            decoded_fields: result.update.len(),
            issue: result.issue,
            published,
        }
    }

    /// Consume frames until every sender is dropped
    ///
    /// Returns the number of frames processed.
    pub async fn run(&mut self, inbound: &mut mpsc::Receiver<RawFrame>) -> u64 {
        let mut processed = 0;

        while let Some(frame) = inbound.recv().await {
            self.process_frame(&frame);
            processed += 1;
        }

        debug!("Inbound channel closed after {} frames", processed);
        processed
    }

    /// Tear the session down after the link dropped
    ///
    /// Stops the poller, discards frames still queued in `inbound`, and
    /// publishes the last snapshot flagged as disconnected. The readings
    /// themselves are kept. Returns how many queued frames were discarded.
    ///
    /// # Errors
    ///
    /// Returns [`ScootLinkError::SessionClosed`](crate::error::ScootLinkError::SessionClosed)
    /// if the poller task had panicked. Teardown still completes.
    pub async fn disconnect(&mut self, inbound: &mut mpsc::Receiver<RawFrame>) -> Result<usize> {
        let stopped = self.stop_poller().await;

        let mut discarded = 0;
        while inbound.try_recv().is_ok() {
            discarded += 1;
        }

        self.diagnostics.clear_history();
        self.aggregator.mark_disconnected();
        self.publish();

        info!(
            "Session disconnected ({} queued frames discarded, {} snapshot updates)",
            discarded,
            self.aggregator.update_count()
        );

        if let Some(result) = stopped {
            let sequencer = result?;
            debug!("Poller stopped in state {:?}", sequencer.state());
        }

        Ok(discarded)
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.aggregator.snapshot().clone());
    }
}
