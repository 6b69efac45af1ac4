//! Poller task
//!
//! Runs a [`PollingSequencer`] on the tokio clock: one write at a time,
//! awaited to completion, then the pacing delay, then the next step. The
//! session steers it through a signal channel and stops it through a
//! shutdown watch. Stopping hands the sequencer back, reset.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::sequencer::PollingSequencer;
use crate::diagnostics::Diagnostics;
use crate::error::{Result, ScootLinkError};
use crate::transport::CommandSink;

/// Messages from the session to a running poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerSignal {
    /// A keep-alive frame arrived
    KeepAlive,
    /// Drop back to idle and wait for the next keep-alive
    Reinitialize,
}

impl PollingSequencer {
    /// Apply a session signal
    ///
    /// Returns `true` if the sequencer changed state.
    pub fn apply(&mut self, signal: PollerSignal) -> bool {
        match signal {
            PollerSignal::KeepAlive => self.observe_keep_alive(),
            PollerSignal::Reinitialize => {
                let was_active = self.is_active();
                self.force_reinitialize();
                was_active
            }
        }
    }
}

/// Control handle for a spawned poller
#[derive(Debug)]
pub struct PollerHandle {
    signals: mpsc::UnboundedSender<PollerSignal>,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<PollingSequencer>,
}

impl PollerHandle {
    /// Forward a signal; `false` if the task has already exited
    pub fn signal(&self, signal: PollerSignal) -> bool {
        self.signals.send(signal).is_ok()
    }

    pub fn notify_keep_alive(&self) -> bool {
        self.signal(PollerSignal::KeepAlive)
    }

    pub fn reinitialize(&self) -> bool {
        self.signal(PollerSignal::Reinitialize)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the task and take back its sequencer
    ///
    /// No further writes start once this is called; a write already in
    /// flight is abandoned. The returned sequencer is `Uninitialized`.
    ///
    /// # Errors
    ///
    /// Returns [`ScootLinkError::SessionClosed`] if the task panicked.
    pub async fn stop(self) -> Result<PollingSequencer> {
        // Err only if the task is already gone, which join reports
        let _ = self.shutdown.send(true);
        self.join.await.map_err(|e| {
            warn!("Poller task ended abnormally: {}", e);
            ScootLinkError::SessionClosed
        })
    }
}

/// Spawn a poller writing through `sink`
///
/// The sequencer keeps whatever state it has; a fresh one stays idle until
/// a [`PollerSignal::KeepAlive`] arrives.
pub fn spawn_poller<S>(sequencer: PollingSequencer, sink: S, diagnostics: Diagnostics) -> PollerHandle
where
    S: CommandSink + 'static,
{
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let join = tokio::spawn(run_poller(sequencer, sink, diagnostics, signal_rx, shutdown_rx));

    PollerHandle {
        signals: signal_tx,
        shutdown: shutdown_tx,
        join,
    }
}

async fn run_poller<S: CommandSink>(
    mut sequencer: PollingSequencer,
    mut sink: S,
    diagnostics: Diagnostics,
    mut signals: mpsc::UnboundedReceiver<PollerSignal>,
    mut shutdown: watch::Receiver<bool>,
) -> PollingSequencer {
    debug!("Poller task started");

    'run: loop {
        if !sequencer.is_active() {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break 'run,
                signal = signals.recv() => match signal {
                    Some(signal) => { sequencer.apply(signal); }
                    None => break 'run,
                },
            }
            continue;
        }

        let Some(request) = sequencer.tick() else {
            continue;
        };

        match request.descriptor.encode() {
            Ok(frame) => {
                let outcome = tokio::select! {
                    biased;
                    _ = shutdown.changed() => break 'run,
                    outcome = sink.write_command(&frame) => outcome,
                };

                match outcome {
                    Ok(()) => {
                        debug!("Sent {} ({})", request.command, hex::encode(&frame));
                        sequencer.record_success();
                        diagnostics.record_send_success();
                    }
                    Err(e) => {
                        warn!("Failed to send {}: {}", request.command, e);
                        sequencer.record_failure();
                        diagnostics.record_send_failure(&e.to_string());
                    }
                }
            }
            Err(e) => {
                warn!("Cannot encode {}: {}", request.descriptor, e);
                sequencer.record_failure();
                diagnostics.record_send_failure(&e.to_string());
            }
        }

        let pause = sleep(sequencer.pacing_interval());
        tokio::pin!(pause);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break 'run,
                signal = signals.recv() => match signal {
                    Some(PollerSignal::Reinitialize) => {
                        sequencer.apply(PollerSignal::Reinitialize);
                        break;
                    }
                    Some(signal) => { sequencer.apply(signal); }
                    None => break 'run,
                },
                _ = &mut pause => break,
            }
        }
    }

    sequencer.force_reinitialize();
    info!("Poller task stopped");
    sequencer
}
