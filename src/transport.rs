//! Outbound command transport
//!
//! The poller never talks to a BLE stack directly. It writes complete
//! command frames through a [`CommandSink`], which a host application
//! implements over its GATT write characteristic. Tests use the mock.

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;

/// Anything that can deliver a command frame to the scooter
#[async_trait]
pub trait CommandSink: Send {
    /// Write one complete, checksummed frame
    ///
    /// # Errors
    ///
    /// Returns [`ScootLinkError::Transport`](crate::error::ScootLinkError::Transport)
    /// if the write was rejected. The caller treats this as a failed poll
    /// step, not a fatal error.
    async fn write_command(&mut self, frame: &[u8]) -> Result<()>;
}

/// Sink that only logs outgoing frames
///
/// Used when replaying a capture: there is no device to write to, but the
/// command schedule is still worth seeing.
#[derive(Debug, Default, Clone)]
pub struct LoggingSink {
    written: u64,
}

impl LoggingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames written so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl CommandSink for LoggingSink {
    async fn write_command(&mut self, frame: &[u8]) -> Result<()> {
        self.written += 1;
        info!(frame = %hex::encode(frame), "poll command");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::MockCommandSink;
    use super::*;
    use crate::error::ScootLinkError;

    #[tokio::test]
    async fn test_logging_sink_counts() {
        let mut sink = LoggingSink::new();
        sink.write_command(&[0x55, 0xAA, 0x02]).await.unwrap();
        sink.write_command(&[0x55, 0xAA, 0x03]).await.unwrap();
        assert_eq!(sink.written(), 2);
    }

    #[tokio::test]
    async fn test_mock_records_frames() {
        let mut sink = MockCommandSink::new();
        let observer = sink.clone();

        sink.write_command(&[0x01, 0x02]).await.unwrap();
        assert_eq!(observer.get_written_frames(), vec![vec![0x01, 0x02]]);
    }

    #[tokio::test]
    async fn test_mock_injected_failure() {
        let mut sink = MockCommandSink::new();
        sink.set_write_error("gatt busy");

        let err = sink.write_command(&[0x01]).await.unwrap_err();
        assert!(matches!(err, ScootLinkError::Transport(ref m) if m == "gatt busy"));
        assert!(sink.get_written_frames().is_empty());

        sink.clear_write_error();
        assert!(sink.write_command(&[0x01]).await.is_ok());
    }
}
