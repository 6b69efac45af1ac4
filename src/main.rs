//! # Scoot Link
//!
//! Replay a captured notification stream through a telemetry session.
//!
//! Each line of the capture is one notification in hex, optionally preceded
//! by an RFC 3339 timestamp. Every published snapshot is printed to stdout
//! as a JSON line. When `[scanner.targets]` is configured, the fixed-size
//! frames of the capture are also run through the field scanner and the
//! findings printed as calibration suggestions.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use scoot_link::config::{Config, LoggingConfig};
use scoot_link::protocol::frame::{FrameKind, RawFrame};
use scoot_link::protocol::layout::{FieldLayout, RawEncoding};
use scoot_link::scanner::{FieldScanner, DEFAULT_STABLE_RATIO};
use scoot_link::session::{inbound_channel, TelemetrySession};
use scoot_link::transport::LoggingSink;

const USAGE: &str = "usage: scoot-link <capture-file|-> [config.toml]";

/// Main entry point for Scoot Link
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (defaults when no file is given)
///    - Set up logging, to stderr and optionally to a daily file
///    - Read and parse the capture
///
/// 2. **Replay**
///    - Feed frames through the inbound channel in capture order
///    - Print every published snapshot as JSON
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Teardown and report**
///    - Disconnect the session and report protocol health
///    - Run the field scanner if calibration targets are configured
///
/// # Errors
///
/// Returns error if the arguments, configuration or capture are invalid.
///
/// # Examples
///
/// ```bash
/// scoot-link ride.hex config/default.toml > snapshots.jsonl
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (capture_path, config_path) = parse_args(&args)?;

    let config = match config_path {
        Some(path) => {
            Config::load(path).with_context(|| format!("loading configuration from {}", path))?
        }
        None => Config::default(),
    };

    let _log_guard = init_logging(&config.logging);
    info!("Scoot Link v{} starting...", env!("CARGO_PKG_VERSION"));

    let text = read_capture(capture_path).await?;
    let frames = parse_capture(&text)?;
    info!("Loaded {} frames from {}", frames.len(), capture_path);

    let mut session = TelemetrySession::from_config(&config);
    if config.polling.enabled {
        session.attach_poller(LoggingSink::new()).await;
    }

    let (tx, mut rx) = inbound_channel(config.session.inbound_queue_capacity);
    let replay = frames.clone();
    let feeder = tokio::spawn(async move {
        for frame in replay {
            if tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if session.process_frame(&frame).published {
                        println!("{}", serde_json::to_string(session.snapshot())?);
                    }
                }
                None => break,
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    feeder.abort();
    let discarded = session.disconnect(&mut rx).await?;
    if discarded > 0 {
        info!("Discarded {} unprocessed frames", discarded);
    }

    report_health(&session);

    if let Some(targets) = &config.scanner.targets {
        let scanner = FieldScanner::new(config.scanner.tolerances());

        for (kind, section) in [
            (FrameKind::MainTelemetry8, "main_frame"),
            (FrameKind::ExtendedTelemetry16, "extended_frame"),
        ] {
            let candidates: Vec<&[u8]> = frames
                .iter()
                .filter(|frame| frame.kind() == kind)
                .map(|frame| frame.bytes())
                .collect();

            if candidates.is_empty() {
                continue;
            }

            let report = scanner.scan_many(&candidates, targets);
            for line in report.recommendations() {
                println!("# {}: {}", kind, line);
            }
            for layout in report.suggest_layout(DEFAULT_STABLE_RATIO) {
                println!("{}", layout_toml(section, &layout));
            }
        }
    }

    Ok(())
}

fn parse_args(args: &[String]) -> Result<(&str, Option<&str>)> {
    match args {
        [capture] => Ok((capture.as_str(), None)),
        [capture, config] => Ok((capture.as_str(), Some(config.as_str()))),
        _ => bail!(USAGE),
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured level. The returned guard flushes
/// the file writer and must live until exit.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "scoot-link.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();

            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();

            None
        }
    }
}

async fn read_capture(path: &str) -> Result<String> {
    if path == "-" {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("reading capture from stdin")?;
        Ok(text)
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading capture {}", path))
    }
}

/// Parse capture lines into frames
///
/// Blank lines and `#` comments are skipped. A line whose first token is an
/// RFC 3339 timestamp keeps that arrival time; otherwise the current time
/// is used.
fn parse_capture(text: &str) -> Result<Vec<RawFrame>> {
    let mut frames = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (received_at, hex_part) = match line.split_once(char::is_whitespace) {
            Some((first, rest)) => match DateTime::parse_from_rfc3339(first) {
                Ok(at) => (at.with_timezone(&Utc), rest),
                Err(_) => (Utc::now(), line),
            },
            None => (Utc::now(), line),
        };

        match RawFrame::from_hex(hex_part, received_at) {
            Ok(frame) => frames.push(frame),
            Err(e) => warn!("Skipping capture line {}: {}", number + 1, e),
        }
    }

    Ok(frames)
}

fn report_health(session: &TelemetrySession) {
    let health = session.health();
    let summary = session.diagnostics().summary();

    info!(
        "Protocol health: {} ({}/{} frames validated, {} checksum failures, {} commands sent)",
        health,
        summary.frames_validated,
        summary.frames_seen,
        summary.checksum_failures,
        summary.commands_sent
    );

    if let Some(advice) = health.recommendation() {
        warn!("{}", advice);
    }

    for (opcode, count) in &summary.unrecognized_opcodes {
        info!("Unrecognized response {} seen {} times", opcode, count);
    }
}

/// Render a suggested layout as a `[calibration]` TOML entry
fn layout_toml(section: &str, layout: &FieldLayout) -> String {
    let mut entry = format!(
        "[[calibration.{}]]\nfield = \"{}\"\noffset = {}\nwidth = {}\nscale = {}",
        section, layout.field, layout.offset, layout.width, layout.scale
    );
    let encoding = match layout.encoding {
        RawEncoding::Unsigned => None,
        RawEncoding::Signed => Some("signed"),
        RawEncoding::Offset40 => Some("offset40"),
        RawEncoding::Offset20Tenths => Some("offset20_tenths"),
    };
    if let Some(encoding) = encoding {
        entry.push_str(&format!("\nencoding = \"{}\"", encoding));
    }
    entry
}
