//! Worker stdout reader.
//!
//! Reads NDJSON frames from a worker's stdout and pushes them into a
//! [`TransportSink`]. Two frame shapes are accepted:
//!
//! | Frame                                   | Event                        |
//! |-----------------------------------------|------------------------------|
//! | `{"namespace", "command", "data"?}`     | [`TransportEvent::Message`]  |
//! | `{"minidump": "<base64>"}`              | [`TransportEvent::Binary`]   |
//!
//! Blank lines are skipped; undecodable lines are logged and skipped. End
//! of stream or an I/O error emits exactly one [`TransportEvent::Crash`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::message::Envelope;
use crate::transport::codec::WorkerCodec;
use crate::transport::{TransportEvent, TransportSink};
use crate::{AppError, Result};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Frame {
    Minidump { minidump: String },
    Message(Envelope),
}

/// Parse one stdout line into a [`TransportEvent`].
///
/// - `Ok(Some(event))` for a recognised frame.
/// - `Ok(None)` for a blank line.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] when the line is not valid JSON, matches
/// neither frame shape, or carries an invalid base64 minidump.
pub fn parse_frame(line: &str) -> Result<Option<TransportEvent>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let frame: Frame = serde_json::from_str(line)?;
    match frame {
        Frame::Message(envelope) => Ok(Some(TransportEvent::Message(envelope))),
        Frame::Minidump { minidump } => {
            let bytes = STANDARD
                .decode(minidump.as_bytes())
                .map_err(|e| AppError::Protocol(format!("invalid minidump encoding: {e}")))?;
            Ok(Some(TransportEvent::Binary(bytes)))
        }
    }
}

/// Reader task: drive `stdout` until EOF, error or cancellation.
///
/// Cancellation exits silently; the owner closed the transport on purpose.
pub async fn run_reader<R>(label: String, stdout: R, sink: TransportSink, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, WorkerCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(label, "reader: cancellation received, stopping");
                return;
            }

            item = framed.next() => match item {
                None => {
                    debug!(label, "reader: EOF");
                    sink.emit(TransportEvent::Crash { reason: "stream closed".into() }).await;
                    return;
                }
                Some(Err(AppError::Transport(msg))) => {
                    warn!(label, error = msg.as_str(), "reader: framing error, skipping");
                }
                Some(Err(e)) => {
                    warn!(label, error = %e, "reader: IO error, stopping");
                    sink.emit(TransportEvent::Crash { reason: format!("stream error: {e}") }).await;
                    return;
                }
                Some(Ok(line)) => match parse_frame(&line) {
                    Ok(Some(event)) => {
                        if !sink.emit(event).await {
                            debug!(label, "reader: owner gone, stopping");
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(label, error = %e, raw_line = %line, "reader: parse error, skipping line");
                    }
                },
            },
        }
    }
}
