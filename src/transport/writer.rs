//! Worker stdin writer task.
//!
//! Drains an outbound envelope channel and writes each envelope as one
//! compact JSON line to the worker's stdin.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::message::Envelope;
use crate::{AppError, Result};

/// Writer task.
///
/// Exits cleanly when `cancel` fires or every sender is dropped.
///
/// # Errors
///
/// Returns [`AppError::Transport`] when a write to `stdin` fails, which
/// usually means the worker already exited.
pub async fn run_writer<W>(
    label: String,
    mut stdin: W,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(label, "writer: cancellation received, stopping");
                break;
            }

            msg = rx.recv() => {
                let Some(envelope) = msg else {
                    debug!(label, "writer: channel closed, stopping");
                    break;
                };

                let mut bytes = serde_json::to_vec(&envelope).map_err(|e| {
                    AppError::Transport(format!("failed to serialise outbound message: {e}"))
                })?;
                bytes.push(b'\n');

                stdin.write_all(&bytes).await.map_err(|e| {
                    warn!(label, error = %e, "writer: write to stdin failed");
                    AppError::Transport(format!("write failed: {e}"))
                })?;
                stdin.flush().await.map_err(|e| AppError::Transport(format!("flush failed: {e}")))?;
            }
        }
    }

    Ok(())
}
