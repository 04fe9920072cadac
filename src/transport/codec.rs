//! Line framing for a child worker's stdin and stdout.
//!
//! A worker writes one JSON object per line on stdout: either a message
//! envelope (`{"namespace", "command", "data"}`) or a crash dump
//! (`{"minidump": "<base64>"}`). The bridge writes envelopes to the worker's
//! stdin the same way. This module only splits lines; the reader decides
//! what each line means.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Longest stdout line a worker may send: 1 MiB, which leaves room for a
/// base64 minidump.
///
/// A longer line is reported once as [`AppError::Transport`] (`"line too
/// long"`); the rest of it is discarded up to the next newline and the
/// stream carries on.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Codec for both pipes of a child worker.
///
/// Only stdout lines are capped; envelopes the bridge writes to stdin are
/// built locally and encoded as-is.
#[derive(Debug)]
pub struct WorkerCodec(LinesCodec);

impl WorkerCodec {
    /// Codec capped at [`MAX_LINE_BYTES`].
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for WorkerCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WorkerCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(framing_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(framing_error)
    }
}

impl Encoder<String> for WorkerCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(framing_error)
    }
}

fn framing_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Transport(format!("line too long: worker frame over {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
