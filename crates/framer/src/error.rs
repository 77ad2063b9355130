//! Framing errors (thiserror-based).

use thiserror::Error;
use vdec_common::DecoderError;

/// Failure to rebuild access units from the input bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// An access unit does not fit in a destination buffer.
    #[error("Access unit needs {needed} bytes, destination holds {capacity}")]
    DestinationOverflow { needed: usize, capacity: usize },

    /// The first buffer of an RCV stream is not a valid sequence layer.
    #[error("Invalid RCV sequence header: {0}")]
    InvalidSequenceHeader(String),
}

impl From<FramingError> for DecoderError {
    fn from(err: FramingError) -> Self {
        DecoderError::StreamCorrupt(err.to_string())
    }
}
