//! Common error types for frame and field decoding

use thiserror::Error;

/// Per-frame and per-field decoding errors
///
/// These are all recoverable: a frame that fails to decode contributes
/// nothing to the result, a field that fails to extract is omitted while
/// its siblings still extract. Nothing here aborts a whole decode run.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("field at offset {offset} (length {length}) outside payload of {payload_len} bytes")]
    FieldOutOfRange {
        offset: usize,
        length: usize,
        payload_len: usize,
    },
}
