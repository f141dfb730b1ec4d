//! Protocol errors

use thiserror::Error;

/// Errors that can occur while decoding or encoding frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload was not 8 bytes
    #[error("Malformed frame: expected 8 data bytes, got {len}")]
    MalformedFrame { len: usize },

    /// No decoder for this identifier
    #[error("Unknown frame id {0:#010x}")]
    UnknownFrameId(u32),
}
