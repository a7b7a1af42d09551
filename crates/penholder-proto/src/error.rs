//! Protocol error types.

use thiserror::Error;

/// Errors from encoding, decoding and framing.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// CBOR serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// CBOR deserialization failed (truncated, wrong shape, invalid field).
    #[error("decode failed: {0}")]
    Decode(String),

    /// Length prefix exceeds the frame cap.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Announced size.
        size: u32,
        /// Allowed maximum.
        max: u32,
    },

    /// Stream error while framing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot decoded but violates session invariants.
    #[error("malformed snapshot: {reason}")]
    MalformedSnapshot {
        /// Which invariant failed.
        reason: String,
    },
}

impl ProtoError {
    /// Returns true if the stream carrying this error can no longer be trusted.
    ///
    /// A bad payload inside a well-formed frame is recoverable: the frame is
    /// dropped and reading continues. Oversized frames and I/O failures leave
    /// the stream position unknown.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::FrameTooLarge { .. } | Self::Io(_) => true,
            Self::Encode(_) | Self::Decode(_) | Self::MalformedSnapshot { .. } => false,
        }
    }
}
