//! Protocol error types.

use thiserror::Error;

/// Errors from encoding, decoding, or moving frames over a transport.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Underlying transport read or write failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the stream at a frame boundary.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Frame length prefix exceeds the configured maximum.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared or encoded frame size.
        size: usize,
        /// Maximum accepted frame size.
        max: usize,
    },

    /// Frame body could not be encoded as CBOR.
    #[error("frame encode failed: {reason}")]
    Encode {
        /// Description of the encoding failure.
        reason: String,
    },

    /// Frame body is not a valid CBOR frame.
    #[error("frame decode failed: {reason}")]
    Decode {
        /// Description of the decoding failure.
        reason: String,
    },

    /// Message payload does not match what its kind requires.
    #[error("invalid payload: {reason}")]
    InvalidPayload {
        /// Description of the payload problem.
        reason: String,
    },

    /// A send did not complete within the write timeout.
    #[error("write timed out")]
    WriteTimeout,
}

impl ProtoError {
    /// Returns true if this error means the stream can no longer be used.
    ///
    /// Payload errors concern a single message and leave the stream intact.
    pub fn is_transport_failure(&self) -> bool {
        match self {
            Self::Io(_)
            | Self::ConnectionClosed
            | Self::FrameTooLarge { .. }
            | Self::Decode { .. }
            | Self::WriteTimeout => true,

            Self::Encode { .. } | Self::InvalidPayload { .. } => false,
        }
    }
}
