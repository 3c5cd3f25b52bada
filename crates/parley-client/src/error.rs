//! Client error types.

use parley_crypto::CryptoError;
use parley_proto::ProtoError;
use thiserror::Error;

/// Errors from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Framing or transport failed.
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    /// Key handling or encryption failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Server did not follow the handshake.
    #[error("handshake failed: {reason}")]
    Handshake {
        /// Description of the unexpected reply.
        reason: String,
    },

    /// Server rejected the username outright.
    #[error("username rejected: {reason}")]
    UsernameRejected {
        /// Server notice text.
        reason: String,
    },

    /// Every suggested username was taken in turn.
    #[error("no username accepted after {attempts} attempts")]
    RegistrationExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Server sent a frame the client cannot interpret.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// Description of the frame error.
        reason: String,
    },

    /// Client is in an invalid state for the operation.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Description of the state error.
        reason: String,
    },
}

impl ClientError {
    /// Returns true if this error is fatal (unrecoverable).
    ///
    /// Fatal errors mean the connection is unusable. Transient errors concern
    /// one operation and the session can continue.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Proto(e) => e.is_transport_failure(),

            Self::Handshake { .. }
            | Self::InvalidFrame { .. }
            | Self::RegistrationExhausted { .. } => true,

            Self::Crypto(_) | Self::UsernameRejected { .. } | Self::InvalidState { .. } => false,
        }
    }
}
