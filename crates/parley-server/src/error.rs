//! Server error types.

use parley_proto::ProtoError;

use crate::{handler::CloseReason, registry::RegistryError};

/// Errors that stop the server itself.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Errors that end a single connection.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Frame not allowed in the connection's current state.
    #[error("protocol violation in {state}: {reason}")]
    ProtocolViolation {
        /// State the connection was in.
        state: &'static str,
        /// What was wrong with the frame.
        reason: String,
    },

    /// Reading or writing the connection failed.
    #[error("transport failure: {0}")]
    Transport(#[from] ProtoError),

    /// Registry refused an operation the handshake depends on.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl HandlerError {
    /// Whether the peer broke the protocol, as opposed to the stream failing.
    pub fn is_protocol_violation(&self) -> bool {
        match self {
            Self::ProtocolViolation { .. } | Self::Registry(_) => true,
            Self::Transport(e) => !e.is_transport_failure(),
        }
    }

    /// Close reason this error drives the connection into.
    pub fn close_reason(&self) -> CloseReason {
        if self.is_protocol_violation() {
            CloseReason::ProtocolViolation
        } else {
            CloseReason::TransportFailure
        }
    }
}
