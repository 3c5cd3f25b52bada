//! Chat message: the unit routed between participants.
//!
//! A [`Message`] carries either a `payload` (text, envelope, or key map) or
//! an attached public key, never both. Which one is meaningful is decided by
//! [`MessageKind`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::{ProtoError, key_map::KeyMap};

/// Sender name used on every server-originated message.
pub const SERVER_SENDER: &str = "Server";

/// Text command a client sends to end its session gracefully.
pub const DISCONNECT_COMMAND: &str = "/disconnect";

/// Message type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum MessageKind {
    /// Plain UTF-8 text (chat line, command, or server notice).
    Text = 0,
    /// Multi-recipient envelope of per-recipient ciphertexts.
    EncryptedText = 1,
    /// Public key announcement (handshake) or key lookup reply.
    PublicKey = 2,
    /// Request for one participant's public key.
    KeyRequest = 3,
    /// Full snapshot of every active participant's public key.
    PublicKeyMap = 4,
}

impl MessageKind {
    /// Whether messages of this kind may carry a `recipient`.
    pub fn is_directed(self) -> bool {
        matches!(self, Self::EncryptedText | Self::KeyRequest | Self::PublicKey)
    }
}

/// A single chat message.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Username of the originator, or [`SERVER_SENDER`].
    pub sender: String,
    /// Target username for directed kinds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recipient: Option<String>,
    /// Body bytes (UTF-8 text, envelope, or encoded key map).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<Bytes>,
    /// Message type.
    pub kind: MessageKind,
    /// DER-encoded public key for `PublicKey` messages.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub public_key: Option<Bytes>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .field("kind", &self.kind)
            .field("payload", &self.payload.as_ref().map(|p| format!("<{} bytes>", p.len())))
            .field("public_key", &self.public_key.as_ref().map(|k| format!("<{} bytes>", k.len())))
            .finish()
    }
}

impl Message {
    fn new(sender: impl Into<String>, kind: MessageKind) -> Self {
        Self { sender: sender.into(), recipient: None, payload: None, kind, public_key: None }
    }

    /// Plain text message.
    pub fn text(sender: impl Into<String>, text: impl Into<String>) -> Self {
        let mut message = Self::new(sender, MessageKind::Text);
        message.payload = Some(Bytes::from(text.into()));
        message
    }

    /// Text notice originated by the server.
    pub fn notice(text: impl Into<String>) -> Self {
        Self::text(SERVER_SENDER, text)
    }

    /// Encrypted envelope addressed to whoever finds their name in it.
    pub fn encrypted(sender: impl Into<String>, envelope: impl Into<Bytes>) -> Self {
        let mut message = Self::new(sender, MessageKind::EncryptedText);
        message.payload = Some(envelope.into());
        message
    }

    /// Public key announcement sent during the handshake.
    pub fn public_key(sender: impl Into<String>, key_der: impl Into<Bytes>) -> Self {
        let mut message = Self::new(sender, MessageKind::PublicKey);
        message.public_key = Some(key_der.into());
        message
    }

    /// Reply to a key lookup: `owner`'s key, directed at `requester`.
    pub fn public_key_reply(
        owner: impl Into<String>,
        requester: impl Into<String>,
        key_der: impl Into<Bytes>,
    ) -> Self {
        let mut message = Self::public_key(owner, key_der);
        message.recipient = Some(requester.into());
        message
    }

    /// Lookup request for `username`'s public key.
    pub fn key_request(sender: impl Into<String>, username: impl Into<String>) -> Self {
        let mut message = Self::new(sender, MessageKind::KeyRequest);
        message.recipient = Some(username.into());
        message
    }

    /// Request for a fresh key map snapshot, sent by a client.
    pub fn key_map_request(sender: impl Into<String>) -> Self {
        Self::new(sender, MessageKind::PublicKeyMap)
    }

    /// Key map snapshot, sent by the server.
    pub fn key_map(map: &KeyMap) -> Result<Self, ProtoError> {
        let mut message = Self::new(SERVER_SENDER, MessageKind::PublicKeyMap);
        message.payload = Some(map.to_payload()?);
        Ok(message)
    }

    /// Replace the sender, returning the updated message.
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Payload decoded as UTF-8 for `Text` messages.
    ///
    /// Returns `None` for other kinds, a missing payload, or invalid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        if self.kind != MessageKind::Text {
            return None;
        }
        self.payload.as_deref().and_then(|p| std::str::from_utf8(p).ok())
    }

    /// Whether this is the graceful disconnect command (case-insensitive).
    pub fn is_disconnect_command(&self) -> bool {
        self.as_text().is_some_and(|text| text.eq_ignore_ascii_case(DISCONNECT_COMMAND))
    }

    /// Decode the key map carried by a `PublicKeyMap` message.
    pub fn decode_key_map(&self) -> Result<KeyMap, ProtoError> {
        if self.kind != MessageKind::PublicKeyMap {
            return Err(ProtoError::InvalidPayload {
                reason: format!("expected PublicKeyMap, got {:?}", self.kind),
            });
        }
        let payload = self
            .payload
            .as_ref()
            .ok_or_else(|| ProtoError::InvalidPayload { reason: "missing key map".to_string() })?;
        KeyMap::from_payload(payload)
    }
}
