//! Client session state.
//!
//! A [`Session`] exists once the handshake has produced a username and a key
//! pair. It interprets inbound messages and builds outbound ones but
//! performs no I/O; the [`Client`](crate::Client) driver moves the bytes.

use parley_crypto::{KeyPair, PublicKey, envelope};
use parley_proto::{DISCONNECT_COMMAND, Message, MessageKind, SERVER_SENDER, notice};
use rand::{CryptoRng, RngCore};

use crate::{ClientError, event::ClientEvent, key_cache::KeyCache};

/// Registered participant's local state.
#[derive(Debug)]
pub struct Session {
    username: String,
    keys: KeyPair,
    cache: KeyCache,
}

impl Session {
    /// Start a session for `username` holding `keys`.
    pub fn new(username: impl Into<String>, keys: KeyPair) -> Self {
        Self { username: username.into(), keys, cache: KeyCache::new() }
    }

    /// Registered username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Our key pair.
    pub fn key_pair(&self) -> &KeyPair {
        &self.keys
    }

    /// Cached keys of other participants.
    pub fn cache(&self) -> &KeyCache {
        &self.cache
    }

    /// Handshake frame announcing our public key.
    pub fn public_key_message(&self) -> Result<Message, ClientError> {
        Ok(Message::public_key(&*self.username, self.keys.public_key().to_der()?))
    }

    /// Plain text message.
    pub fn text_message(&self, text: impl Into<String>) -> Message {
        Message::text(&*self.username, text)
    }

    /// Graceful disconnect command.
    pub fn disconnect_message(&self) -> Message {
        self.text_message(DISCONNECT_COMMAND)
    }

    /// Envelope of `text` for every cached participant except us.
    pub fn encrypted_message<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        text: &str,
    ) -> Result<Message, ClientError> {
        let blob = envelope::build(rng, text.as_bytes(), &self.username, self.cache.entries())?;
        Ok(Message::encrypted(&*self.username, blob))
    }

    /// Key lookup for `username`.
    pub fn key_request(&self, username: &str) -> Message {
        Message::key_request(&*self.username, username)
    }

    /// Cached key for `username`.
    pub fn cached_key(&self, username: &str) -> Option<&PublicKey> {
        self.cache.get(username)
    }

    /// Interpret one inbound message, updating the key cache as needed.
    pub fn handle(&mut self, message: Message) -> Result<ClientEvent, ClientError> {
        match message.kind {
            MessageKind::Text => {
                let text = message
                    .payload
                    .as_deref()
                    .map(|p| String::from_utf8_lossy(p).into_owned())
                    .unwrap_or_default();
                if message.sender == SERVER_SENDER && text == notice::DISCONNECT_ACK {
                    return Ok(ClientEvent::Disconnected);
                }
                Ok(ClientEvent::Text { sender: message.sender, text })
            },

            MessageKind::EncryptedText => Ok(self.open(message)),

            MessageKind::PublicKeyMap => {
                let map = message.decode_key_map()?;
                if self.cache.apply_map(&map)? {
                    Ok(ClientEvent::KeyMapUpdated {
                        version: map.version,
                        usernames: map.usernames().map(str::to_string).collect(),
                    })
                } else {
                    Ok(ClientEvent::StaleKeyMap { version: map.version })
                }
            },

            MessageKind::PublicKey => {
                let der = message.public_key.ok_or_else(|| ClientError::InvalidFrame {
                    reason: "PublicKey message without key".to_string(),
                })?;
                let key = PublicKey::from_der(&der)?;
                self.cache.insert(message.sender.clone(), key);
                Ok(ClientEvent::PublicKey { username: message.sender })
            },

            MessageKind::KeyRequest => Err(ClientError::InvalidFrame {
                reason: "server sent a KeyRequest".to_string(),
            }),
        }
    }

    fn open(&self, message: Message) -> ClientEvent {
        let sender = message.sender;
        let Some(blob) = message.payload else {
            return ClientEvent::Undecryptable { sender, reason: "missing envelope".to_string() };
        };

        match envelope::open(&blob, &self.username, &self.keys) {
            Ok(Some(plaintext)) => match String::from_utf8(plaintext) {
                Ok(plaintext) => ClientEvent::Message { sender, plaintext },
                Err(e) => ClientEvent::Undecryptable { sender, reason: e.to_string() },
            },
            Ok(None) => ClientEvent::NotAddressed { sender },
            Err(e) => ClientEvent::Undecryptable { sender, reason: e.to_string() },
        }
    }
}
