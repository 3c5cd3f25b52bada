//! Key map snapshot.
//!
//! The server rebuilds the full map every time membership changes and ships
//! it as the payload of a `PublicKeyMap` message. It is never patched
//! incrementally.
//!
//! # Invariants
//!
//! - Every key is base64 (standard alphabet) of a DER public key
//! - `version` increases with every membership change on the server; a
//!   client holding version N ignores any map with a lower version

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ProtoError;

/// Snapshot of username → base64(public key DER).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMap {
    /// Registry membership version this snapshot was taken at.
    pub version: u64,
    /// Username → base64-encoded DER public key.
    pub keys: BTreeMap<String, String>,
}

impl KeyMap {
    /// Create an empty map at the given version.
    pub fn new(version: u64) -> Self {
        Self { version, keys: BTreeMap::new() }
    }

    /// Add or replace `username`'s key.
    pub fn insert(&mut self, username: impl Into<String>, key_der: &[u8]) {
        self.keys.insert(username.into(), STANDARD.encode(key_der));
    }

    /// Number of participants in the snapshot.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether `username` is present.
    pub fn contains(&self, username: &str) -> bool {
        self.keys.contains_key(username)
    }

    /// Usernames in sorted order.
    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Decoded DER key for `username`.
    pub fn key_der(&self, username: &str) -> Option<Result<Vec<u8>, ProtoError>> {
        self.keys.get(username).map(|encoded| decode_key(username, encoded))
    }

    /// Decode every entry, failing on the first malformed one.
    pub fn decode_all(&self) -> Result<Vec<(String, Vec<u8>)>, ProtoError> {
        self.keys
            .iter()
            .map(|(username, encoded)| Ok((username.clone(), decode_key(username, encoded)?)))
            .collect()
    }

    /// Encode as a CBOR message payload.
    pub fn to_payload(&self) -> Result<Bytes, ProtoError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtoError::Encode { reason: e.to_string() })?;
        Ok(Bytes::from(buf))
    }

    /// Decode from a CBOR message payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtoError> {
        ciborium::de::from_reader(payload)
            .map_err(|e| ProtoError::InvalidPayload { reason: format!("bad key map: {e}") })
    }
}

fn decode_key(username: &str, encoded: &str) -> Result<Vec<u8>, ProtoError> {
    STANDARD.decode(encoded).map_err(|e| ProtoError::InvalidPayload {
        reason: format!("bad key encoding for {username}: {e}"),
    })
}
