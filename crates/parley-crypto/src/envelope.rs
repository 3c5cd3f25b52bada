//! Multi-recipient envelopes.
//!
//! One logical plaintext is encrypted separately under each recipient's
//! public key. The per-recipient ciphertexts are stored as
//! `username → base64(ciphertext)` and the whole map is CBOR-encoded into a
//! single blob, which becomes the payload of an `EncryptedText` message.
//!
//! Every connection receives the same blob. A recipient finds its own entry
//! by username; a missing entry means the message is not addressed to it.
//!
//! # Opening
//!
//! [`open`] separates two failure classes:
//!
//! - the blob is not an envelope at all: `Err(MalformedEnvelope)`, broken for
//!   everyone
//! - the blob is a valid envelope without our name: `Ok(None)`
//!
//! A present entry that fails to decode or decrypt is reported as an error
//! so callers can tell "not mine" apart from "mine but unreadable".

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use rsa::rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};

use crate::{CryptoError, KeyPair, PublicKey, codec};

/// Per-recipient ciphertexts for one plaintext.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope {
    entries: BTreeMap<String, String>,
}

impl Envelope {
    /// Encrypt `plaintext` for every recipient except `sender`.
    ///
    /// An empty recipient set yields an empty envelope, which is still a
    /// valid message that nobody can open.
    pub fn seal<'a, R, I>(
        rng: &mut R,
        plaintext: &[u8],
        sender: &str,
        recipients: I,
    ) -> Result<Self, CryptoError>
    where
        R: CryptoRngCore,
        I: IntoIterator<Item = (&'a str, &'a PublicKey)>,
    {
        let mut entries = BTreeMap::new();
        for (username, key) in recipients {
            if username == sender {
                continue;
            }
            let ciphertext = codec::encrypt(rng, plaintext, key)?;
            entries.insert(username.to_string(), STANDARD.encode(ciphertext));
        }
        Ok(Self { entries })
    }

    /// Decode an envelope blob, validating the map structure.
    pub fn from_bytes(blob: &[u8]) -> Result<Self, CryptoError> {
        ciborium::de::from_reader(blob)
            .map_err(|e| CryptoError::MalformedEnvelope { reason: e.to_string() })
    }

    /// Encode as a CBOR blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| CryptoError::MalformedEnvelope { reason: e.to_string() })?;
        Ok(buf)
    }

    /// Usernames that have an entry, in sorted order.
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Whether `username` has an entry.
    pub fn is_addressed_to(&self, username: &str) -> bool {
        self.entries.contains_key(username)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the envelope has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decrypt the entry for `username`, or `None` if there is none.
    pub fn open(&self, username: &str, own: &KeyPair) -> Result<Option<Vec<u8>>, CryptoError> {
        let Some(encoded) = self.entries.get(username) else {
            return Ok(None);
        };
        let ciphertext = STANDARD.decode(encoded).map_err(|e| CryptoError::Decryption {
            chunk: 0,
            reason: format!("bad base64 for {username}: {e}"),
        })?;
        codec::decrypt(&ciphertext, own).map(Some)
    }
}

/// Build an envelope blob for `recipients`, skipping `sender`.
pub fn build<'a, R, I>(
    rng: &mut R,
    plaintext: &[u8],
    sender: &str,
    recipients: I,
) -> Result<Vec<u8>, CryptoError>
where
    R: CryptoRngCore,
    I: IntoIterator<Item = (&'a str, &'a PublicKey)>,
{
    Envelope::seal(rng, plaintext, sender, recipients)?.to_bytes()
}

/// Open an envelope blob as `username`.
///
/// Returns `Ok(None)` when the envelope is well-formed but carries no entry
/// for `username`.
pub fn open(blob: &[u8], username: &str, own: &KeyPair) -> Result<Option<Vec<u8>>, CryptoError> {
    Envelope::from_bytes(blob)?.open(username, own)
}
