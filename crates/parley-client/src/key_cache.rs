//! Local copy of other participants' public keys.
//!
//! Full key map snapshots replace the cache wholesale. Individual key
//! replies fill in entries between snapshots. Snapshots carry the server's
//! membership version, and one older than the cache's is ignored, so maps
//! that arrive out of order never roll the cache back.

use std::collections::BTreeMap;

use parley_crypto::PublicKey;
use parley_proto::KeyMap;

use crate::ClientError;

/// Username → public key cache.
#[derive(Debug, Clone, Default)]
pub struct KeyCache {
    version: Option<u64>,
    keys: BTreeMap<String, PublicKey>,
}

impl KeyCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache with `map`.
    ///
    /// Returns `false` without touching the cache if `map` is older than the
    /// last snapshot applied. A map with an undecodable entry is rejected
    /// as a whole.
    pub fn apply_map(&mut self, map: &KeyMap) -> Result<bool, ClientError> {
        if self.version.is_some_and(|current| map.version < current) {
            return Ok(false);
        }

        let mut keys = BTreeMap::new();
        for (username, der) in map.decode_all()? {
            keys.insert(username, PublicKey::from_der(&der)?);
        }

        self.keys = keys;
        self.version = Some(map.version);
        Ok(true)
    }

    /// Add or replace one key.
    pub fn insert(&mut self, username: impl Into<String>, key: PublicKey) {
        self.keys.insert(username.into(), key);
    }

    /// Key for `username`.
    pub fn get(&self, username: &str) -> Option<&PublicKey> {
        self.keys.get(username)
    }

    /// Whether `username` is cached.
    pub fn contains(&self, username: &str) -> bool {
        self.keys.contains_key(username)
    }

    /// Every cached participant with their key, in username order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &PublicKey)> {
        self.keys.iter().map(|(name, key)| (name.as_str(), key))
    }

    /// Cached usernames, sorted.
    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Version of the last snapshot applied.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
