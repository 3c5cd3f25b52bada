//! Crypto error types.

use thiserror::Error;

/// Errors from key handling, the chunked codec, and envelopes.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// RSA key generation failed.
    #[error("key generation failed: {reason}")]
    KeyGeneration {
        /// Description of the failure.
        reason: String,
    },

    /// Public key bytes are not a valid RSA SubjectPublicKeyInfo.
    #[error("invalid public key: {reason}")]
    InvalidPublicKey {
        /// Description of the failure.
        reason: String,
    },

    /// Modulus leaves no room for plaintext after PKCS#1 v1.5 padding.
    #[error("key too small: {modulus_len}-byte modulus")]
    KeyTooSmall {
        /// Modulus size in bytes.
        modulus_len: usize,
    },

    /// Encrypting a chunk failed.
    #[error("encryption failed at chunk {chunk}: {reason}")]
    Encryption {
        /// Zero-based chunk index.
        chunk: usize,
        /// Description of the failure.
        reason: String,
    },

    /// Decrypting a chunk failed (wrong key or corrupted block).
    #[error("decryption failed at chunk {chunk}: {reason}")]
    Decryption {
        /// Zero-based chunk index.
        chunk: usize,
        /// Description of the failure.
        reason: String,
    },

    /// Ciphertext length is not a positive multiple of the modulus size.
    #[error("misaligned ciphertext: {len} bytes is not a multiple of {block_len}")]
    MisalignedCiphertext {
        /// Ciphertext length in bytes.
        len: usize,
        /// Expected block size (modulus size in bytes).
        block_len: usize,
    },

    /// Envelope bytes are not a username → ciphertext map.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        /// Description of the failure.
        reason: String,
    },
}

impl CryptoError {
    /// Whether the failure concerns the envelope as a whole rather than one
    /// recipient's entry.
    ///
    /// A malformed envelope is broken for every recipient; a decryption
    /// failure only tells this recipient its entry is unusable.
    pub fn is_malformed_envelope(&self) -> bool {
        matches!(self, Self::MalformedEnvelope { .. })
    }
}
