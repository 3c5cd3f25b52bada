//! Parley end-to-end encryption.
//!
//! Participants hold RSA key pairs. Messages are sealed with PKCS#1 v1.5
//! padding in fixed-size chunks, once per recipient, and bundled into a
//! single envelope that every connection receives. The server never sees a
//! private key and never decrypts anything.
//!
//! # Components
//!
//! - [`KeyPair`] / [`PublicKey`]: key generation and SPKI DER encoding
//! - [`codec`]: chunked encrypt/decrypt under one key
//! - [`Envelope`]: per-recipient ciphertexts for one plaintext

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod envelope;
mod error;
mod keys;

pub use envelope::Envelope;
pub use error::CryptoError;
pub use keys::{DEFAULT_KEY_BITS, KeyPair, PublicKey};
