//! RSA key pairs and DER-encoded public keys.

use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs8::{DecodePublicKey, EncodePublicKey},
    rand_core::CryptoRngCore,
    traits::PublicKeyParts,
};

use crate::{CryptoError, codec::PKCS1_V15_OVERHEAD};

/// Key size used when the caller has no preference.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// A participant's public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: RsaPublicKey,
}

impl PublicKey {
    /// Parse an RSA SubjectPublicKeyInfo DER document.
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        let inner = RsaPublicKey::from_public_key_der(der)
            .map_err(|e| CryptoError::InvalidPublicKey { reason: e.to_string() })?;
        Ok(Self { inner })
    }

    /// Encode as SubjectPublicKeyInfo DER.
    pub fn to_der(&self) -> Result<Vec<u8>, CryptoError> {
        self.inner
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| CryptoError::InvalidPublicKey { reason: e.to_string() })
    }

    /// Modulus size in bytes; the ciphertext block size.
    pub fn modulus_len(&self) -> usize {
        self.inner.size()
    }

    /// Largest plaintext chunk one block can carry.
    pub fn max_chunk_len(&self) -> usize {
        self.modulus_len().saturating_sub(PKCS1_V15_OVERHEAD)
    }

    pub(crate) fn as_rsa(&self) -> &RsaPublicKey {
        &self.inner
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey").field("bits", &(self.modulus_len() * 8)).finish()
    }
}

/// A participant's key pair.
///
/// # Security
///
/// - **Debug Redaction**: the `Debug` impl never prints private material.
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair with a `bits`-bit modulus.
    pub fn generate<R: CryptoRngCore + ?Sized>(
        rng: &mut R,
        bits: usize,
    ) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(rng, bits)
            .map_err(|e| CryptoError::KeyGeneration { reason: e.to_string() })?;
        let public = PublicKey { inner: private.to_public_key() };

        if public.max_chunk_len() == 0 {
            return Err(CryptoError::KeyTooSmall { modulus_len: public.modulus_len() });
        }

        Ok(Self { private, public })
    }

    /// Public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn private_rsa(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// Modulus size in bytes of the private key.
    pub fn modulus_len(&self) -> usize {
        self.private.size()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("private", &"<redacted>")
            .finish()
    }
}
