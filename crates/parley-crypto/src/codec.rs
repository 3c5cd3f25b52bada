//! Chunked RSA encryption.
//!
//! RSA with PKCS#1 v1.5 padding can only seal `modulus_len - 11` bytes per
//! block, so arbitrary plaintext is split into chunks and each chunk is
//! encrypted on its own. Ciphertext blocks are concatenated without
//! delimiters; every block is exactly `modulus_len` bytes, which is what
//! decryption uses to find the boundaries.
//!
//! # Chunk Accounting
//!
//! For a plaintext of `L` bytes and a chunk size of `C`, encryption emits
//! `L / C + 1` blocks. When `L` is a multiple of `C` (including `L = 0`) the
//! final block seals an empty chunk. Decryption of that block yields zero
//! bytes, so the round trip is exact.

use rsa::{Pkcs1v15Encrypt, rand_core::CryptoRngCore};

use crate::{CryptoError, KeyPair, PublicKey};

/// Bytes of each block consumed by PKCS#1 v1.5 encryption padding.
pub const PKCS1_V15_OVERHEAD: usize = 11;

/// Number of ciphertext blocks produced for `plaintext_len` bytes.
pub fn chunk_count(plaintext_len: usize, chunk_len: usize) -> usize {
    plaintext_len / chunk_len + 1
}

/// Encrypt `plaintext` for the holder of `recipient`.
///
/// Output length is always `chunk_count(len, max_chunk_len) * modulus_len`.
pub fn encrypt<R: CryptoRngCore>(
    rng: &mut R,
    plaintext: &[u8],
    recipient: &PublicKey,
) -> Result<Vec<u8>, CryptoError> {
    let chunk_len = recipient.max_chunk_len();
    if chunk_len == 0 {
        return Err(CryptoError::KeyTooSmall { modulus_len: recipient.modulus_len() });
    }

    let blocks = chunk_count(plaintext.len(), chunk_len);
    let mut out = Vec::with_capacity(blocks * recipient.modulus_len());

    for index in 0..blocks {
        let start = index * chunk_len;
        let end = (start + chunk_len).min(plaintext.len());
        let block = recipient
            .as_rsa()
            .encrypt(rng, Pkcs1v15Encrypt, &plaintext[start..end])
            .map_err(|e| CryptoError::Encryption { chunk: index, reason: e.to_string() })?;
        out.extend_from_slice(&block);
    }

    Ok(out)
}

/// Decrypt a ciphertext produced by [`encrypt`] with the matching key pair.
///
/// Any block that fails to decrypt fails the whole call; no partial
/// plaintext is returned.
pub fn decrypt(ciphertext: &[u8], own: &KeyPair) -> Result<Vec<u8>, CryptoError> {
    let block_len = own.modulus_len();
    if ciphertext.is_empty() || !ciphertext.len().is_multiple_of(block_len) {
        return Err(CryptoError::MisalignedCiphertext { len: ciphertext.len(), block_len });
    }

    let mut out = Vec::with_capacity(ciphertext.len());
    for (index, block) in ciphertext.chunks_exact(block_len).enumerate() {
        let chunk = own
            .private_rsa()
            .decrypt(Pkcs1v15Encrypt, block)
            .map_err(|e| CryptoError::Decryption { chunk: index, reason: e.to_string() })?;
        out.extend_from_slice(&chunk);
    }

    Ok(out)
}
