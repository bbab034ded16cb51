//! Streaming chunk cipher — encrypts and decrypts the container body in
//! fixed-size chunks under the DEK, without holding the file in memory.
//!
//! This module provides:
//! - [`encrypt_body`] / [`decrypt_body`] — the chunk pipeline (one chunk
//!   buffer of lookahead, bounded memory)
//! - [`commitment_tag`] / [`verify_commitment`] — the DEK key-commitment
//!   check performed before the DEK is trusted for anything
//!
//! # Nonce discipline
//!
//! All nonces are derived deterministically from the DEK via BLAKE3
//! derive-key with distinct context strings, so no nonce is ever reused
//! under one DEK:
//! - metadata block: 12 bytes from the metadata context
//! - chunk `i`: an 8-byte prefix from the body context, followed by the
//!   chunk counter as a big-endian u32
//!
//! Each chunk's AAD carries its index and a final-flag byte. Reordering
//! chunks, truncating at a chunk boundary, and appending data after the
//! final chunk all surface as authentication failures.

use crate::error::CryptoError;
use crate::memory::SecretBytes;
use crate::symmetric::{self, NONCE_LEN, TAG_LEN};
use std::io::{Read, Write};
use zeroize::Zeroizing;

/// Plaintext bytes per chunk.
pub const CHUNK_SIZE: usize = 16_384;

/// Ciphertext bytes per full chunk (plaintext + tag).
pub const SEALED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_LEN;

/// Key-commitment tag length in bytes.
pub const COMMITMENT_LEN: usize = 32;

/// DEK length in bytes (256 bits).
pub const DEK_LEN: usize = 32;

/// BLAKE3 derive-key context for the key-commitment tag.
const COMMITMENT_CONTEXT: &str = "cachet v1 key commitment";

/// BLAKE3 derive-key context for the metadata-block nonce.
const METADATA_NONCE_CONTEXT: &str = "cachet v1 metadata nonce";

/// BLAKE3 derive-key context for the body nonce prefix.
const BODY_NONCE_CONTEXT: &str = "cachet v1 body nonce";

/// Body nonce prefix length; the remaining 4 nonce bytes are the counter.
const NONCE_PREFIX_LEN: usize = 8;

/// AAD length: u64 BE chunk index + final-flag byte.
const CHUNK_AAD_LEN: usize = 9;

// ---------------------------------------------------------------------------
// DEK-derived values
// ---------------------------------------------------------------------------

/// The key-commitment tag for a DEK.
///
/// Stored in the container ahead of the first DEK-encrypted material; a
/// decryptor derives the same tag from its unwrapped DEK and must find it
/// equal before trusting the DEK at all. This stops key-substitution
/// attacks where a different DEK would "successfully" decrypt a forged
/// container under a different reading of the header.
#[must_use]
pub fn commitment_tag(dek: &SecretBytes<DEK_LEN>) -> [u8; COMMITMENT_LEN] {
    blake3::derive_key(COMMITMENT_CONTEXT, dek.expose())
}

/// Verify a stored commitment tag against the DEK, in constant time.
///
/// # Errors
///
/// Returns `CryptoError::Decryption` on mismatch — indistinguishable from
/// any other authentication failure.
pub fn verify_commitment(
    dek: &SecretBytes<DEK_LEN>,
    stored: &[u8; COMMITMENT_LEN],
) -> Result<(), CryptoError> {
    let expected = commitment_tag(dek);
    ring::constant_time::verify_slices_are_equal(&expected, stored)
        .map_err(|_| CryptoError::Decryption)
}

/// The nonce for the encrypted metadata block.
///
/// Derived from a context distinct from the body's, so the metadata seal
/// can never collide with a chunk nonce under the same DEK.
pub(crate) fn metadata_nonce(dek: &SecretBytes<DEK_LEN>) -> [u8; NONCE_LEN] {
    let derived = blake3::derive_key(METADATA_NONCE_CONTEXT, dek.expose());
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&derived[..NONCE_LEN]);
    nonce
}

/// The 8-byte body nonce prefix for a DEK.
fn body_nonce_prefix(dek: &SecretBytes<DEK_LEN>) -> [u8; NONCE_PREFIX_LEN] {
    let derived = blake3::derive_key(BODY_NONCE_CONTEXT, dek.expose());
    let mut prefix = [0u8; NONCE_PREFIX_LEN];
    prefix.copy_from_slice(&derived[..NONCE_PREFIX_LEN]);
    prefix
}

/// The nonce for chunk `index`: prefix || u32 BE counter.
fn chunk_nonce(
    prefix: &[u8; NONCE_PREFIX_LEN],
    index: u64,
) -> Result<[u8; NONCE_LEN], CryptoError> {
    let counter = u32::try_from(index)
        .map_err(|_| CryptoError::Encryption("chunk counter overflow".into()))?;
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..].copy_from_slice(&counter.to_be_bytes());
    Ok(nonce)
}

/// The AAD for chunk `index`: u64 BE index || final flag.
fn chunk_aad(index: u64, is_final: bool) -> [u8; CHUNK_AAD_LEN] {
    let mut aad = [0u8; CHUNK_AAD_LEN];
    aad[..8].copy_from_slice(&index.to_be_bytes());
    aad[8] = u8::from(is_final);
    aad
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypt a plaintext stream into sealed chunks under the DEK.
///
/// Chunks are produced in index order, each sealed with its own nonce and
/// index/final AAD. A zero-length input still produces exactly one (empty)
/// final chunk, so every container body carries at least one authenticated
/// record. Returns the number of plaintext bytes consumed.
///
/// # Errors
///
/// Returns `CryptoError::Io` for read/write failures and
/// `CryptoError::Encryption` if sealing fails or the chunk counter would
/// overflow.
pub fn encrypt_body<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    dek: &SecretBytes<DEK_LEN>,
) -> Result<u64, CryptoError> {
    let prefix = body_nonce_prefix(dek);
    let mut current = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
    let mut next = Zeroizing::new(vec![0u8; CHUNK_SIZE]);

    let mut current_len = read_full(reader, &mut current)?;
    let mut index: u64 = 0;
    let mut total: u64 = 0;

    loop {
        // One chunk of lookahead decides the final flag: a short read means
        // EOF already; a full chunk is final only if nothing follows it.
        let mut next_len = 0;
        let is_final = if current_len < CHUNK_SIZE {
            true
        } else {
            next_len = read_full(reader, &mut next)?;
            next_len == 0
        };

        let nonce = chunk_nonce(&prefix, index)?;
        let sealed = symmetric::seal(
            dek.expose(),
            &nonce,
            &chunk_aad(index, is_final),
            &current[..current_len],
        )?;
        writer.write_all(&sealed)?;
        total = total.saturating_add(len_u64(current_len)?);

        if is_final {
            break;
        }
        std::mem::swap(&mut current, &mut next);
        current_len = next_len;
        index = index
            .checked_add(1)
            .ok_or_else(|| CryptoError::Encryption("chunk counter overflow".into()))?;
    }

    Ok(total)
}

// ---------------------------------------------------------------------------
// Decryption
// ---------------------------------------------------------------------------

/// Decrypt a sealed-chunk stream under the DEK, verifying every chunk.
///
/// Plaintext is emitted only after its chunk authenticates; the final
/// chunk's position is inferred from EOF and cross-checked against the
/// sealed final flag, and the total plaintext length must equal
/// `expected_len` from the authenticated metadata. Returns the number of
/// plaintext bytes written.
///
/// Callers must verify the key commitment before calling this.
///
/// # Errors
///
/// Returns `CryptoError::Decryption` for any authentication or length
/// mismatch, `CryptoError::Format` for a tail shorter than one tag, and
/// `CryptoError::Io` for read/write failures.
pub fn decrypt_body<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    dek: &SecretBytes<DEK_LEN>,
    expected_len: u64,
) -> Result<u64, CryptoError> {
    let prefix = body_nonce_prefix(dek);
    let mut current = vec![0u8; SEALED_CHUNK_SIZE];
    let mut next = vec![0u8; SEALED_CHUNK_SIZE];

    let mut current_len = read_full(reader, &mut current)?;
    let mut index: u64 = 0;
    let mut total: u64 = 0;

    loop {
        if current_len < TAG_LEN {
            // Shorter than one tag: the body was truncated mid-record. No
            // key material was tested against these bytes.
            return Err(CryptoError::Format(format!(
                "truncated chunk: {current_len} bytes"
            )));
        }

        let mut next_len = 0;
        let is_final = if current_len < SEALED_CHUNK_SIZE {
            true
        } else {
            next_len = read_full(reader, &mut next)?;
            next_len == 0
        };

        let nonce = chunk_nonce(&prefix, index).map_err(|_| CryptoError::Decryption)?;
        let plaintext = Zeroizing::new(symmetric::open(
            dek.expose(),
            &nonce,
            &chunk_aad(index, is_final),
            &current[..current_len],
        )?);
        writer.write_all(&plaintext)?;
        total = total.saturating_add(len_u64(plaintext.len())?);

        if is_final {
            break;
        }
        std::mem::swap(&mut current, &mut next);
        current_len = next_len;
        index = index
            .checked_add(1)
            .ok_or(CryptoError::Decryption)?;
    }

    if total != expected_len {
        // Chunk-granular truncation/extension is caught by the AAD checks;
        // this cross-check closes the loop against a lying length field.
        return Err(CryptoError::Decryption);
    }
    Ok(total)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read until `buf` is full or EOF. Returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, CryptoError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled = filled.saturating_add(n),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(CryptoError::Io(e)),
        }
    }
    Ok(filled)
}

/// Lossless usize → u64 conversion.
fn len_u64(len: usize) -> Result<u64, CryptoError> {
    u64::try_from(len).map_err(|_| CryptoError::Encryption("length overflow".into()))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
