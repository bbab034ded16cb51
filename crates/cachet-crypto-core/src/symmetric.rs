//! AES-256-GCM authenticated encryption.
//!
//! This module provides:
//! - [`encrypt`] / [`decrypt`] — random-nonce sealing, used for DEK key-wrap
//!   slots where the nonce travels inside the slot
//! - [`seal`] / [`open`] — explicit-nonce sealing, used for the encrypted
//!   metadata block and the body chunks where nonces are derived
//!   deterministically from the DEK
//!
//! The explicit-nonce pair exists because chunked encryption must never
//! reuse a nonce under the DEK; callers own the nonce discipline and this
//! module stays a thin, checked wrapper over `ring`.

use crate::error::CryptoError;
use crate::memory::SecretBuffer;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead;
use zeroize::Zeroize;

/// AES-256-GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM authentication tag length in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// AES-256-GCM key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Minimum valid serialized length: nonce + empty ciphertext + tag.
const MIN_SEALED_LEN: usize = NONCE_LEN + TAG_LEN;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Authenticated ciphertext with an embedded random nonce.
///
/// Wire format: `nonce (12 bytes) || ciphertext (plaintext length) || tag
/// (16 bytes)`. Any modification to any of the three parts makes
/// [`decrypt`] fail.
#[must_use = "encrypted data must be stored or transmitted"]
#[derive(Clone)]
pub struct SealedData {
    /// 96-bit random nonce, unique per encryption.
    pub nonce: [u8; NONCE_LEN],
    /// Encrypted data (same length as original plaintext).
    pub ciphertext: Vec<u8>,
    /// 128-bit authentication tag.
    pub tag: [u8; TAG_LEN],
}

impl SealedData {
    /// Serialize to wire format: `nonce || ciphertext || tag`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let capacity = NONCE_LEN
            .saturating_add(self.ciphertext.len())
            .saturating_add(TAG_LEN);
        let mut out = Vec::with_capacity(capacity);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Deserialize from wire format: `nonce || ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Format` if the input is shorter than 28 bytes
    /// (12-byte nonce + 0-byte ciphertext + 16-byte tag).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < MIN_SEALED_LEN {
            return Err(CryptoError::Format(format!(
                "sealed data too short: {} bytes (minimum {MIN_SEALED_LEN})",
                bytes.len()
            )));
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[..NONCE_LEN]);

        let ct_end = bytes
            .len()
            .checked_sub(TAG_LEN)
            .ok_or_else(|| CryptoError::Format("sealed data length underflow".into()))?;
        let ciphertext = bytes[NONCE_LEN..ct_end].to_vec();

        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&bytes[ct_end..]);

        Ok(Self {
            nonce,
            ciphertext,
            tag,
        })
    }
}

// ---------------------------------------------------------------------------
// Random-nonce API (key-wrap slots)
// ---------------------------------------------------------------------------

/// Encrypt plaintext with a fresh random 96-bit nonce.
///
/// # Errors
///
/// Returns `CryptoError::Encryption` if the key is not exactly 32 bytes or
/// the underlying operation fails.
pub fn encrypt(plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<SealedData, CryptoError> {
    let less_safe_key = gcm_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    let Ok(tag) =
        less_safe_key.seal_in_place_separate_tag(nonce, aead::Aad::from(aad), &mut in_out)
    else {
        in_out.zeroize();
        return Err(CryptoError::Encryption(
            "AES-256-GCM encryption failed".into(),
        ));
    };

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_ref());

    Ok(SealedData {
        nonce: nonce_bytes,
        ciphertext: in_out,
        tag: tag_bytes,
    })
}

/// Decrypt and authenticate [`SealedData`].
///
/// Returns the plaintext as a [`SecretBuffer`] (zeroized on drop) — this
/// path only ever carries key material.
///
/// # Errors
///
/// Returns `CryptoError::Encryption` for a wrong key length and
/// `CryptoError::Decryption` if authentication fails (tampered data, wrong
/// key, or wrong AAD).
pub fn decrypt(sealed: &SealedData, key: &[u8], aad: &[u8]) -> Result<SecretBuffer, CryptoError> {
    let less_safe_key = gcm_key(key)?;
    let nonce = aead::Nonce::assume_unique_for_key(sealed.nonce);

    let mut ct_tag = Vec::with_capacity(sealed.ciphertext.len().saturating_add(TAG_LEN));
    ct_tag.extend_from_slice(&sealed.ciphertext);
    ct_tag.extend_from_slice(&sealed.tag);

    let plaintext_slice = less_safe_key
        .open_in_place(nonce, aead::Aad::from(aad), &mut ct_tag)
        .map_err(|_| CryptoError::Decryption)?;

    let result = SecretBuffer::new(plaintext_slice)
        .map_err(|e| CryptoError::SecureMemory(format!("secure buffer allocation failed: {e}")))?;
    ct_tag.zeroize();
    Ok(result)
}

// ---------------------------------------------------------------------------
// Explicit-nonce API (metadata block, body chunks)
// ---------------------------------------------------------------------------

/// Seal plaintext under a caller-supplied nonce.
///
/// Returns `ciphertext || tag`. The caller is responsible for never reusing
/// a nonce with the same key.
///
/// # Errors
///
/// Returns `CryptoError::Encryption` if the key is not exactly 32 bytes or
/// the underlying operation fails.
pub fn seal(
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let less_safe_key = gcm_key(key)?;
    let nonce = aead::Nonce::assume_unique_for_key(*nonce);

    let mut in_out = Vec::with_capacity(plaintext.len().saturating_add(TAG_LEN));
    in_out.extend_from_slice(plaintext);
    let Ok(tag) =
        less_safe_key.seal_in_place_separate_tag(nonce, aead::Aad::from(aad), &mut in_out)
    else {
        in_out.zeroize();
        return Err(CryptoError::Encryption(
            "AES-256-GCM encryption failed".into(),
        ));
    };
    in_out.extend_from_slice(tag.as_ref());
    Ok(in_out)
}

/// Open `ciphertext || tag` sealed under a caller-supplied nonce.
///
/// The caller must zeroize the returned plaintext once it has been consumed
/// if it is sensitive.
///
/// # Errors
///
/// Returns `CryptoError::Encryption` for a wrong key length,
/// `CryptoError::Format` if the input is shorter than a tag, and
/// `CryptoError::Decryption` if authentication fails.
pub fn open(
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    sealed: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < TAG_LEN {
        return Err(CryptoError::Format(format!(
            "sealed chunk too short: {} bytes (minimum {TAG_LEN})",
            sealed.len()
        )));
    }
    let less_safe_key = gcm_key(key)?;
    let nonce = aead::Nonce::assume_unique_for_key(*nonce);

    let mut in_out = sealed.to_vec();
    let plaintext_len = less_safe_key
        .open_in_place(nonce, aead::Aad::from(aad), &mut in_out)
        .map_err(|_| CryptoError::Decryption)?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

/// Build an AES-256-GCM key, validating the key length.
fn gcm_key(key: &[u8]) -> Result<aead::LessSafeKey, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::Encryption(format!(
            "invalid key length: {} bytes (expected {KEY_LEN})",
            key.len()
        )));
    }
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| CryptoError::Encryption("failed to create AES-256-GCM key".into()))?;
    Ok(aead::LessSafeKey::new(unbound))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed test key — 32 bytes of 0xAA.
    const TEST_KEY: [u8; KEY_LEN] = [0xAA; KEY_LEN];

    /// Different key for wrong-key tests.
    const WRONG_KEY: [u8; KEY_LEN] = [0xBB; KEY_LEN];

    const TEST_NONCE: [u8; NONCE_LEN] = [0x07; NONCE_LEN];

    #[test]
    fn encrypt_produces_correct_lengths() {
        let plaintext = b"hello, cachet!";
        let sealed = encrypt(plaintext, &TEST_KEY, &[]).expect("encrypt should succeed");
        assert_eq!(sealed.nonce.len(), NONCE_LEN);
        assert_eq!(sealed.tag.len(), TAG_LEN);
        assert_eq!(sealed.ciphertext.len(), plaintext.len());
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let plaintext = b"wrapped data encryption key";
        let sealed = encrypt(plaintext, &TEST_KEY, &[]).expect("encrypt should succeed");
        let decrypted = decrypt(&sealed, &TEST_KEY, &[]).expect("decrypt should succeed");
        assert_eq!(decrypted.expose(), plaintext);
    }

    #[test]
    fn decrypt_fails_on_tampered_ciphertext() {
        let mut tampered = encrypt(b"test data", &TEST_KEY, &[]).expect("encrypt should succeed");
        if let Some(byte) = tampered.ciphertext.first_mut() {
            *byte ^= 0xFF;
        }
        assert!(matches!(
            decrypt(&tampered, &TEST_KEY, &[]),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn decrypt_fails_on_tampered_tag() {
        let mut tampered = encrypt(b"test data", &TEST_KEY, &[]).expect("encrypt should succeed");
        tampered.tag[0] ^= 0xFF;
        assert!(matches!(
            decrypt(&tampered, &TEST_KEY, &[]),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn decrypt_fails_with_wrong_key() {
        let sealed = encrypt(b"test data", &TEST_KEY, &[]).expect("encrypt should succeed");
        assert!(matches!(
            decrypt(&sealed, &WRONG_KEY, &[]),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn aad_mismatch_causes_decryption_failure() {
        let sealed =
            encrypt(b"aad test", &TEST_KEY, b"correct aad").expect("encrypt should succeed");
        assert!(matches!(
            decrypt(&sealed, &TEST_KEY, b"wrong aad"),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn encrypt_rejects_wrong_key_length() {
        assert!(encrypt(b"test", &[0u8; 31], &[]).is_err());
        assert!(encrypt(b"test", &[0u8; 33], &[]).is_err());
    }

    #[test]
    fn two_encrypts_produce_different_nonces() {
        let a = encrypt(b"same data", &TEST_KEY, &[]).expect("encrypt should succeed");
        let b = encrypt(b"same data", &TEST_KEY, &[]).expect("encrypt should succeed");
        assert_ne!(a.nonce, b.nonce, "nonces should differ");
    }

    #[test]
    fn sealed_data_to_from_bytes_roundtrip() {
        let sealed = encrypt(b"bytes test", &TEST_KEY, &[]).expect("encrypt should succeed");
        let bytes = sealed.to_bytes();
        let restored = SealedData::from_bytes(&bytes).expect("from_bytes should succeed");
        assert_eq!(sealed.nonce, restored.nonce);
        assert_eq!(sealed.ciphertext, restored.ciphertext);
        assert_eq!(sealed.tag, restored.tag);
    }

    #[test]
    fn sealed_data_from_bytes_rejects_short_input() {
        assert!(SealedData::from_bytes(&[0u8; 27]).is_err());
    }

    #[test]
    fn seal_open_roundtrip() {
        let sealed = seal(&TEST_KEY, &TEST_NONCE, b"aad", b"chunk plaintext")
            .expect("seal should succeed");
        assert_eq!(sealed.len(), b"chunk plaintext".len() + TAG_LEN);
        let opened = open(&TEST_KEY, &TEST_NONCE, b"aad", &sealed).expect("open should succeed");
        assert_eq!(opened, b"chunk plaintext");
    }

    #[test]
    fn seal_is_deterministic_for_fixed_nonce() {
        let a = seal(&TEST_KEY, &TEST_NONCE, b"aad", b"data").expect("seal should succeed");
        let b = seal(&TEST_KEY, &TEST_NONCE, b"aad", b"data").expect("seal should succeed");
        assert_eq!(a, b);
    }

    #[test]
    fn open_fails_with_wrong_nonce() {
        let sealed = seal(&TEST_KEY, &TEST_NONCE, b"aad", b"data").expect("seal should succeed");
        let wrong_nonce = [0x08; NONCE_LEN];
        assert!(matches!(
            open(&TEST_KEY, &wrong_nonce, b"aad", &sealed),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn open_fails_with_wrong_aad() {
        let sealed = seal(&TEST_KEY, &TEST_NONCE, b"aad", b"data").expect("seal should succeed");
        assert!(matches!(
            open(&TEST_KEY, &TEST_NONCE, b"other", &sealed),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn open_rejects_input_shorter_than_tag() {
        assert!(matches!(
            open(&TEST_KEY, &TEST_NONCE, b"", &[0u8; 15]),
            Err(CryptoError::Format(_))
        ));
    }

    #[test]
    fn seal_open_empty_plaintext() {
        let sealed = seal(&TEST_KEY, &TEST_NONCE, b"final", &[]).expect("seal should succeed");
        assert_eq!(sealed.len(), TAG_LEN);
        let opened = open(&TEST_KEY, &TEST_NONCE, b"final", &sealed).expect("open should succeed");
        assert!(opened.is_empty());
    }
}
