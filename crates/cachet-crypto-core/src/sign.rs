//! Detached Ed25519 signatures over files.
//!
//! This module provides:
//! - [`generate_signing_keypair`] — generate an Ed25519 signing key pair
//! - [`sign_file`] — produce a detached signature file for a target file
//! - [`verify_file`] — verify a signature file against a target file
//!
//! # Signature file layout
//!
//! ```text
//! Magic "SIGNATURE" (9 B) | Version (1 B) | Prehashed (1 B)
//! | File Signature (64 B) | Comment (0..=1024 B UTF-8)
//! | Global Signature (64 B)
//! ```
//!
//! The file signature covers either the raw target bytes or, in prehashed
//! mode, a 32-byte streaming BLAKE3 hash of them; the mode is recorded in
//! the header and files above [`PREHASH_THRESHOLD`] are always prehashed.
//! The global signature covers every byte before it — magic, version, mode
//! flag, file signature, and comment — so none of those can be swapped
//! under an otherwise valid file signature.
//!
//! # Verification order
//!
//! The global signature is checked first. If it fails, verification stops
//! before the target file is even opened: tampered metadata earns no hashing
//! work and no oracle about the target. Only then is the file signature
//! checked, in the mode the (now authenticated) header declares.

use crate::container::persist_atomic;
use crate::error::CryptoError;
use crate::memory::SecretBuffer;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::signature::{self, Ed25519KeyPair, KeyPair as _};
use std::ffi::OsString;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

/// Magic bytes identifying a signature file.
pub const MAGIC: &[u8; 9] = b"SIGNATURE";

/// Current (and only supported) signature format version.
pub const FORMAT_VERSION: u8 = 1;

/// Ed25519 public key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 seed length in bytes.
pub const SEED_LEN: usize = 32;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// Maximum comment length in bytes.
pub const MAX_COMMENT_LEN: usize = 1024;

/// Files larger than this are always signed in prehashed mode (1 GiB).
pub const PREHASH_THRESHOLD: u64 = 1 << 30;

/// Conventional extension appended to the signed file's name.
pub const SIGNATURE_EXTENSION: &str = "signature";

/// BLAKE3 derive-key context for prehashing signed files.
const PREHASH_CONTEXT: &str = "cachet v1 signature prehash";

/// Read buffer size for prehashing.
const PREHASH_READ_BUF: usize = 65_536;

// Fixed offsets.
const OFF_VERSION: usize = 9;
const OFF_PREHASHED: usize = 10;
const OFF_FILE_SIG: usize = 11;
const OFF_COMMENT: usize = OFF_FILE_SIG + SIGNATURE_LEN;

/// Smallest possible signature file: empty comment.
const MIN_FILE_LEN: usize = OFF_COMMENT + SIGNATURE_LEN;

/// Largest possible signature file: maximum comment.
const MAX_FILE_LEN: usize = MIN_FILE_LEN + MAX_COMMENT_LEN;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An Ed25519 signing key pair. The seed lives in secure memory; only the
/// public half is exposed.
pub struct SigningKeyPair {
    seed: SecretBuffer,
    /// Public verification key (safe to distribute).
    pub public: [u8; PUBLIC_KEY_LEN],
}

impl SigningKeyPair {
    /// Reconstruct a key pair from a stored 32-byte seed.
    ///
    /// The input array is zeroized before this returns.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Signature` if the seed is rejected by the
    /// underlying implementation, or `CryptoError::SecureMemory` if secure
    /// allocation fails.
    pub fn from_seed(mut seed: [u8; SEED_LEN]) -> Result<Self, CryptoError> {
        let keypair = Ed25519KeyPair::from_seed_unchecked(&seed).map_err(|e| {
            seed.zeroize();
            CryptoError::Signature(format!("Ed25519 key reconstruction failed: {e}"))
        })?;

        let mut public = [0u8; PUBLIC_KEY_LEN];
        public.copy_from_slice(keypair.public_key().as_ref());

        let seed_buf = SecretBuffer::new(&seed).map_err(|e| {
            seed.zeroize();
            CryptoError::SecureMemory(format!("seed allocation failed: {e}"))
        })?;
        seed.zeroize();

        Ok(Self {
            seed: seed_buf,
            public,
        })
    }

    /// Sign a message with this key pair.
    fn raw_sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_LEN], CryptoError> {
        let keypair = Ed25519KeyPair::from_seed_and_public_key(self.seed.expose(), &self.public)
            .map_err(|e| {
                CryptoError::Signature(format!("Ed25519 key reconstruction failed: {e}"))
            })?;
        let mut out = [0u8; SIGNATURE_LEN];
        out.copy_from_slice(keypair.sign(message).as_ref());
        Ok(out)
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKeyPair(***)")
    }
}

/// Generate a fresh Ed25519 signing key pair from the CSPRNG.
///
/// # Errors
///
/// Returns `CryptoError::Signature` or `CryptoError::SecureMemory` on key
/// generation or allocation failure.
pub fn generate_signing_keypair() -> Result<SigningKeyPair, CryptoError> {
    let mut seed = [0u8; SEED_LEN];
    OsRng.fill_bytes(&mut seed);
    SigningKeyPair::from_seed(seed)
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// Produce a detached signature file for `path`.
///
/// Prehashed mode signs a 32-byte streaming BLAKE3 hash of the file instead
/// of the raw bytes; it is used when requested or whenever the file exceeds
/// [`PREHASH_THRESHOLD`]. The chosen mode is recorded in the output and
/// covered by the global signature.
///
/// # Errors
///
/// Returns `CryptoError::Signature` if the comment exceeds
/// [`MAX_COMMENT_LEN`] bytes, and `CryptoError::Io` if the target cannot
/// be read.
pub fn sign_file(
    path: &Path,
    keypair: &SigningKeyPair,
    comment: &str,
    prehashed: bool,
) -> Result<Vec<u8>, CryptoError> {
    if comment.len() > MAX_COMMENT_LEN {
        return Err(CryptoError::Signature(format!(
            "comment too long: {} bytes (maximum {MAX_COMMENT_LEN})",
            comment.len()
        )));
    }

    let file_length = std::fs::metadata(path)?.len();
    let prehashed = prehashed || file_length > PREHASH_THRESHOLD;

    let file_signature = if prehashed {
        keypair.raw_sign(&hash_file(path)?)?
    } else {
        keypair.raw_sign(&std::fs::read(path)?)?
    };

    let mut out = Vec::with_capacity(MIN_FILE_LEN.saturating_add(comment.len()));
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.push(u8::from(prehashed));
    out.extend_from_slice(&file_signature);
    out.extend_from_slice(comment.as_bytes());

    let global_signature = keypair.raw_sign(&out)?;
    out.extend_from_slice(&global_signature);

    Ok(out)
}

/// Sign `path` and atomically write the signature file to `signature_path`.
///
/// # Errors
///
/// As [`sign_file`], plus `CryptoError::Io` for output failures (including
/// a pre-existing `signature_path` when `overwrite` is false).
pub fn sign_file_to(
    path: &Path,
    signature_path: &Path,
    keypair: &SigningKeyPair,
    comment: &str,
    prehashed: bool,
    overwrite: bool,
) -> Result<(), CryptoError> {
    let bytes = sign_file(path, keypair, comment, prehashed)?;
    persist_atomic(signature_path, &bytes, overwrite)?;
    tracing::debug!(signature = %signature_path.display(), "signature written");
    Ok(())
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Verify a signature file against a target file.
///
/// All-or-nothing and order-sensitive: the global signature over the
/// signature file's own prefix must verify before the target file is
/// touched, and only then is the file signature checked in the declared
/// mode. Returns the (authenticated) comment on success.
///
/// # Errors
///
/// Returns `CryptoError::Format` for a structurally invalid signature file
/// (no key material tested), `CryptoError::SignatureInvalid` for any
/// failed signature check, and `CryptoError::Io` if the target cannot be
/// read.
pub fn verify_file(
    signature: &[u8],
    path: &Path,
    public_key: &[u8; PUBLIC_KEY_LEN],
) -> Result<String, CryptoError> {
    if signature.len() < MIN_FILE_LEN {
        return Err(CryptoError::Format(format!(
            "signature file too short: {} bytes (minimum {MIN_FILE_LEN})",
            signature.len()
        )));
    }
    if signature.len() > MAX_FILE_LEN {
        return Err(CryptoError::Format(format!(
            "signature file too long: {} bytes (maximum {MAX_FILE_LEN})",
            signature.len()
        )));
    }
    if &signature[..MAGIC.len()] != MAGIC.as_slice() {
        return Err(CryptoError::Format("invalid signature magic".into()));
    }
    let version = signature[OFF_VERSION];
    if version != FORMAT_VERSION {
        return Err(CryptoError::Format(format!(
            "unsupported signature format version {version} (supported: {FORMAT_VERSION})"
        )));
    }
    let prehashed = match signature[OFF_PREHASHED] {
        0 => false,
        1 => true,
        other => {
            return Err(CryptoError::Format(format!(
                "invalid prehash flag: {other}"
            )))
        }
    };

    let global_start = signature
        .len()
        .checked_sub(SIGNATURE_LEN)
        .ok_or_else(|| CryptoError::Format("signature file length underflow".into()))?;
    let signed_prefix = &signature[..global_start];
    let global_signature = &signature[global_start..];

    // Global first: a tampered comment or flipped mode flag is rejected
    // here, before any work is spent on the target file.
    let verifier = signature::UnparsedPublicKey::new(&signature::ED25519, public_key);
    verifier
        .verify(signed_prefix, global_signature)
        .map_err(|_| CryptoError::SignatureInvalid)?;

    let comment = std::str::from_utf8(&signature[OFF_COMMENT..global_start])
        .map_err(|_| CryptoError::Format("invalid comment encoding".into()))?
        .to_owned();

    let file_signature = &signature[OFF_FILE_SIG..OFF_COMMENT];
    let verified = if prehashed {
        verifier.verify(&hash_file(path)?, file_signature)
    } else {
        verifier.verify(&std::fs::read(path)?, file_signature)
    };
    verified.map_err(|_| CryptoError::SignatureInvalid)?;

    Ok(comment)
}

/// Read a signature file from disk and verify it against a target file.
///
/// # Errors
///
/// As [`verify_file`], plus `CryptoError::Io` if the signature file cannot
/// be read. Oversized signature files are rejected before being read fully.
pub fn verify_file_at(
    signature_path: &Path,
    path: &Path,
    public_key: &[u8; PUBLIC_KEY_LEN],
) -> Result<String, CryptoError> {
    let sig_len = std::fs::metadata(signature_path)?.len();
    if sig_len > u64::try_from(MAX_FILE_LEN).unwrap_or(u64::MAX) {
        return Err(CryptoError::Format(format!(
            "signature file too long: {sig_len} bytes (maximum {MAX_FILE_LEN})"
        )));
    }
    let signature = std::fs::read(signature_path)?;
    verify_file(&signature, path, public_key)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The conventional signature path for a file: `name.ext` → `name.ext.signature`.
#[must_use]
pub fn signature_output_path(input: &Path) -> PathBuf {
    let mut name = input
        .file_name()
        .map_or_else(OsString::new, ToOwned::to_owned);
    name.push(".");
    name.push(SIGNATURE_EXTENSION);
    input.with_file_name(name)
}

/// Streaming BLAKE3 prehash of a file.
fn hash_file(path: &Path) -> Result<[u8; 32], CryptoError> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new_derive_key(PREHASH_CONTEXT);
    let mut buf = vec![0u8; PREHASH_READ_BUF];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(*hasher.finalize().as_bytes())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_target(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        f.write_all(content).expect("write target");
        f.flush().expect("flush target");
        f
    }

    #[test]
    fn sign_verify_roundtrip() {
        let kp = generate_signing_keypair().expect("keygen should succeed");
        let target = write_target(b"release artifact contents");

        let sig = sign_file(target.path(), &kp, "release v1.0", false)
            .expect("signing should succeed");
        let comment =
            verify_file(&sig, target.path(), &kp.public).expect("verification should succeed");
        assert_eq!(comment, "release v1.0");
    }

    #[test]
    fn empty_comment_roundtrips() {
        let kp = generate_signing_keypair().expect("keygen should succeed");
        let target = write_target(b"data");

        let sig = sign_file(target.path(), &kp, "", false).expect("signing should succeed");
        assert_eq!(sig.len(), MIN_FILE_LEN);
        let comment = verify_file(&sig, target.path(), &kp.public).expect("should verify");
        assert!(comment.is_empty());
    }

    #[test]
    fn prehashed_and_raw_modes_both_verify() {
        let kp = generate_signing_keypair().expect("keygen should succeed");
        let target = write_target(b"the same bytes in both modes");

        let raw = sign_file(target.path(), &kp, "", false).expect("raw signing should succeed");
        let pre = sign_file(target.path(), &kp, "", true).expect("prehash signing should succeed");

        assert_eq!(raw[OFF_PREHASHED], 0);
        assert_eq!(pre[OFF_PREHASHED], 1);
        assert_ne!(
            &raw[OFF_FILE_SIG..OFF_COMMENT],
            &pre[OFF_FILE_SIG..OFF_COMMENT],
            "the two modes must sign different messages"
        );

        verify_file(&raw, target.path(), &kp.public).expect("raw mode should verify");
        verify_file(&pre, target.path(), &kp.public).expect("prehashed mode should verify");
    }

    #[test]
    fn tampered_comment_fails_global_check() {
        let kp = generate_signing_keypair().expect("keygen should succeed");
        let target = write_target(b"unmodified file");

        let mut sig =
            sign_file(target.path(), &kp, "benign comment", false).expect("signing should succeed");
        sig[OFF_COMMENT] ^= 0x20; // "benign" -> "Benign"

        // The target file is untouched, yet verification must fail.
        let result = verify_file(&sig, target.path(), &kp.public);
        assert!(matches!(result, Err(CryptoError::SignatureInvalid)));
    }

    #[test]
    fn flipped_mode_flag_fails_global_check() {
        let kp = generate_signing_keypair().expect("keygen should succeed");
        let target = write_target(b"mode flag is covered");

        let mut sig = sign_file(target.path(), &kp, "", false).expect("signing should succeed");
        sig[OFF_PREHASHED] = 1;

        let result = verify_file(&sig, target.path(), &kp.public);
        assert!(matches!(result, Err(CryptoError::SignatureInvalid)));
    }

    #[test]
    fn tampered_target_fails_file_check() {
        let kp = generate_signing_keypair().expect("keygen should succeed");
        let target = write_target(b"original contents");

        let sig = sign_file(target.path(), &kp, "", false).expect("signing should succeed");
        let other = write_target(b"original content!");

        let result = verify_file(&sig, other.path(), &kp.public);
        assert!(matches!(result, Err(CryptoError::SignatureInvalid)));
    }

    #[test]
    fn wrong_public_key_fails() {
        let kp = generate_signing_keypair().expect("keygen should succeed");
        let other = generate_signing_keypair().expect("keygen should succeed");
        let target = write_target(b"signed with kp");

        let sig = sign_file(target.path(), &kp, "", false).expect("signing should succeed");
        let result = verify_file(&sig, target.path(), &other.public);
        assert!(matches!(result, Err(CryptoError::SignatureInvalid)));
    }

    #[test]
    fn structural_problems_are_format_errors() {
        let kp = generate_signing_keypair().expect("keygen should succeed");
        let target = write_target(b"data");
        let sig = sign_file(target.path(), &kp, "c", false).expect("signing should succeed");

        // Too short.
        let result = verify_file(&sig[..MIN_FILE_LEN - 1], target.path(), &kp.public);
        assert!(matches!(result, Err(CryptoError::Format(_))));

        // Wrong magic.
        let mut bad_magic = sig.clone();
        bad_magic[0] = b'X';
        let result = verify_file(&bad_magic, target.path(), &kp.public);
        assert!(matches!(result, Err(CryptoError::Format(_))));

        // Unknown version.
        let mut bad_version = sig.clone();
        bad_version[OFF_VERSION] = 9;
        let result = verify_file(&bad_version, target.path(), &kp.public);
        assert!(matches!(result, Err(CryptoError::Format(_))));

        // Out-of-range mode flag.
        let mut bad_flag = sig;
        bad_flag[OFF_PREHASHED] = 2;
        let result = verify_file(&bad_flag, target.path(), &kp.public);
        assert!(matches!(result, Err(CryptoError::Format(_))));
    }

    #[test]
    fn comment_too_long_is_rejected_at_sign_time() {
        let kp = generate_signing_keypair().expect("keygen should succeed");
        let target = write_target(b"data");
        let comment = "x".repeat(MAX_COMMENT_LEN + 1);

        let result = sign_file(target.path(), &kp, &comment, false);
        assert!(matches!(result, Err(CryptoError::Signature(_))));
    }

    #[test]
    fn max_length_comment_roundtrips() {
        let kp = generate_signing_keypair().expect("keygen should succeed");
        let target = write_target(b"data");
        let comment = "y".repeat(MAX_COMMENT_LEN);

        let sig = sign_file(target.path(), &kp, &comment, false).expect("signing should succeed");
        assert_eq!(sig.len(), MAX_FILE_LEN);
        let back = verify_file(&sig, target.path(), &kp.public).expect("should verify");
        assert_eq!(back, comment);
    }

    #[test]
    fn keypair_from_seed_is_deterministic() {
        let seed = [0x42; SEED_LEN];
        let a = SigningKeyPair::from_seed(seed).expect("from_seed should succeed");
        let b = SigningKeyPair::from_seed(seed).expect("from_seed should succeed");
        assert_eq!(a.public, b.public);
    }

    #[test]
    fn keypair_debug_is_masked() {
        let kp = generate_signing_keypair().expect("keygen should succeed");
        assert_eq!(format!("{kp:?}"), "SigningKeyPair(***)");
    }

    #[test]
    fn signature_output_path_appends_extension() {
        let path = signature_output_path(Path::new("/tmp/release.tar.gz"));
        assert_eq!(path, Path::new("/tmp/release.tar.gz.signature"));
    }

    #[test]
    fn sign_file_to_writes_and_verifies() {
        let kp = generate_signing_keypair().expect("keygen should succeed");
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("artifact.bin");
        std::fs::write(&target, b"artifact").expect("write target");
        let sig_path = signature_output_path(&target);

        sign_file_to(&target, &sig_path, &kp, "note", false, false)
            .expect("sign_file_to should succeed");
        let comment =
            verify_file_at(&sig_path, &target, &kp.public).expect("verification should succeed");
        assert_eq!(comment, "note");
    }
}
