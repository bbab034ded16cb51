//! Key-encryption-key derivation: Argon2id for passwords, BLAKE3 for
//! agreed secrets.
//!
//! This module provides:
//! - [`derive_password_kek`] — password (+ optional keyfile pepper) → KEK
//! - [`derive_shared_kek`] — X25519 shared secret(s) → KEK
//! - [`Argon2idParams`] — Argon2id cost parameters, threaded explicitly
//!
//! Both derivations are deterministic given their inputs and the per-file
//! salt, which is what lets a decryptor reproduce the encryptor's KEK. All
//! intermediate secret material is zeroized before return on every path.
//!
//! # Cost parameters
//!
//! The format-v1 canonical cost is [`Argon2idParams::RECOMMENDED`]
//! (256 MiB, 3 iterations, 4 lanes). Parameters are never read from the
//! container — they are fixed per format version and passed in by the
//! caller, which also gives tests a way to run with reduced costs.

use crate::error::CryptoError;
use crate::memory::SecretBytes;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zeroize::Zeroize;

/// KEK length in bytes (256 bits).
pub const KEK_LEN: usize = 32;

/// Per-file KDF salt length in bytes.
pub const SALT_LEN: usize = 16;

/// 256 MiB in KiB — the format-v1 memory cost.
const MEMORY_256MB: u32 = 262_144;

/// BLAKE3 derive-key context for the password prehash.
const PASSWORD_CONTEXT: &str = "cachet v1 password prehash";

/// BLAKE3 derive-key context for the keyfile pepper.
const KEYFILE_CONTEXT: &str = "cachet v1 keyfile pepper";

/// BLAKE3 derive-key context for the agreed-secret KEK.
const SHARED_KEK_CONTEXT: &str = "cachet v1 shared secret kek";

/// Read buffer size for hashing keyfiles.
const KEYFILE_READ_BUF: usize = 65_536;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Argon2id parameter set.
///
/// Fields use the `argon2` crate convention:
/// - `m_cost`: memory in KiB (NOT bytes, NOT MB)
/// - `t_cost`: number of iterations
/// - `p_cost`: degree of parallelism
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argon2idParams {
    /// Memory cost in kibibytes (256 MiB = `262_144`).
    pub m_cost: u32,
    /// Number of iterations (time cost).
    pub t_cost: u32,
    /// Degree of parallelism (number of lanes).
    pub p_cost: u32,
}

impl Argon2idParams {
    /// The format-v1 canonical cost: 256 MiB, 3 iterations, 4 lanes.
    pub const RECOMMENDED: Self = Self {
        m_cost: MEMORY_256MB,
        t_cost: 3,
        p_cost: 4,
    };
}

// ---------------------------------------------------------------------------
// Password derivation
// ---------------------------------------------------------------------------

/// Derive a KEK from a password, an optional keyfile, and the per-file salt.
///
/// The password bytes are prehashed with BLAKE3; if a keyfile is supplied its
/// bytes are hashed (streaming, so large keyfiles are fine) and mixed into
/// the prehash as a keyed-hash pepper. The mixed input keying material is
/// then stretched through Argon2id with the given cost parameters.
///
/// Deterministic: identical `(password, keyfile, salt, params)` always yield
/// the same KEK; changing any one of them changes the output.
///
/// # Errors
///
/// Returns `CryptoError::Io` if the keyfile cannot be read, or
/// `CryptoError::KeyDerivation` if the Argon2id parameters are invalid or
/// the derivation itself fails. Derivation does not fail for well-formed
/// inputs — the password may be any length, including empty.
pub fn derive_password_kek(
    password: &[u8],
    keyfile: Option<&Path>,
    salt: &[u8; SALT_LEN],
    params: &Argon2idParams,
) -> Result<SecretBytes<KEK_LEN>, CryptoError> {
    let mut ikm = blake3::derive_key(PASSWORD_CONTEXT, password);

    if let Some(path) = keyfile {
        let mut pepper = hash_keyfile(path).inspect_err(|_| ikm.zeroize())?;
        let mixed = blake3::keyed_hash(&pepper, &ikm);
        pepper.zeroize();
        ikm.zeroize();
        ikm = *mixed.as_bytes();
    }

    let result = stretch(&ikm, salt, params);
    ikm.zeroize();
    result
}

/// Stretch input keying material through Argon2id.
fn stretch(
    ikm: &[u8; 32],
    salt: &[u8; SALT_LEN],
    params: &Argon2idParams,
) -> Result<SecretBytes<KEK_LEN>, CryptoError> {
    let argon2_params =
        argon2::Params::new(params.m_cost, params.t_cost, params.p_cost, Some(KEK_LEN))
            .map_err(|e| CryptoError::KeyDerivation(format!("invalid argon2 params: {e}")))?;

    let argon2 = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2_params,
    );

    let mut output = [0u8; KEK_LEN];
    argon2
        .hash_password_into(ikm, salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(format!("argon2id derivation failed: {e}")))?;

    // SecretBytes::new moves the array; no cleartext copy remains here.
    Ok(SecretBytes::new(output))
}

/// Hash a keyfile's contents into a 32-byte pepper, streaming.
fn hash_keyfile(path: &Path) -> Result<[u8; 32], CryptoError> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new_derive_key(KEYFILE_CONTEXT);
    let mut buf = vec![0u8; KEYFILE_READ_BUF];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    buf.zeroize();
    Ok(*hasher.finalize().as_bytes())
}

// ---------------------------------------------------------------------------
// Agreed-secret derivation
// ---------------------------------------------------------------------------

/// Derive a KEK from one or two X25519 shared secrets and the per-file salt.
///
/// The ephemeral-static shared secret is always present; the static-static
/// one is added in authenticated-sender mode. Both are bound together with
/// the salt under a fixed personalization string via BLAKE3's derive-key
/// construction.
///
/// Consumes both shared secrets; they are zeroized when this function
/// returns, on every path.
#[must_use]
pub fn derive_shared_kek(
    ephemeral_shared: SecretBytes<32>,
    static_shared: Option<SecretBytes<32>>,
    salt: &[u8; SALT_LEN],
) -> SecretBytes<KEK_LEN> {
    let mut hasher = blake3::Hasher::new_derive_key(SHARED_KEK_CONTEXT);
    hasher.update(salt);
    hasher.update(ephemeral_shared.expose());
    if let Some(ss) = &static_shared {
        hasher.update(ss.expose());
    }
    let kek = SecretBytes::new(*hasher.finalize().as_bytes());
    // ephemeral_shared and static_shared zeroize on drop here.
    kek
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Small params for fast tests — 32 KiB, 1 iteration, 1 lane.
    const TEST_PARAMS: Argon2idParams = Argon2idParams {
        m_cost: 32,
        t_cost: 1,
        p_cost: 1,
    };

    const TEST_SALT: &[u8; SALT_LEN] = b"0123456789abcdef";

    fn write_keyfile(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        f.write_all(content).expect("write keyfile");
        f.flush().expect("flush keyfile");
        f
    }

    #[test]
    fn password_kek_is_32_bytes() {
        let kek = derive_password_kek(b"password", None, TEST_SALT, &TEST_PARAMS)
            .expect("derive should succeed");
        assert_eq!(kek.expose().len(), KEK_LEN);
    }

    #[test]
    fn password_kek_is_deterministic() {
        let a = derive_password_kek(b"password", None, TEST_SALT, &TEST_PARAMS)
            .expect("derive should succeed");
        let b = derive_password_kek(b"password", None, TEST_SALT, &TEST_PARAMS)
            .expect("derive should succeed");
        assert_eq!(a.expose(), b.expose());
    }

    #[test]
    fn different_passwords_produce_different_keks() {
        let a = derive_password_kek(b"password_a", None, TEST_SALT, &TEST_PARAMS)
            .expect("derive should succeed");
        let b = derive_password_kek(b"password_b", None, TEST_SALT, &TEST_PARAMS)
            .expect("derive should succeed");
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn different_salts_produce_different_keks() {
        let a = derive_password_kek(b"password", None, b"salt_aaaaaaaaaaa", &TEST_PARAMS)
            .expect("derive should succeed");
        let b = derive_password_kek(b"password", None, b"salt_bbbbbbbbbbb", &TEST_PARAMS)
            .expect("derive should succeed");
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn keyfile_changes_the_kek() {
        let kf = write_keyfile(b"keyfile pepper bytes");
        let with = derive_password_kek(b"password", Some(kf.path()), TEST_SALT, &TEST_PARAMS)
            .expect("derive should succeed");
        let without = derive_password_kek(b"password", None, TEST_SALT, &TEST_PARAMS)
            .expect("derive should succeed");
        assert_ne!(with.expose(), without.expose());
    }

    #[test]
    fn same_keyfile_is_deterministic() {
        let kf = write_keyfile(b"stable keyfile content");
        let a = derive_password_kek(b"pw", Some(kf.path()), TEST_SALT, &TEST_PARAMS)
            .expect("derive should succeed");
        let b = derive_password_kek(b"pw", Some(kf.path()), TEST_SALT, &TEST_PARAMS)
            .expect("derive should succeed");
        assert_eq!(a.expose(), b.expose());
    }

    #[test]
    fn different_keyfiles_produce_different_keks() {
        let kf_a = write_keyfile(b"keyfile a");
        let kf_b = write_keyfile(b"keyfile b");
        let a = derive_password_kek(b"pw", Some(kf_a.path()), TEST_SALT, &TEST_PARAMS)
            .expect("derive should succeed");
        let b = derive_password_kek(b"pw", Some(kf_b.path()), TEST_SALT, &TEST_PARAMS)
            .expect("derive should succeed");
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn missing_keyfile_is_an_io_error() {
        let result = derive_password_kek(
            b"pw",
            Some(Path::new("/nonexistent/cachet-keyfile")),
            TEST_SALT,
            &TEST_PARAMS,
        );
        assert!(matches!(result, Err(CryptoError::Io(_))));
    }

    #[test]
    fn empty_password_is_accepted() {
        // Strength policy belongs to the caller; the KDF itself accepts any
        // password length.
        let kek = derive_password_kek(b"", None, TEST_SALT, &TEST_PARAMS)
            .expect("empty password should derive");
        assert_eq!(kek.expose().len(), KEK_LEN);
    }

    #[test]
    fn shared_kek_is_deterministic() {
        let a = derive_shared_kek(SecretBytes::new([0x11; 32]), None, TEST_SALT);
        let b = derive_shared_kek(SecretBytes::new([0x11; 32]), None, TEST_SALT);
        assert_eq!(a.expose(), b.expose());
    }

    #[test]
    fn static_secret_changes_shared_kek() {
        let plain = derive_shared_kek(SecretBytes::new([0x11; 32]), None, TEST_SALT);
        let authed = derive_shared_kek(
            SecretBytes::new([0x11; 32]),
            Some(SecretBytes::new([0x22; 32])),
            TEST_SALT,
        );
        assert_ne!(plain.expose(), authed.expose());
    }

    #[test]
    fn shared_kek_depends_on_salt() {
        let a = derive_shared_kek(SecretBytes::new([0x11; 32]), None, b"salt_aaaaaaaaaaa");
        let b = derive_shared_kek(SecretBytes::new([0x11; 32]), None, b"salt_bbbbbbbbbbb");
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn shared_and_password_domains_are_separated() {
        // The same 32 bytes fed through the two derivations must not collide.
        let from_shared = derive_shared_kek(SecretBytes::new([0x33; 32]), None, TEST_SALT);
        let from_password = derive_password_kek(&[0x33; 32], None, TEST_SALT, &TEST_PARAMS)
            .expect("derive should succeed");
        assert_ne!(from_shared.expose(), from_password.expose());
    }

    #[test]
    fn recommended_params_match_format_v1() {
        let p = Argon2idParams::RECOMMENDED;
        assert_eq!(p.m_cost, 262_144); // 256 MiB
        assert_eq!(p.t_cost, 3);
        assert_eq!(p.p_cost, 4);
    }

    #[test]
    fn argon2id_params_serde_roundtrip() {
        let json = serde_json::to_string(&Argon2idParams::RECOMMENDED)
            .expect("serialize should succeed");
        let back: Argon2idParams = serde_json::from_str(&json).expect("deserialize should succeed");
        assert_eq!(back, Argon2idParams::RECOMMENDED);
    }
}
