//! File-level container operations.
//!
//! This module provides:
//! - [`encrypt_file`] / [`decrypt_file`] — one complete container operation
//!   on one file: derive KEK(s), generate/unwrap the DEK, build/parse the
//!   header, stream the body
//! - [`encrypt_many`] / [`decrypt_many`] — batch processing with per-file
//!   failure recovery
//! - [`ContainerConfig`] — explicit per-operation configuration; nothing in
//!   this crate reads ambient process-wide state
//!
//! # Output discipline
//!
//! All output goes to a temporary file in the destination directory and is
//! atomically persisted only after the last byte has been written and
//! synced. Any failure — authentication, format, I/O — drops the temporary
//! file, so a partially written container or plaintext can never be
//! mistaken for a valid result.

use crate::ecdh::{self, PrivateKey, PublicKey};
use crate::error::CryptoError;
use crate::header::{self, FileMetadata, MAX_RECIPIENTS};
use crate::kdf::{self, Argon2idParams, SALT_LEN};
use crate::memory::{SecretBuffer, SecretBytes};
use crate::stream::{self, DEK_LEN};
use rand::rngs::OsRng;
use rand::RngCore;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Conventional extension for encrypted containers.
pub const ENCRYPTED_EXTENSION: &str = "cachet";

// ---------------------------------------------------------------------------
// Configuration and credentials
// ---------------------------------------------------------------------------

/// Per-operation configuration, threaded explicitly into every call.
#[derive(Clone, Debug)]
pub struct ContainerConfig {
    /// Argon2id cost for password-mode KEK derivation. Production callers
    /// use the format-v1 canonical [`Argon2idParams::RECOMMENDED`].
    pub kdf: Argon2idParams,
    /// Whether an existing output file may be replaced.
    pub overwrite: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            kdf: Argon2idParams::RECOMMENDED,
            overwrite: false,
        }
    }
}

/// Credentials for encryption.
pub enum EncryptCredentials {
    /// Password mode: one KEK derived from the password and optional keyfile.
    Password {
        /// The password bytes.
        password: SecretBuffer,
        /// Optional keyfile mixed into the derivation as a pepper.
        keyfile: Option<PathBuf>,
    },
    /// Recipient mode: one KEK per recipient public key via ephemeral ECDH.
    Recipients {
        /// Recipient public keys (1 to [`MAX_RECIPIENTS`]).
        public_keys: Vec<PublicKey>,
        /// Sender's private key for authenticated (static-static) mode.
        sender: Option<PrivateKey>,
    },
}

/// Credentials for decryption, mirroring [`EncryptCredentials`].
pub enum DecryptCredentials {
    /// Password mode.
    Password {
        /// The password bytes.
        password: SecretBuffer,
        /// The keyfile used at encryption time, if any.
        keyfile: Option<PathBuf>,
    },
    /// Recipient mode: this recipient's private key.
    PrivateKey {
        /// The recipient's private key.
        private: PrivateKey,
        /// Sender's public key when the container was made in
        /// authenticated mode.
        sender_public: Option<PublicKey>,
    },
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypt `input` into a `.cachet` container at `output`.
///
/// A fresh ephemeral X25519 key pair, KDF salt, and DEK are generated per
/// call; the DEK is wrapped once per derived KEK. The original file name
/// and length are sealed into the metadata block.
///
/// # Errors
///
/// Returns `CryptoError::Io` for input/output failures (including a
/// pre-existing output when `config.overwrite` is false),
/// `CryptoError::InvalidKeyMaterial` for an unusable recipient set, and the
/// KDF/encryption variants for failures in the underlying operations.
pub fn encrypt_file(
    input: &Path,
    output: &Path,
    credentials: &EncryptCredentials,
    config: &ContainerConfig,
) -> Result<(), CryptoError> {
    check_output(output, config.overwrite)?;

    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| CryptoError::SecureMemory(format!("CSPRNG fill failed: {e}")))?;

    // Always generate an ephemeral pair so password-only containers are not
    // distinguishable from recipient-mode ones by the header field.
    let ephemeral = ecdh::generate_keypair();
    let keks = derive_encrypt_keks(credentials, &ephemeral.private, &salt, config)?;

    let dek = SecretBytes::<DEK_LEN>::random()?;
    let file_length = std::fs::metadata(input)?.len();
    let metadata = FileMetadata {
        file_length,
        file_name: file_name_of(input),
    };

    let header_bytes = header::build(
        &dek,
        &keks,
        &metadata,
        ephemeral.public.as_bytes(),
        &salt,
    )?;

    let mut reader = BufReader::new(File::open(input)?);
    let mut tmp = NamedTempFile::new_in(output_dir(output))?;
    tmp.write_all(&header_bytes)?;
    let written = stream::encrypt_body(&mut reader, &mut tmp, &dek)?;
    if written != file_length {
        // The source changed size mid-stream; the sealed length would lie.
        return Err(CryptoError::Encryption(
            "input file changed during encryption".into(),
        ));
    }

    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    replace_if_overwriting(output, config.overwrite)?;
    tmp.persist(output).map_err(|e| CryptoError::Io(e.error))?;

    tracing::debug!(output = %output.display(), bytes = written, "container written");
    Ok(())
}

/// Derive the per-recipient KEK list for encryption.
fn derive_encrypt_keks(
    credentials: &EncryptCredentials,
    ephemeral_private: &PrivateKey,
    salt: &[u8; SALT_LEN],
    config: &ContainerConfig,
) -> Result<Vec<SecretBytes<32>>, CryptoError> {
    match credentials {
        EncryptCredentials::Password { password, keyfile } => Ok(vec![kdf::derive_password_kek(
            password.expose(),
            keyfile.as_deref(),
            salt,
            &config.kdf,
        )?]),
        EncryptCredentials::Recipients {
            public_keys,
            sender,
        } => {
            if public_keys.is_empty() || public_keys.len() > MAX_RECIPIENTS {
                return Err(CryptoError::InvalidKeyMaterial(format!(
                    "recipient count must be 1..={MAX_RECIPIENTS}, got {}",
                    public_keys.len()
                )));
            }
            let mut keks = Vec::with_capacity(public_keys.len());
            for pk in public_keys {
                let ephemeral_shared = ecdh::shared_secret(ephemeral_private, pk)?;
                let static_shared = match sender {
                    Some(sender_private) => Some(ecdh::shared_secret(sender_private, pk)?),
                    None => None,
                };
                keks.push(kdf::derive_shared_kek(ephemeral_shared, static_shared, salt));
            }
            Ok(keks)
        }
    }
}

// ---------------------------------------------------------------------------
// Decryption
// ---------------------------------------------------------------------------

/// Decrypt a `.cachet` container at `input` into `output`.
///
/// Order of trust: parse the fixed header (format checks only) → derive this
/// reader's KEK → unwrap the DEK from a slot → verify the DEK commitment →
/// open the metadata → stream-decrypt chunks. Returns the authenticated
/// metadata so callers can restore the original file name.
///
/// # Errors
///
/// Returns `CryptoError::Format` for structural problems,
/// `CryptoError::Decryption` for any authentication failure (wrong
/// credential and corruption are indistinguishable), and `CryptoError::Io`
/// for I/O failures.
pub fn decrypt_file(
    input: &Path,
    output: &Path,
    credentials: &DecryptCredentials,
    config: &ContainerConfig,
) -> Result<FileMetadata, CryptoError> {
    check_output(output, config.overwrite)?;

    let mut reader = BufReader::new(File::open(input)?);
    let parsed = header::read_from(&mut reader)?;

    let kek = derive_decrypt_kek(credentials, &parsed, config)?;
    let dek = header::unwrap_dek(&parsed, &kek)?;
    header::verify_commitment(&parsed, &dek)?;
    let metadata = header::open_metadata(&parsed, &dek)?;

    let mut tmp = NamedTempFile::new_in(output_dir(output))?;
    stream::decrypt_body(&mut reader, &mut tmp, &dek, metadata.file_length)?;

    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    replace_if_overwriting(output, config.overwrite)?;
    tmp.persist(output).map_err(|e| CryptoError::Io(e.error))?;

    tracing::debug!(
        output = %output.display(),
        bytes = metadata.file_length,
        "container decrypted"
    );
    Ok(metadata)
}

/// Derive this reader's KEK for decryption.
fn derive_decrypt_kek(
    credentials: &DecryptCredentials,
    parsed: &header::ContainerHeader,
    config: &ContainerConfig,
) -> Result<SecretBytes<32>, CryptoError> {
    match credentials {
        DecryptCredentials::Password { password, keyfile } => kdf::derive_password_kek(
            password.expose(),
            keyfile.as_deref(),
            &parsed.salt,
            &config.kdf,
        ),
        DecryptCredentials::PrivateKey {
            private,
            sender_public,
        } => {
            let ephemeral_pk = PublicKey::from_bytes(parsed.ephemeral_pk)
                .map_err(|_| CryptoError::Decryption)?;
            let ephemeral_shared = ecdh::shared_secret(private, &ephemeral_pk)
                .map_err(|_| CryptoError::Decryption)?;
            let static_shared = match sender_public {
                Some(sender) => Some(
                    ecdh::shared_secret(private, sender).map_err(|_| CryptoError::Decryption)?,
                ),
                None => None,
            };
            Ok(kdf::derive_shared_kek(
                ephemeral_shared,
                static_shared,
                &parsed.salt,
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Batch processing
// ---------------------------------------------------------------------------

/// Outcome of a batch operation.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Number of files processed successfully.
    pub succeeded: usize,
    /// Number of files that failed.
    pub failed: usize,
    /// The failing inputs, in input order, with their errors.
    pub failures: Vec<(PathBuf, CryptoError)>,
}

impl BatchSummary {
    /// Whether every file in the batch succeeded.
    #[must_use]
    pub const fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, input: &Path, result: Result<(), CryptoError>) {
        match result {
            Ok(()) => self.succeeded = self.succeeded.saturating_add(1),
            Err(err) => {
                tracing::warn!(input = %input.display(), error = %err, "batch item failed");
                self.failed = self.failed.saturating_add(1);
                self.failures.push((input.to_path_buf(), err));
            }
        }
    }
}

/// Encrypt a batch of `(input, output)` pairs, in input order.
///
/// A failing file never aborts the batch; its error is recorded and the
/// next file is processed with fresh key material.
pub fn encrypt_many(
    jobs: &[(PathBuf, PathBuf)],
    credentials: &EncryptCredentials,
    config: &ContainerConfig,
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    for (input, output) in jobs {
        summary.record(input, encrypt_file(input, output, credentials, config));
    }
    summary
}

/// Decrypt a batch of `(input, output)` pairs, in input order.
pub fn decrypt_many(
    jobs: &[(PathBuf, PathBuf)],
    credentials: &DecryptCredentials,
    config: &ContainerConfig,
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    for (input, output) in jobs {
        summary.record(
            input,
            decrypt_file(input, output, credentials, config).map(|_| ()),
        );
    }
    summary
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// The conventional container path for an input: `name.ext` → `name.ext.cachet`.
#[must_use]
pub fn encrypted_output_path(input: &Path) -> PathBuf {
    let mut name = input
        .file_name()
        .map_or_else(OsString::new, ToOwned::to_owned);
    name.push(".");
    name.push(ENCRYPTED_EXTENSION);
    input.with_file_name(name)
}

/// Fail early when the output exists and overwriting was not requested.
fn check_output(output: &Path, overwrite: bool) -> Result<(), CryptoError> {
    if !overwrite && output.exists() {
        return Err(CryptoError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("output already exists: {}", output.display()),
        )));
    }
    Ok(())
}

/// Remove a pre-existing output right before persisting, when overwriting.
fn replace_if_overwriting(output: &Path, overwrite: bool) -> Result<(), CryptoError> {
    if overwrite && output.exists() {
        std::fs::remove_file(output)?;
    }
    Ok(())
}

/// The directory a temporary output file should be created in.
fn output_dir(output: &Path) -> &Path {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// The stored file name for an input path.
fn file_name_of(input: &Path) -> String {
    input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Atomically write a small artifact (used by the signature subsystem).
pub(crate) fn persist_atomic(
    path: &Path,
    bytes: &[u8],
    overwrite: bool,
) -> Result<(), CryptoError> {
    check_output(path, overwrite)?;
    let mut tmp = NamedTempFile::new_in(output_dir(path))?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    replace_if_overwriting(path, overwrite)?;
    tmp.persist(path).map_err(|e| CryptoError::Io(e.error))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
