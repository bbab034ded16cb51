//! Cryptographic error types for `cachet-crypto-core`.
//!
//! Callers classify failures by matching on the variant, never by parsing
//! messages. Wrong credentials and corrupted or tampered data deliberately
//! collapse into the same payload-free variants ([`CryptoError::Decryption`],
//! [`CryptoError::SignatureInvalid`]) so that nothing about *why* an
//! authentication check failed leaks to an attacker.

use thiserror::Error;

/// Errors produced by cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed (Argon2id parameter validation, memory allocation).
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Symmetric encryption failure (AES-256-GCM setup or sealing).
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Authentication failed — wrong credential, or the container was
    /// tampered with. The two cases are indistinguishable on purpose.
    #[error("decryption failed: wrong credential or corrupted data")]
    Decryption,

    /// Container or signature file is structurally invalid (bad magic,
    /// unsupported version, truncated header). No key material was tested.
    #[error("format error: {0}")]
    Format(String),

    /// Signature creation or key handling failure (not a verification result).
    #[error("signature error: {0}")]
    Signature(String),

    /// Signature verification failed — the file, comment, or declared mode
    /// does not match the signature.
    #[error("signature verification failed")]
    SignatureInvalid,

    /// Invalid key material (wrong length, malformed public key).
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Secure memory allocation failure (mlock, CSPRNG).
    #[error("secure memory error: {0}")]
    SecureMemory(String),

    /// Underlying file or stream I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// Whether this error is an authentication failure (wrong credential or
    /// tampered data) as opposed to a structural or environmental one.
    #[must_use]
    pub const fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Decryption | Self::SignatureInvalid)
    }
}
