//! X25519 key agreement for recipient-mode containers.
//!
//! This module provides:
//! - [`generate_keypair`] — generate an X25519 key pair
//! - [`shared_secret`] — one-shot Diffie-Hellman between a private and a
//!   public key
//!
//! # Usage in the container
//!
//! Encryption generates one ephemeral key pair per file; its public key is
//! stored in the unencrypted header and its private half performs DH with
//! every recipient public key. In authenticated-sender mode a second
//! static-static agreement (sender private × recipient public) is folded
//! into the KEK derivation, so only the named sender could have produced
//! the container.

use crate::error::CryptoError;
use crate::memory::SecretBytes;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// X25519 public key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// X25519 shared secret length in bytes.
pub const SHARED_SECRET_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An X25519 public key. Safe to store and transmit in the clear.
#[must_use = "public key must be stored or transmitted"]
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    bytes: [u8; PUBLIC_KEY_LEN],
}

impl PublicKey {
    /// Construct from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyMaterial` for the all-zero encoding,
    /// which can never be a usable X25519 public key.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Result<Self, CryptoError> {
        if bytes == [0u8; PUBLIC_KEY_LEN] {
            return Err(CryptoError::InvalidKeyMaterial(
                "all-zero X25519 public key".into(),
            ));
        }
        Ok(Self { bytes })
    }

    /// Construct from a slice of exactly [`PUBLIC_KEY_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyMaterial` on wrong length or the
    /// all-zero encoding.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyMaterial(format!(
                "invalid X25519 public key length: {} bytes (expected {PUBLIC_KEY_LEN})",
                bytes.len()
            ))
        })?;
        Self::from_bytes(arr)
    }

    /// The raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.bytes
    }

    /// The raw key bytes, by value.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; PUBLIC_KEY_LEN] {
        self.bytes
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Public material, but keep output short.
        write!(f, "PublicKey({:02x}{:02x}..)", self.bytes[0], self.bytes[1])
    }
}

/// An X25519 private key in secure memory.
///
/// Intentionally does NOT implement `Serialize` — exporting private keys is
/// a key-store concern, not a container concern.
pub struct PrivateKey {
    secret: SecretBytes<PUBLIC_KEY_LEN>,
}

impl PrivateKey {
    /// Construct from raw bytes. The input array is consumed.
    #[must_use]
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self {
            secret: SecretBytes::new(bytes),
        }
    }

    /// The corresponding public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        let secret = x25519_dalek::StaticSecret::from(*self.secret.expose());
        PublicKey {
            bytes: x25519_dalek::PublicKey::from(&secret).to_bytes(),
        }
        // `secret` zeroizes on drop (x25519-dalek "zeroize" feature).
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(***)")
    }
}

/// An X25519 key pair.
#[must_use = "key pair must be stored"]
pub struct KeyPair {
    /// Public key (safe to share).
    pub public: PublicKey,
    /// Private key (must be kept secret).
    pub private: PrivateKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyPair(***)")
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Generate an X25519 key pair from the CSPRNG.
pub fn generate_keypair() -> KeyPair {
    let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
    let public = x25519_dalek::PublicKey::from(&secret);
    KeyPair {
        public: PublicKey {
            bytes: public.to_bytes(),
        },
        private: PrivateKey {
            secret: SecretBytes::new(secret.to_bytes()),
        },
    }
    // `secret` zeroizes on drop.
}

/// Perform X25519 Diffie-Hellman between `private` and `public`.
///
/// DH is symmetric: `shared_secret(a_priv, b_pub) == shared_secret(b_priv,
/// a_pub)`, which is exactly what lets the decryptor reproduce the
/// encryptor's per-recipient secret.
///
/// # Errors
///
/// Returns `CryptoError::InvalidKeyMaterial` if the agreement was not
/// contributory (the peer key is a low-order point and the output would be
/// attacker-chosen).
pub fn shared_secret(
    private: &PrivateKey,
    public: &PublicKey,
) -> Result<SecretBytes<SHARED_SECRET_LEN>, CryptoError> {
    let secret = x25519_dalek::StaticSecret::from(*private.secret.expose());
    let peer = x25519_dalek::PublicKey::from(public.bytes);
    let shared = secret.diffie_hellman(&peer);
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKeyMaterial(
            "non-contributory X25519 agreement (low-order public key)".into(),
        ));
    }
    Ok(SecretBytes::new(*shared.as_bytes()))
    // `secret` and `shared` zeroize on drop.
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
