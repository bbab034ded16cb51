//! `cachet-crypto-core` — cryptographic container and signature engine for CACHET.
//!
//! This crate is the audit target: zero network, zero async, zero UI
//! dependencies. It owns everything where a subtle bug breaks
//! confidentiality, integrity, or authenticity — key derivation,
//! multi-recipient key wrapping, the binary container format, the chunked
//! authenticated-encryption pipeline with key commitment, and detached
//! file signatures. Prompting, shredding, filename restoration, and other
//! orchestration live outside this crate.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod error;
pub mod memory;

pub mod kdf;
pub mod symmetric;

pub mod ecdh;

pub mod header;

pub mod stream;

pub mod container;

pub mod sign;

pub use container::{
    decrypt_file, decrypt_many, encrypt_file, encrypt_many, encrypted_output_path, BatchSummary,
    ContainerConfig, DecryptCredentials, EncryptCredentials, ENCRYPTED_EXTENSION,
};
pub use ecdh::{generate_keypair, shared_secret, KeyPair, PrivateKey, PublicKey};
pub use error::CryptoError;
pub use header::{FileMetadata, FORMAT_VERSION, HEADER_LEN, MAX_RECIPIENTS};
pub use kdf::{derive_password_kek, derive_shared_kek, Argon2idParams, KEK_LEN, SALT_LEN};
pub use memory::{disable_core_dumps, LockedRegion, SecretBuffer, SecretBytes};
pub use sign::{
    generate_signing_keypair, sign_file, sign_file_to, signature_output_path, verify_file,
    verify_file_at, SigningKeyPair, MAX_COMMENT_LEN, PREHASH_THRESHOLD, SIGNATURE_EXTENSION,
};
pub use stream::{CHUNK_SIZE, COMMITMENT_LEN, DEK_LEN};
pub use symmetric::{SealedData, KEY_LEN, NONCE_LEN, TAG_LEN};
