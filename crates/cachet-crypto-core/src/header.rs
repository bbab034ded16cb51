//! Container header codec — the fixed-layout prefix of every `.cachet` file.
//!
//! # File layout (format v1)
//!
//! ```text
//! Magic (4 B) | Version (1 B) | Ephemeral PK (32 B) | KDF Salt (16 B)
//! | DEK Slots (20 × 60 B) | Commitment (32 B) | Sealed Metadata (297 B)
//! | Body chunks...
//! ```
//!
//! Every width is a constant for a given version, so readers can seek by
//! offset without scanning variable-length fields. The version byte is read
//! from the file, never assumed; only v1 is supported and anything else is
//! a format error.
//!
//! # Security properties
//!
//! - The unencrypted prefix holds only what a reader needs *before* it has
//!   any key: the ephemeral public key and the KDF salt
//! - All 20 slots are always present; unused slots are filled from the same
//!   CSPRNG as real wrap nonces, so occupancy is not observable
//! - Metadata (length, name, flags) is sealed under the DEK with a
//!   DEK-derived nonce and checked as a unit — tampering with the length or
//!   name is caught before any chunk is trusted
//! - The ephemeral public key and salt ride along as metadata AAD, so a
//!   modified unencrypted prefix is detected even in modes that would not
//!   otherwise consume the modified field

use crate::error::CryptoError;
use crate::kdf::SALT_LEN;
use crate::memory::SecretBytes;
use crate::stream::{self, COMMITMENT_LEN, DEK_LEN};
use crate::symmetric::{self, SealedData, NONCE_LEN, TAG_LEN};
use rand::rngs::OsRng;
use rand::RngCore;
use std::io::Read;
use zeroize::Zeroizing;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes identifying a `.cachet` container.
pub const MAGIC: &[u8; 4] = b"CCHT";

/// Current (and only supported) container format version.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum number of recipients a container can address.
pub const MAX_RECIPIENTS: usize = 20;

/// Ephemeral X25519 public key width.
pub const EPHEMERAL_PK_LEN: usize = 32;

/// One wrapped-DEK slot: wrap nonce + 32-byte wrapped DEK + tag.
pub const SLOT_LEN: usize = NONCE_LEN + DEK_LEN + TAG_LEN;

/// Fixed width of the stored file name, zero-padded.
pub const FILE_NAME_LEN: usize = 256;

/// Reserved bytes for forward extension, written as zero.
const SPARE_LEN: usize = 16;

/// Metadata plaintext: length (8) + name (256) + spare (16) + flags (1).
const METADATA_LEN: usize = 8 + FILE_NAME_LEN + SPARE_LEN + 1;

// Offsets within the metadata plaintext.
const META_OFF_NAME: usize = 8;
const META_OFF_NAME_END: usize = META_OFF_NAME + FILE_NAME_LEN;
const META_OFF_FLAGS: usize = METADATA_LEN - 1;

/// Sealed metadata width: plaintext + tag.
const SEALED_METADATA_LEN: usize = METADATA_LEN + TAG_LEN;

/// Total header length; the body starts at this offset.
pub const HEADER_LEN: usize = OFF_METADATA + SEALED_METADATA_LEN;

// Fixed section offsets.
const OFF_VERSION: usize = 4;
const OFF_EPHEMERAL: usize = OFF_VERSION + 1;
const OFF_SALT: usize = OFF_EPHEMERAL + EPHEMERAL_PK_LEN;
const OFF_SLOTS: usize = OFF_SALT + SALT_LEN;
const OFF_COMMITMENT: usize = OFF_SLOTS + MAX_RECIPIENTS * SLOT_LEN;
const OFF_METADATA: usize = OFF_COMMITMENT + COMMITMENT_LEN;

/// AAD for DEK key-wrap slots — domain-separates slots from everything else
/// sealed under a KEK.
const SLOT_AAD: &[u8] = b"cachet.v1.dek-slot";

/// AAD prefix for the sealed metadata block. The ephemeral public key and
/// salt are appended, binding the unencrypted prefix to the DEK: once the
/// metadata authenticates, those fields are known untampered in every mode.
const METADATA_AAD: &[u8] = b"cachet.v1.metadata";

/// Metadata flag: the name field holds the original file name.
pub const FLAG_NAME_STORED: u8 = 0b0000_0001;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// File metadata carried in the sealed metadata block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMetadata {
    /// Original plaintext length in bytes.
    pub file_length: u64,
    /// Original file name; empty when the encryptor chose not to store one.
    pub file_name: String,
}

/// A parsed container header. Nothing in here is trusted until the DEK has
/// been unwrapped and its commitment verified.
#[derive(Clone)]
pub struct ContainerHeader {
    /// Format version as read from the file.
    pub version: u8,
    /// Per-file ephemeral X25519 public key.
    pub ephemeral_pk: [u8; EPHEMERAL_PK_LEN],
    /// Per-file KDF salt.
    pub salt: [u8; SALT_LEN],
    /// All recipient slots, occupied or padding — indistinguishable here.
    pub slots: [[u8; SLOT_LEN]; MAX_RECIPIENTS],
    /// DEK key-commitment tag.
    pub commitment: [u8; COMMITMENT_LEN],
    /// Sealed metadata block (ciphertext + tag).
    pub sealed_metadata: [u8; SEALED_METADATA_LEN],
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Build the complete header for a new container.
///
/// Wraps the DEK once per KEK into consecutive slots and fills the rest of
/// the slot array with CSPRNG bytes of identical length. Seals the metadata
/// under the DEK with the DEK-derived metadata nonce, and embeds the DEK's
/// commitment tag ahead of it.
///
/// # Errors
///
/// Returns `CryptoError::InvalidKeyMaterial` if `keks` is empty or larger
/// than [`MAX_RECIPIENTS`], and `CryptoError::Encryption` /
/// `CryptoError::SecureMemory` on sealing or CSPRNG failure.
pub fn build(
    dek: &SecretBytes<DEK_LEN>,
    keks: &[SecretBytes<DEK_LEN>],
    metadata: &FileMetadata,
    ephemeral_pk: &[u8; EPHEMERAL_PK_LEN],
    salt: &[u8; SALT_LEN],
) -> Result<Vec<u8>, CryptoError> {
    if keks.is_empty() || keks.len() > MAX_RECIPIENTS {
        return Err(CryptoError::InvalidKeyMaterial(format!(
            "recipient count must be 1..={MAX_RECIPIENTS}, got {}",
            keks.len()
        )));
    }

    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(ephemeral_pk);
    out.extend_from_slice(salt);

    // Occupancy exists only here, at build time; the serialized slot array
    // is uniformly 20 × 60 opaque bytes.
    for kek in keks {
        let slot = symmetric::encrypt(dek.expose(), kek.expose(), SLOT_AAD)?.to_bytes();
        debug_assert_eq!(slot.len(), SLOT_LEN);
        out.extend_from_slice(&slot);
    }
    let mut padding = [0u8; SLOT_LEN];
    for _ in keks.len()..MAX_RECIPIENTS {
        OsRng
            .try_fill_bytes(&mut padding)
            .map_err(|e| CryptoError::SecureMemory(format!("CSPRNG fill failed: {e}")))?;
        out.extend_from_slice(&padding);
    }

    out.extend_from_slice(&stream::commitment_tag(dek));

    let plaintext = encode_metadata(metadata);
    let sealed = symmetric::seal(
        dek.expose(),
        &stream::metadata_nonce(dek),
        &metadata_aad(ephemeral_pk, salt),
        &plaintext,
    )?;
    debug_assert_eq!(sealed.len(), SEALED_METADATA_LEN);
    out.extend_from_slice(&sealed);

    debug_assert_eq!(out.len(), HEADER_LEN);
    Ok(out)
}

/// Encode metadata into its fixed 281-byte plaintext layout.
fn encode_metadata(metadata: &FileMetadata) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(METADATA_LEN));
    out.extend_from_slice(&metadata.file_length.to_le_bytes());

    let name = bounded_name(&metadata.file_name);
    let mut name_field = [0u8; FILE_NAME_LEN];
    name_field[..name.len()].copy_from_slice(name);
    out.extend_from_slice(&name_field);

    out.extend_from_slice(&[0u8; SPARE_LEN]);

    let flags = if name.is_empty() { 0 } else { FLAG_NAME_STORED };
    out.push(flags);
    out
}

/// Truncate a name to [`FILE_NAME_LEN`] bytes on a character boundary.
fn bounded_name(name: &str) -> &[u8] {
    if name.len() <= FILE_NAME_LEN {
        return name.as_bytes();
    }
    let mut end = FILE_NAME_LEN;
    while !name.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    &name.as_bytes()[..end]
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a header from the first [`HEADER_LEN`] bytes of a container.
///
/// # Errors
///
/// Returns `CryptoError::Format` for a short buffer, wrong magic, or an
/// unsupported version. No cryptographic material is touched here.
pub fn parse(bytes: &[u8]) -> Result<ContainerHeader, CryptoError> {
    if bytes.len() < HEADER_LEN {
        return Err(CryptoError::Format(format!(
            "truncated header: {} bytes (need {HEADER_LEN})",
            bytes.len()
        )));
    }
    if &bytes[..OFF_VERSION] != MAGIC.as_slice() {
        return Err(CryptoError::Format("invalid magic bytes".into()));
    }
    let version = bytes[OFF_VERSION];
    if version != FORMAT_VERSION {
        return Err(CryptoError::Format(format!(
            "unsupported container format version {version} (supported: {FORMAT_VERSION})"
        )));
    }

    let mut ephemeral_pk = [0u8; EPHEMERAL_PK_LEN];
    ephemeral_pk.copy_from_slice(&bytes[OFF_EPHEMERAL..OFF_SALT]);

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&bytes[OFF_SALT..OFF_SLOTS]);

    let mut slots = [[0u8; SLOT_LEN]; MAX_RECIPIENTS];
    for (i, slot) in slots.iter_mut().enumerate() {
        let start = OFF_SLOTS.saturating_add(i.saturating_mul(SLOT_LEN));
        let end = start.saturating_add(SLOT_LEN);
        slot.copy_from_slice(&bytes[start..end]);
    }

    let mut commitment = [0u8; COMMITMENT_LEN];
    commitment.copy_from_slice(&bytes[OFF_COMMITMENT..OFF_METADATA]);

    let mut sealed_metadata = [0u8; SEALED_METADATA_LEN];
    sealed_metadata.copy_from_slice(&bytes[OFF_METADATA..HEADER_LEN]);

    Ok(ContainerHeader {
        version,
        ephemeral_pk,
        salt,
        slots,
        commitment,
        sealed_metadata,
    })
}

/// Read and parse a header from a stream.
///
/// # Errors
///
/// Returns `CryptoError::Format` for a stream shorter than one header (the
/// container was truncated before the body), otherwise as [`parse`].
pub fn read_from<R: Read>(reader: &mut R) -> Result<ContainerHeader, CryptoError> {
    let mut buf = [0u8; HEADER_LEN];
    reader.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CryptoError::Format("truncated header".into())
        } else {
            CryptoError::Io(e)
        }
    })?;
    parse(&buf)
}

// ---------------------------------------------------------------------------
// DEK recovery
// ---------------------------------------------------------------------------

/// Try to unwrap the DEK from any slot using this reader's KEK.
///
/// Slots are tried in order; padding slots and slots wrapped for other
/// recipients simply fail to authenticate and are skipped.
///
/// # Errors
///
/// Returns `CryptoError::Decryption` if no slot authenticates — the
/// container is not decryptable with this credential.
pub fn unwrap_dek(
    header: &ContainerHeader,
    kek: &SecretBytes<DEK_LEN>,
) -> Result<SecretBytes<DEK_LEN>, CryptoError> {
    for slot in &header.slots {
        let Ok(sealed) = SealedData::from_bytes(slot) else {
            continue;
        };
        if let Ok(dek) = symmetric::decrypt(&sealed, kek.expose(), SLOT_AAD) {
            if let Ok(dek) = SecretBytes::from_slice(dek.expose()) {
                return Ok(dek);
            }
        }
    }
    Err(CryptoError::Decryption)
}

/// Verify the header's key-commitment tag against an unwrapped DEK.
///
/// Must pass before the DEK is used to open the metadata or any chunk.
///
/// # Errors
///
/// Returns `CryptoError::Decryption` on mismatch.
pub fn verify_commitment(
    header: &ContainerHeader,
    dek: &SecretBytes<DEK_LEN>,
) -> Result<(), CryptoError> {
    stream::verify_commitment(dek, &header.commitment)
}

/// Decrypt and decode the sealed metadata block.
///
/// Never returns partially trusted metadata: the block authenticates as a
/// unit or the whole call fails.
///
/// # Errors
///
/// Returns `CryptoError::Decryption` if the block does not authenticate
/// under the DEK, and `CryptoError::Format` if the authenticated plaintext
/// is malformed (invalid UTF-8 name).
pub fn open_metadata(
    header: &ContainerHeader,
    dek: &SecretBytes<DEK_LEN>,
) -> Result<FileMetadata, CryptoError> {
    let plaintext = Zeroizing::new(symmetric::open(
        dek.expose(),
        &stream::metadata_nonce(dek),
        &metadata_aad(&header.ephemeral_pk, &header.salt),
        &header.sealed_metadata,
    )?);
    decode_metadata(&plaintext)
}

/// The metadata AAD: domain tag || ephemeral public key || salt.
fn metadata_aad(ephemeral_pk: &[u8; EPHEMERAL_PK_LEN], salt: &[u8; SALT_LEN]) -> Vec<u8> {
    let capacity = METADATA_AAD
        .len()
        .saturating_add(EPHEMERAL_PK_LEN)
        .saturating_add(SALT_LEN);
    let mut aad = Vec::with_capacity(capacity);
    aad.extend_from_slice(METADATA_AAD);
    aad.extend_from_slice(ephemeral_pk);
    aad.extend_from_slice(salt);
    aad
}

/// Decode the fixed metadata layout.
fn decode_metadata(plaintext: &[u8]) -> Result<FileMetadata, CryptoError> {
    if plaintext.len() != METADATA_LEN {
        return Err(CryptoError::Format(format!(
            "metadata block has wrong length: {} bytes",
            plaintext.len()
        )));
    }

    let mut length_bytes = [0u8; 8];
    length_bytes.copy_from_slice(&plaintext[..META_OFF_NAME]);
    let file_length = u64::from_le_bytes(length_bytes);

    let name_field = &plaintext[META_OFF_NAME..META_OFF_NAME_END];
    let flags = plaintext[META_OFF_FLAGS];

    let file_name = if flags & FLAG_NAME_STORED == 0 {
        String::new()
    } else {
        let name_len = name_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FILE_NAME_LEN);
        std::str::from_utf8(&name_field[..name_len])
            .map_err(|_| CryptoError::Format("invalid file name encoding".into()))?
            .to_owned()
    };

    Ok(FileMetadata {
        file_length,
        file_name,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
