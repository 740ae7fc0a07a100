//! Detached signature records and the verification driver.
//!
//! A SIG block payload is a fixed 20-byte record prefix followed by the
//! raw signature. The signed message is the container header, the record
//! prefix, and the arena digest, concatenated in that order; the digest
//! is cached in a [`VerifyCtx`] so several signatures share one pass
//! over the arena.

use crate::block::{Block, BlockType};
use crate::db::ContainerHeader;
use crate::error::{CoreError, CoreResult};
use crate::stream::copy_exact;
use arkdb_trust::{KeyId, Trust};
use sha2::{Digest, Sha512};
use std::io::{Read, Write};

/// Encoded length of the signature record prefix:
/// `sign_ver (1) + hash_alg (1) + reserved (2) + key_id (16)`.
pub const SIGNATURE_PREFIX_LEN: usize = 20;

/// Signature format version this build understands.
const SIGN_VERSION: u8 = 0;

/// Digest algorithm identifier for a signature record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    /// SHA-512; the only algorithm in version 0.
    Sha512,
}

impl HashAlg {
    /// The on-disk algorithm byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            HashAlg::Sha512 => 4,
        }
    }

    /// Decodes an algorithm byte.
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            4 => Some(HashAlg::Sha512),
            _ => None,
        }
    }
}

/// A parsed version-0 signature record.
#[derive(Debug, Clone, Copy)]
pub struct SignatureRecord<'a> {
    /// Digest algorithm named by the record.
    pub hash_alg: HashAlg,
    /// Identifier of the signing key.
    pub key_id: KeyId,
    /// Raw signature bytes.
    pub signature: &'a [u8],
}

impl<'a> SignatureRecord<'a> {
    /// Parses a SIG block payload.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` for a short record, `NotSupported` for an
    /// unknown signature version or digest algorithm.
    pub fn parse(payload: &'a [u8]) -> CoreResult<Self> {
        if payload.len() < SIGNATURE_PREFIX_LEN {
            return Err(CoreError::malformed("signature record too short"));
        }
        if payload[0] != SIGN_VERSION {
            return Err(CoreError::not_supported(format!(
                "signature version {}",
                payload[0]
            )));
        }
        let hash_alg = HashAlg::from_u8(payload[1]).ok_or_else(|| {
            CoreError::not_supported(format!("hash algorithm {}", payload[1]))
        })?;
        let mut key_id = [0u8; 16];
        key_id.copy_from_slice(&payload[4..20]);
        Ok(Self {
            hash_alg,
            key_id: KeyId::from_bytes(key_id),
            signature: &payload[SIGNATURE_PREFIX_LEN..],
        })
    }

    /// Encodes the record prefix for `hash_alg` and `key_id`.
    #[must_use]
    pub fn encode_prefix(hash_alg: HashAlg, key_id: KeyId) -> [u8; SIGNATURE_PREFIX_LEN] {
        let mut prefix = [0u8; SIGNATURE_PREFIX_LEN];
        prefix[0] = SIGN_VERSION;
        prefix[1] = hash_alg.as_u8();
        prefix[4..20].copy_from_slice(key_id.as_bytes());
        prefix
    }
}

/// Cached arena digests, one slot per algorithm.
#[derive(Debug, Default)]
pub struct VerifyCtx {
    sha512: Option<[u8; 64]>,
}

impl VerifyCtx {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the arena digest, computing and caching it on first use.
    ///
    /// `arena` may be `None` when the digest was pre-computed (for
    /// example while copying the ADB block during a transform).
    ///
    /// # Errors
    ///
    /// Returns `Malformed` when the digest is not cached and no arena
    /// bytes are available.
    pub fn digest(&mut self, alg: HashAlg, arena: Option<&[u8]>) -> CoreResult<[u8; 64]> {
        match alg {
            HashAlg::Sha512 => {
                if let Some(cached) = self.sha512 {
                    return Ok(cached);
                }
                let arena =
                    arena.ok_or_else(|| CoreError::malformed("no arena bytes to digest"))?;
                let digest: [u8; 64] = Sha512::digest(arena).into();
                self.sha512 = Some(digest);
                Ok(digest)
            }
        }
    }

    /// Stores a digest computed elsewhere.
    pub fn set_digest(&mut self, alg: HashAlg, digest: [u8; 64]) {
        match alg {
            HashAlg::Sha512 => self.sha512 = Some(digest),
        }
    }
}

/// Assembles the signed message: header, record prefix, digest.
fn signed_message(
    hdr: &ContainerHeader,
    prefix: &[u8; SIGNATURE_PREFIX_LEN],
    digest: &[u8],
) -> Vec<u8> {
    let mut message = Vec::with_capacity(ContainerHeader::SIZE + prefix.len() + digest.len());
    message.extend_from_slice(&hdr.encode());
    message.extend_from_slice(prefix);
    message.extend_from_slice(digest);
    message
}

/// Verifies one SIG block payload against the trusted keys.
///
/// Keys whose identifier differs from the record's are skipped; the
/// first key that verifies wins.
///
/// # Errors
///
/// `Malformed` or `NotSupported` for an unusable record, `KeyRejected`
/// when every candidate key fails.
pub fn verify_signature(
    trust: &Trust,
    hdr: &ContainerHeader,
    arena: Option<&[u8]>,
    vfy: &mut VerifyCtx,
    payload: &[u8],
) -> CoreResult<()> {
    let record = SignatureRecord::parse(payload)?;
    let digest = vfy.digest(record.hash_alg, arena)?;
    let prefix = SignatureRecord::encode_prefix(record.hash_alg, record.key_id);
    let message = signed_message(hdr, &prefix, &digest);

    for key in trust.trusted_keys() {
        if key.id() != record.key_id {
            continue;
        }
        if key.verify(&message, record.signature).is_ok() {
            return Ok(());
        }
    }
    Err(CoreError::KeyRejected)
}

/// Writes one SIG block per loaded private key.
///
/// # Errors
///
/// Propagates digest and output failures.
pub fn sign_blocks<W: Write>(
    trust: &Trust,
    hdr: &ContainerHeader,
    arena: Option<&[u8]>,
    vfy: &mut VerifyCtx,
    os: &mut W,
) -> CoreResult<()> {
    for key in trust.signing_keys() {
        let digest = vfy.digest(HashAlg::Sha512, arena)?;
        let prefix = SignatureRecord::encode_prefix(HashAlg::Sha512, key.id());
        let signature = key.sign(&signed_message(hdr, &prefix, &digest));

        let mut payload = Vec::with_capacity(SIGNATURE_PREFIX_LEN + signature.len());
        payload.extend_from_slice(&prefix);
        payload.extend_from_slice(&signature);
        crate::container::write_block(os, BlockType::Sig, &payload)?;
    }
    Ok(())
}

/// Copies a block (header, payload, padding) from `is` to `os`.
///
/// With a [`VerifyCtx`], the unpadded payload is digested while it
/// streams through, so a transform can re-sign the ADB block without
/// buffering the arena.
///
/// # Errors
///
/// Propagates stream failures.
pub fn copy_block<R: Read, W: Write>(
    os: &mut W,
    block: Block,
    is: &mut R,
    vfy: Option<&mut VerifyCtx>,
) -> CoreResult<()> {
    os.write_all(&block.encode())?;

    let payload_len = block.payload_len();
    let padding = block.padded_size() - Block::HEADER_SIZE - payload_len;

    if let Some(vfy) = vfy {
        let mut hasher = Sha512::new();
        let mut scratch = [0u8; 8192];
        let mut left = payload_len;
        while left > 0 {
            let want = left.min(scratch.len());
            is.read_exact(&mut scratch[..want])?;
            hasher.update(&scratch[..want]);
            os.write_all(&scratch[..want])?;
            left -= want;
        }
        vfy.set_digest(HashAlg::Sha512, hasher.finalize().into());
    } else {
        copy_exact(is, os, payload_len)?;
    }
    copy_exact(is, os, padding)?;
    Ok(())
}
