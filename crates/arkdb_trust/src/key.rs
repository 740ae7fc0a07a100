//! Ed25519 key wrappers with container key identifiers.

use crate::error::{TrustError, TrustResult};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha512};
use std::fmt;
use std::fs;
use std::path::Path;

/// Length of raw Ed25519 key material in bytes.
pub const KEY_LEN: usize = 32;

/// Length of an Ed25519 signature in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// A 16-byte key identifier embedded in signature records.
///
/// Derived as the first 16 bytes of SHA-512 over the raw public key, so
/// both halves of a key pair agree on the identifier without sharing
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyId([u8; 16]);

impl KeyId {
    /// Derives the identifier for a raw public key.
    #[must_use]
    pub fn for_public_key(public: &[u8; KEY_LEN]) -> Self {
        let digest = Sha512::digest(public);
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest[..16]);
        Self(id)
    }

    /// Creates an identifier from its raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw identifier bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A trusted Ed25519 public key.
#[derive(Debug, Clone)]
pub struct PublicKey {
    id: KeyId,
    key: VerifyingKey,
    file_name: Option<String>,
}

impl PublicKey {
    /// Parses a raw 32-byte public key.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid curve point.
    pub fn from_bytes(bytes: &[u8]) -> TrustResult<Self> {
        let raw: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| TrustError::invalid_key(format!("expected {KEY_LEN} bytes, got {}", bytes.len())))?;
        let key = VerifyingKey::from_bytes(&raw)
            .map_err(|e| TrustError::invalid_key(e.to_string()))?;
        Ok(Self {
            id: KeyId::for_public_key(&raw),
            key,
            file_name: None,
        })
    }

    /// Loads a raw public key from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> TrustResult<Self> {
        let bytes = fs::read(path)?;
        let mut key = Self::from_bytes(&bytes)?;
        key.file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Ok(key)
    }

    /// Returns the key identifier.
    #[must_use]
    pub fn id(&self) -> KeyId {
        self.id
    }

    /// Returns the raw public key bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.key.to_bytes()
    }

    /// Returns the file name the key was loaded from, if any.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Verifies `signature` over `message`.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidSignature`] if the signature does not
    /// check out, including when it has the wrong length.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> TrustResult<()> {
        let sig = Signature::from_slice(signature).map_err(|_| TrustError::InvalidSignature)?;
        self.key
            .verify(message, &sig)
            .map_err(|_| TrustError::InvalidSignature)
    }
}

/// An Ed25519 signing key.
#[derive(Clone)]
pub struct PrivateKey {
    id: KeyId,
    key: SigningKey,
}

impl PrivateKey {
    /// Builds a signing key from a 32-byte seed.
    #[must_use]
    pub fn from_seed(seed: [u8; KEY_LEN]) -> Self {
        let key = SigningKey::from_bytes(&seed);
        Self {
            id: KeyId::for_public_key(&key.verifying_key().to_bytes()),
            key,
        }
    }

    /// Loads a raw 32-byte seed from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not exactly
    /// 32 bytes.
    pub fn load(path: &Path) -> TrustResult<Self> {
        let bytes = fs::read(path)?;
        let seed: [u8; KEY_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| TrustError::invalid_key(format!("expected {KEY_LEN} bytes, got {}", bytes.len())))?;
        Ok(Self::from_seed(seed))
    }

    /// Returns the key identifier (shared with the public half).
    #[must_use]
    pub fn id(&self) -> KeyId {
        self.id
    }

    /// Returns the corresponding public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            id: self.id,
            key: self.key.verifying_key(),
            file_name: None,
        }
    }

    /// Signs `message`, returning the 64-byte signature.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.key.sign(message).to_bytes()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey").field("id", &self.id).finish()
    }
}
