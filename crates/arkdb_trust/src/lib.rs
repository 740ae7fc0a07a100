//! # ArkDB Trust
//!
//! Key store and signing primitives for ADB containers.
//!
//! A [`Trust`] holds two key lists: trusted public keys used to verify
//! detached container signatures, and private keys used to emit them.
//! Public keys are typically loaded best-effort from a directory
//! (unreadable or malformed files are skipped); private keys are loaded
//! from explicit paths and loading failures are hard errors.
//!
//! Keys are raw 32-byte Ed25519 material. Every key carries a 16-byte
//! identifier derived from its public half; signature records embed this
//! identifier so verification can skip keys that cannot possibly match.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod key;

pub use error::{TrustError, TrustResult};
pub use key::{KeyId, PrivateKey, PublicKey, KEY_LEN, SIGNATURE_LEN};

use std::fs;
use std::path::{Path, PathBuf};

/// A collection of trusted public keys and loaded signing keys.
#[derive(Debug, Default)]
pub struct Trust {
    trusted: Vec<PublicKey>,
    signing: Vec<PrivateKey>,
}

impl Trust {
    /// Creates an empty trust store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a trust store from a public-key directory and a list of
    /// private-key files.
    ///
    /// Unloadable public keys are skipped; a bad private key is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or any private
    /// key fails to load.
    pub fn init(keys_dir: Option<&Path>, private_keys: &[PathBuf]) -> TrustResult<Self> {
        let mut trust = Self::new();
        if let Some(dir) = keys_dir {
            trust.load_public_key_dir(dir)?;
        }
        for path in private_keys {
            trust.load_private_key(path)?;
        }
        Ok(trust)
    }

    /// Loads every readable public key in `dir`.
    ///
    /// Files that are not valid key material are skipped, matching the
    /// best-effort semantics of system key directories.
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory itself cannot be listed.
    pub fn load_public_key_dir(&mut self, dir: &Path) -> TrustResult<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Ok(key) = PublicKey::load(&entry.path()) {
                self.trusted.push(key);
            }
        }
        Ok(())
    }

    /// Loads a private signing key from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not contain
    /// a 32-byte Ed25519 secret.
    pub fn load_private_key(&mut self, path: &Path) -> TrustResult<()> {
        self.signing.push(PrivateKey::load(path)?);
        Ok(())
    }

    /// Adds an in-memory public key.
    pub fn add_public_key(&mut self, key: PublicKey) {
        self.trusted.push(key);
    }

    /// Adds an in-memory private key.
    pub fn add_private_key(&mut self, key: PrivateKey) {
        self.signing.push(key);
    }

    /// Returns the trusted public keys.
    #[must_use]
    pub fn trusted_keys(&self) -> &[PublicKey] {
        &self.trusted
    }

    /// Returns the loaded signing keys.
    #[must_use]
    pub fn signing_keys(&self) -> &[PrivateKey] {
        &self.signing
    }

    /// Looks up a trusted key by the file name it was loaded from.
    #[must_use]
    pub fn key_by_name(&self, name: &str) -> Option<&PublicKey> {
        self.trusted
            .iter()
            .find(|k| k.file_name().is_some_and(|f| f == name))
    }
}
