// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Master-key authority trait and data-key types.

use async_trait::async_trait;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::error::SecurityError;

/// Size of AES-256 keys in bytes.
pub const AES_256_KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes.
pub const AES_GCM_NONCE_SIZE: usize = 12;

/// Size of AES-GCM authentication tag in bytes.
pub const AES_GCM_TAG_SIZE: usize = 16;

/// Unwrapped data encryption key (DEK) material.
///
/// Exists only transiently while a payload is being encrypted or
/// decrypted; the material is zeroized when the value is dropped and
/// never appears in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataEncryptionKey {
    /// The raw 256-bit key material.
    key: [u8; AES_256_KEY_SIZE],
    /// Identifier of the `EncryptionKey` record this material belongs to.
    #[zeroize(skip)]
    id: String,
}

impl DataEncryptionKey {
    /// Creates a DEK from raw key material and the owning key ID.
    pub fn new(key: [u8; AES_256_KEY_SIZE], id: String) -> Self {
        Self { key, id }
    }

    /// Generates fresh random key material.
    pub fn generate(rng: &SystemRandom, id: String) -> Result<Self, SecurityError> {
        let mut key = [0u8; AES_256_KEY_SIZE];
        rng.fill(&mut key)
            .map_err(|_| SecurityError::KeyGeneration("failed to generate DEK".into()))?;
        let dek = Self::new(key, id);
        key.zeroize();
        Ok(dek)
    }

    /// Rebuilds a DEK from unwrapped bytes, checking the length.
    pub fn from_slice(bytes: &[u8], id: String) -> Result<Self, SecurityError> {
        if bytes.len() != AES_256_KEY_SIZE {
            return Err(SecurityError::InvalidKeyLength {
                expected: AES_256_KEY_SIZE,
                got: bytes.len(),
            });
        }
        let mut key = [0u8; AES_256_KEY_SIZE];
        key.copy_from_slice(bytes);
        let dek = Self::new(key, id);
        key.zeroize();
        Ok(dek)
    }

    /// Returns the key material.
    ///
    /// # Security
    ///
    /// The returned slice references key material that will be
    /// zeroized when this DEK is dropped. Do not store copies.
    #[inline]
    pub fn key(&self) -> &[u8; AES_256_KEY_SIZE] {
        &self.key
    }

    /// Returns the key ID.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for DataEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataEncryptionKey")
            .field("id", &self.id)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Output of a wrap operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedMaterial {
    /// Ciphertext produced by the authority.
    pub ciphertext: Vec<u8>,
    /// ID of the master key (KEK) that produced it.
    pub master_key_id: String,
}

/// External master-key authority (KMS/HSM).
///
/// Wrapping and unwrapping are the only two operations the key manager
/// needs from the authority. The master key itself never leaves it.
///
/// All operations are async to support cloud authorities that require
/// network calls.
#[async_trait]
pub trait MasterKeyAuthority: Send + Sync {
    /// Wraps (encrypts) plaintext key material with the current master key.
    async fn wrap(&self, plaintext_key: &[u8]) -> Result<WrappedMaterial, SecurityError>;

    /// Unwraps (decrypts) key material previously produced by [`wrap`].
    ///
    /// [`wrap`]: MasterKeyAuthority::wrap
    async fn unwrap(
        &self,
        ciphertext: &[u8],
        master_key_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>, SecurityError>;

    /// Returns the ID of the master key new material is wrapped with.
    fn master_key_id(&self) -> String;
}
