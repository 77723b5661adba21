// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Local in-memory master-key authority.
//!
//! Holds master keys (KEKs) in memory and wraps data keys with
//! AES-256-GCM. Suitable for development and testing, or single-node
//! deployments where the master key is provided at startup. Retired
//! master keys are kept for unwrapping until they are dropped
//! explicitly, so data keys wrapped before a master rotation stay usable.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::error::SecurityError;
use super::hex::hex_decode;
use super::kms::{
    MasterKeyAuthority, WrappedMaterial, AES_256_KEY_SIZE, AES_GCM_NONCE_SIZE, AES_GCM_TAG_SIZE,
};

/// A master key (KEK) stored in memory.
#[derive(Zeroize, ZeroizeOnDrop)]
struct MasterKey {
    key: [u8; AES_256_KEY_SIZE],
}

struct Keyring {
    keys: HashMap<String, MasterKey>,
    active: String,
}

/// Local in-memory master-key authority.
///
/// The key material is zeroized on drop.
pub struct LocalKms {
    keyring: RwLock<Keyring>,
    rng: SystemRandom,
}

impl LocalKms {
    /// Creates a new LocalKms with the given master key.
    pub fn new(master_key: [u8; AES_256_KEY_SIZE], kek_id: String) -> Self {
        let mut keys = HashMap::new();
        keys.insert(kek_id.clone(), MasterKey { key: master_key });
        Self {
            keyring: RwLock::new(Keyring {
                keys,
                active: kek_id,
            }),
            rng: SystemRandom::new(),
        }
    }

    /// Generates a new LocalKms with a random master key.
    pub fn generate() -> Result<Self, SecurityError> {
        let rng = SystemRandom::new();
        let mut key = [0u8; AES_256_KEY_SIZE];
        rng.fill(&mut key)
            .map_err(|_| SecurityError::KeyGeneration("failed to generate random key".into()))?;

        let id = uuid::Uuid::new_v4().to_string();
        let kms = Self::new(key, id);
        key.zeroize();
        Ok(kms)
    }

    /// Creates a new LocalKms from a hex-encoded master key.
    pub fn from_hex(hex_key: &str, kek_id: String) -> Result<Self, SecurityError> {
        let bytes = Zeroizing::new(hex_decode(hex_key)?);
        if bytes.len() != AES_256_KEY_SIZE {
            return Err(SecurityError::InvalidKeyLength {
                expected: AES_256_KEY_SIZE,
                got: bytes.len(),
            });
        }

        let mut key = [0u8; AES_256_KEY_SIZE];
        key.copy_from_slice(&bytes);
        let kms = Self::new(key, kek_id);
        key.zeroize();
        Ok(kms)
    }

    /// Installs a freshly generated master key and makes it active.
    ///
    /// The previous master key is kept for unwrapping.
    pub fn rotate_master(&self, new_kek_id: &str) -> Result<(), SecurityError> {
        let mut key = [0u8; AES_256_KEY_SIZE];
        self.rng
            .fill(&mut key)
            .map_err(|_| SecurityError::KeyGeneration("failed to generate new KEK".into()))?;

        let mut keyring = self.keyring.write();
        keyring.keys.insert(new_kek_id.to_string(), MasterKey { key });
        key.zeroize();
        let previous = std::mem::replace(&mut keyring.active, new_kek_id.to_string());
        info!(old_kek = %previous, new_kek = %new_kek_id, "Rotated local master key");
        Ok(())
    }

    /// Drops a non-active master key. Material wrapped by it becomes unreadable.
    pub fn drop_master(&self, kek_id: &str) -> Result<(), SecurityError> {
        let mut keyring = self.keyring.write();
        if keyring.active == kek_id {
            return Err(SecurityError::Crypto(format!(
                "cannot drop active master key {}",
                kek_id
            )));
        }
        if keyring.keys.remove(kek_id).is_none() {
            return Err(SecurityError::MasterKeyNotFound(kek_id.to_string()));
        }
        warn!(kek_id = %kek_id, "Dropped local master key");
        Ok(())
    }

    fn seal(&self, key: &[u8; AES_256_KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let mut nonce_bytes = [0u8; AES_GCM_NONCE_SIZE];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| SecurityError::KeyGeneration("failed to generate nonce".into()))?;

        let sealing_key = LessSafeKey::new(UnboundKey::new(&aead::AES_256_GCM, key)?);
        let mut in_out = plaintext.to_vec();
        sealing_key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| SecurityError::Encryption("AES-GCM seal failed".into()))?;

        let mut result = Vec::with_capacity(AES_GCM_NONCE_SIZE + in_out.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&in_out);
        in_out.zeroize();
        Ok(result)
    }

    fn open(
        &self,
        key: &[u8; AES_256_KEY_SIZE],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, SecurityError> {
        if ciphertext.len() < AES_GCM_NONCE_SIZE + AES_GCM_TAG_SIZE {
            return Err(SecurityError::Decryption("ciphertext too short".into()));
        }

        let (nonce_bytes, encrypted) = ciphertext.split_at(AES_GCM_NONCE_SIZE);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)?;
        let opening_key = LessSafeKey::new(UnboundKey::new(&aead::AES_256_GCM, key)?);

        let mut in_out = Zeroizing::new(encrypted.to_vec());
        let plaintext_len = opening_key
            .open_in_place(nonce, Aad::empty(), in_out.as_mut_slice())
            .map_err(|_| SecurityError::Decryption("AES-GCM open failed".into()))?
            .len();
        in_out.truncate(plaintext_len);
        Ok(in_out)
    }
}

#[async_trait]
impl MasterKeyAuthority for LocalKms {
    async fn wrap(&self, plaintext_key: &[u8]) -> Result<WrappedMaterial, SecurityError> {
        let keyring = self.keyring.read();
        let master = keyring
            .keys
            .get(&keyring.active)
            .ok_or_else(|| SecurityError::MasterKeyNotFound(keyring.active.clone()))?;
        let ciphertext = self.seal(&master.key, plaintext_key)?;

        Ok(WrappedMaterial {
            ciphertext,
            master_key_id: keyring.active.clone(),
        })
    }

    async fn unwrap(
        &self,
        ciphertext: &[u8],
        master_key_id: &str,
    ) -> Result<Zeroizing<Vec<u8>>, SecurityError> {
        let keyring = self.keyring.read();
        let master = keyring
            .keys
            .get(master_key_id)
            .ok_or_else(|| SecurityError::MasterKeyNotFound(master_key_id.to_string()))?;
        self.open(&master.key, ciphertext)
    }

    fn master_key_id(&self) -> String {
        self.keyring.read().active.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_kms() {
        let kms = LocalKms::generate().unwrap();
        assert!(!kms.master_key_id().is_empty());
    }

    #[tokio::test]
    async fn test_wrap_unwrap() {
        let kms = LocalKms::generate().unwrap();
        let material = [9u8; AES_256_KEY_SIZE];

        let wrapped = kms.wrap(&material).await.unwrap();
        assert_eq!(wrapped.master_key_id, kms.master_key_id());
        assert_ne!(&wrapped.ciphertext[AES_GCM_NONCE_SIZE..], &material[..]);

        let unwrapped = kms
            .unwrap(&wrapped.ciphertext, &wrapped.master_key_id)
            .await
            .unwrap();
        assert_eq!(unwrapped.as_slice(), &material[..]);
    }

    #[tokio::test]
    async fn test_wrap_produces_different_ciphertext() {
        let kms = LocalKms::generate().unwrap();
        let material = [1u8; AES_256_KEY_SIZE];

        let wrapped1 = kms.wrap(&material).await.unwrap();
        let wrapped2 = kms.wrap(&material).await.unwrap();

        // Random nonce per wrap
        assert_ne!(wrapped1.ciphertext, wrapped2.ciphertext);
    }

    #[tokio::test]
    async fn test_unwrap_after_master_rotation() {
        let kms = LocalKms::generate().unwrap();
        let old_kek = kms.master_key_id();
        let wrapped = kms.wrap(&[5u8; AES_256_KEY_SIZE]).await.unwrap();

        kms.rotate_master("kek-2").unwrap();
        assert_eq!(kms.master_key_id(), "kek-2");

        // Old material is still readable through the retained KEK
        let unwrapped = kms.unwrap(&wrapped.ciphertext, &old_kek).await.unwrap();
        assert_eq!(unwrapped.as_slice(), &[5u8; AES_256_KEY_SIZE][..]);

        kms.drop_master(&old_kek).unwrap();
        let result = kms.unwrap(&wrapped.ciphertext, &old_kek).await;
        assert!(matches!(result, Err(SecurityError::MasterKeyNotFound(_))));
    }

    #[test]
    fn test_cannot_drop_active_master() {
        let kms = LocalKms::generate().unwrap();
        let active = kms.master_key_id();
        assert!(kms.drop_master(&active).is_err());
    }

    #[test]
    fn test_from_hex() {
        let hex_key = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        let kms = LocalKms::from_hex(hex_key, "test-kek".into()).unwrap();
        assert_eq!(kms.master_key_id(), "test-kek");
    }

    #[test]
    fn test_from_hex_invalid_length() {
        let hex_key = "0123456789abcdef"; // Too short
        let result = LocalKms::from_hex(hex_key, "test-kek".into());
        assert!(matches!(
            result,
            Err(SecurityError::InvalidKeyLength { .. })
        ));
    }

    #[tokio::test]
    async fn test_unwrap_tampered_fails() {
        let kms = LocalKms::generate().unwrap();
        let mut wrapped = kms.wrap(&[3u8; AES_256_KEY_SIZE]).await.unwrap();
        let last = wrapped.ciphertext.len() - 1;
        wrapped.ciphertext[last] ^= 0xFF;

        let result = kms.unwrap(&wrapped.ciphertext, &wrapped.master_key_id).await;
        assert!(matches!(result, Err(SecurityError::Decryption(_))));
    }
}
