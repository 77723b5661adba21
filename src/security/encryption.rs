// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Authenticated encryption of vault payloads.
//!
//! Provides AES-256-GCM encryption using an unwrapped DEK. The
//! associated data binds each ciphertext to the vault entry it belongs
//! to, so a payload copied onto another token fails authentication.
//!
//! # Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Encrypted Payload                                        │
//! ├────────────┬─────────────────────────────┬───────────────┤
//! │ Nonce (12) │ Ciphertext (variable)       │ Tag (16)      │
//! └────────────┴─────────────────────────────┴───────────────┘
//! ```

use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::{Zeroize, Zeroizing};

use super::error::SecurityError;
use super::kms::{DataEncryptionKey, AES_GCM_NONCE_SIZE, AES_GCM_TAG_SIZE};

/// AES-256-GCM cipher bound to a single DEK.
///
/// Built per operation from a transiently unwrapped DEK and dropped
/// with it.
pub struct PayloadCipher<'a> {
    dek: &'a DataEncryptionKey,
    rng: SystemRandom,
}

impl<'a> PayloadCipher<'a> {
    /// Creates a cipher over the given DEK.
    pub fn new(dek: &'a DataEncryptionKey) -> Self {
        Self {
            dek,
            rng: SystemRandom::new(),
        }
    }

    /// Returns the ID of the key this cipher uses.
    pub fn key_id(&self) -> &str {
        self.dek.id()
    }

    /// Encrypts `plaintext`, authenticating `aad` alongside it.
    ///
    /// Returns nonce || ciphertext || tag.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let mut nonce_bytes = [0u8; AES_GCM_NONCE_SIZE];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| SecurityError::KeyGeneration("failed to generate nonce".into()))?;

        let key = LessSafeKey::new(UnboundKey::new(&aead::AES_256_GCM, self.dek.key())?);

        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(aad),
            &mut in_out,
        )
        .map_err(|_| SecurityError::Encryption("AES-GCM seal failed".into()))?;

        let mut result = Vec::with_capacity(AES_GCM_NONCE_SIZE + in_out.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&in_out);
        in_out.zeroize();

        Ok(result)
    }

    /// Decrypts a payload produced by [`seal`](Self::seal) with the same `aad`.
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, SecurityError> {
        if sealed.len() < AES_GCM_NONCE_SIZE + AES_GCM_TAG_SIZE {
            return Err(SecurityError::Decryption("ciphertext too short".into()));
        }

        let (nonce_bytes, encrypted) = sealed.split_at(AES_GCM_NONCE_SIZE);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)?;
        let key = LessSafeKey::new(UnboundKey::new(&aead::AES_256_GCM, self.dek.key())?);

        let mut in_out = Zeroizing::new(encrypted.to_vec());
        let plaintext_len = key
            .open_in_place(nonce, Aad::from(aad), in_out.as_mut_slice())
            .map_err(|_| SecurityError::Decryption("AES-GCM open failed".into()))?
            .len();
        in_out.truncate(plaintext_len);

        Ok(in_out)
    }
}
