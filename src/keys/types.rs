// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Key records and lifecycle states.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Purpose a key serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// Encrypts vault payloads.
    TokenizationData,
    /// Keys the payload fingerprint HMAC.
    Fingerprint,
}

impl KeyType {
    /// Returns the stable name of the key type.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::TokenizationData => "tokenization_data",
            KeyType::Fingerprint => "fingerprint",
        }
    }

    /// Returns the algorithm keys of this type are used with.
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            KeyType::TokenizationData => KeyAlgorithm::Aes256Gcm,
            KeyType::Fingerprint => KeyAlgorithm::HmacSha256,
        }
    }
}

/// Algorithm a key is used with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    Aes256Gcm,
    HmacSha256,
}

/// Lifecycle state of a key.
///
/// ```text
/// active ──► retiring ──► retired ──► expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Used for new encryptions.
    Active,
    /// Superseded; still decrypts while entries are re-encrypted.
    Retiring,
    /// No longer referenced after a sweep; decrypt-only until expiry.
    Retired,
    /// Material discarded. Terminal.
    Expired,
}

impl KeyStatus {
    /// Returns the stable name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Retiring => "retiring",
            KeyStatus::Retired => "retired",
            KeyStatus::Expired => "expired",
        }
    }

    /// Returns true if a key in this state may still decrypt.
    pub fn can_decrypt(&self) -> bool {
        !matches!(self, KeyStatus::Expired)
    }

    /// Returns true if `next` directly follows this state.
    pub fn can_transition_to(&self, next: KeyStatus) -> bool {
        matches!(
            (self, next),
            (KeyStatus::Active, KeyStatus::Retiring)
                | (KeyStatus::Retiring, KeyStatus::Retired)
                | (KeyStatus::Retired, KeyStatus::Expired)
        )
    }
}

/// Persisted record of a data key.
///
/// Only the wrapped form of the key material is ever stored.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub key_id: String,
    pub key_type: KeyType,
    pub version: u32,
    pub algorithm: KeyAlgorithm,
    /// Ciphertext from the master-key authority; `None` once expired.
    pub wrapped_key_material: Option<Vec<u8>>,
    /// Master key that produced `wrapped_key_material`.
    pub master_key_id: String,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl EncryptionKey {
    /// Returns a copy demoted to retiring.
    pub fn to_retiring(&self) -> Self {
        let mut key = self.clone();
        key.status = KeyStatus::Retiring;
        key
    }

    /// Returns a copy marked retired at `now`, expiring after `grace`.
    pub fn to_retired(&self, now: DateTime<Utc>, grace: Duration) -> Self {
        let mut key = self.clone();
        key.status = KeyStatus::Retired;
        key.retired_at = Some(now);
        key.expires_at = Some(now + grace);
        key
    }

    /// Returns a copy marked expired with its material discarded.
    pub fn to_expired(&self) -> Self {
        let mut key = self.clone();
        key.status = KeyStatus::Expired;
        key.wrapped_key_material = None;
        key
    }

    /// Returns true if the key is retired and past its expiry time.
    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        self.status == KeyStatus::Retired && self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key_id", &self.key_id)
            .field("key_type", &self.key_type)
            .field("version", &self.version)
            .field("status", &self.status)
            .field("master_key_id", &self.master_key_id)
            .field(
                "wrapped_key_material",
                &self.wrapped_key_material.as_ref().map(|m| m.len()),
            )
            .finish()
    }
}
