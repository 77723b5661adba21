// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Vault records.

use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::keys::KeyType;
use crate::security::{hex_encode, SecurityError};

use super::context::TokenContext;

/// Prefix of every token.
pub const TOKEN_PREFIX: &str = "tok_";

/// Random bytes behind a token.
const TOKEN_RANDOM_BYTES: usize = 16;

/// Generates a fresh random token: `tok_` followed by 32 lowercase hex chars.
pub fn generate_token(rng: &SystemRandom) -> Result<String, SecurityError> {
    let mut bytes = [0u8; TOKEN_RANDOM_BYTES];
    rng.fill(&mut bytes)
        .map_err(|_| SecurityError::KeyGeneration("failed to generate token".into()))?;
    Ok(format!("{}{}", TOKEN_PREFIX, hex_encode(&bytes)))
}

/// Returns true if `token` has the shape of a vault token.
pub fn is_well_formed_token(token: &str) -> bool {
    token
        .strip_prefix(TOKEN_PREFIX)
        .map(|rest| {
            rest.len() == TOKEN_RANDOM_BYTES * 2
                && rest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        })
        .unwrap_or(false)
}

/// Associated data binding a payload to its entry.
pub fn payload_aad(token: &str, context: TokenContext) -> Vec<u8> {
    let mut aad = Vec::with_capacity(token.len() + 16);
    aad.extend_from_slice(token.as_bytes());
    aad.push(b'|');
    aad.extend_from_slice(context.as_str().as_bytes());
    aad
}

/// A stored token and its encrypted payload.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub token: String,
    pub context: TokenContext,
    /// nonce ‖ ciphertext ‖ tag under `key_id`.
    pub encrypted_payload: Vec<u8>,
    pub payload_fingerprint: String,
    pub masked_value: String,
    pub key_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: u64,
}

impl std::fmt::Debug for VaultEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultEntry")
            .field("token", &self.token)
            .field("context", &self.context)
            .field("masked_value", &self.masked_value)
            .field("key_id", &self.key_id)
            .field("payload_len", &self.encrypted_payload.len())
            .field("access_count", &self.access_count)
            .finish()
    }
}

/// Result of a tokenize call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizeResult {
    pub token: String,
    pub masked_value: String,
    /// True if an existing entry was returned under the dedup policy.
    pub deduplicated: bool,
}

/// Persisted progress of a re-encryption sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepCheckpoint {
    pub from_key_id: String,
    pub to_key_id: String,
    pub key_type: KeyType,
    /// Last token processed in the current pass.
    pub cursor: Option<String>,
    pub reencrypted: u64,
    pub skipped: u64,
    pub passes: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed: bool,
}

impl SweepCheckpoint {
    /// Starts a sweep from `from_key_id` to `to_key_id`.
    pub fn new(from_key_id: String, to_key_id: String, key_type: KeyType) -> Self {
        let now = Utc::now();
        Self {
            from_key_id,
            to_key_id,
            key_type,
            cursor: None,
            reencrypted: 0,
            skipped: 0,
            passes: 0,
            started_at: now,
            updated_at: now,
            completed: false,
        }
    }
}
