// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Keyed hashing for payload fingerprints and SHA-256 chain digests.

use ring::{digest, hmac};

use super::hex::hex_encode;
use super::kms::DataEncryptionKey;

/// Computes an HMAC-SHA256 fingerprint of `value` under `key`, hex encoded.
///
/// The domain separator keeps fingerprints from different contexts
/// apart even when the normalized values coincide.
pub fn keyed_fingerprint(key: &DataEncryptionKey, domain: &str, value: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key.key());
    let mut ctx = hmac::Context::with_key(&key);
    ctx.update(&(domain.len() as u32).to_be_bytes());
    ctx.update(domain.as_bytes());
    ctx.update(value);
    hex_encode(ctx.sign().as_ref())
}

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut ctx = digest::Context::new(&digest::SHA256);
    for part in parts {
        ctx.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(ctx.finish().as_ref());
    out
}
