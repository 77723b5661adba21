// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Security error types.

/// Errors that can occur in the security module.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    /// Key generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    /// The master key referenced by wrapped material is not held by this authority.
    #[error("master key not found: {0}")]
    MasterKeyNotFound(String),

    /// The external master-key authority could not be reached.
    #[error("master key authority unavailable: {0}")]
    AuthorityUnavailable(String),

    /// Malformed hex input.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Ring crypto error.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl From<ring::error::Unspecified> for SecurityError {
    fn from(_: ring::error::Unspecified) -> Self {
        SecurityError::Crypto("unspecified cryptographic error".to_string())
    }
}
