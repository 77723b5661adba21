// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Public error taxonomy of the custody subsystem.

use crate::security::SecurityError;
use crate::storage::StorageError;

/// Errors returned by custody operations.
#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    /// Input rejected before any state changed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The caller may not perform the operation.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// Lost a race with a concurrent writer after all retries.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// The audit record could not be committed; the operation did not complete.
    #[error("audit write failed: {0}")]
    AuditWriteFailure(String),

    /// The audit chain failed verification.
    #[error("integrity violation in stream {stream_id} at height {height}")]
    Integrity { stream_id: String, height: u64 },

    /// The key needed is expired or its material cannot be obtained.
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("crypto error: {0}")]
    Crypto(#[from] SecurityError),
}

impl CustodyError {
    /// Returns true for errors the caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CustodyError::ConcurrencyConflict(_) | CustodyError::AuditWriteFailure(_)
        )
    }
}
