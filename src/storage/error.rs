// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Storage error types.

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A uniqueness constraint rejected the write.
    #[error("duplicate {0}")]
    Duplicate(String),

    /// A compare-and-swap precondition did not hold, or a lock could not be taken.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// The record a conditional write targets does not exist.
    #[error("missing {0}")]
    Missing(String),

    /// The store cannot serve requests right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("storage corruption: {0}")]
    Corruption(String),

    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rocksdb error: {0}")]
    RocksDb(rocksdb::Error),
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind;
        match err.kind() {
            ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
                StorageError::Conflict(err.into_string())
            }
            ErrorKind::ShutdownInProgress | ErrorKind::IOError => {
                StorageError::Unavailable(err.into_string())
            }
            ErrorKind::Corruption => StorageError::Corruption(err.into_string()),
            _ => StorageError::RocksDb(err),
        }
    }
}
