// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Store contracts consumed by the custody components.

use chrono::{DateTime, Utc};

use crate::audit::{AuditEvent, Checkpoint};
use crate::keys::{EncryptionKey, KeyStatus, KeyType};
use crate::vault::{SweepCheckpoint, TokenContext, VaultEntry};

use super::StorageError;

/// Append-only storage for hash-chained audit streams.
///
/// Implementations must enforce uniqueness of `(stream_id, block_height)`:
/// this constraint, not an in-process lock, serializes concurrent appends.
pub trait AuditStore: Send + Sync {
    /// Returns the committed event with the highest height in the stream.
    fn last_event(&self, stream_id: &str) -> Result<Option<AuditEvent>, StorageError>;

    /// Inserts a new event.
    ///
    /// Returns `Duplicate` if the stream already holds an event at that height.
    fn insert_event(&self, event: &AuditEvent) -> Result<(), StorageError>;

    /// Reads events with `from <= height <= to` in ascending height order.
    fn read_events(
        &self,
        stream_id: &str,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<AuditEvent>, StorageError>;

    /// Returns the ids of all streams that hold at least one event.
    fn streams(&self) -> Result<Vec<String>, StorageError>;

    /// Inserts a checkpoint. Returns `Duplicate` if one exists at that height.
    fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError>;

    /// Returns all checkpoints of a stream in ascending height order.
    fn checkpoints(&self, stream_id: &str) -> Result<Vec<Checkpoint>, StorageError>;
}

/// Storage for key records.
pub trait KeyStore: Send + Sync {
    /// Inserts a new key.
    ///
    /// Returns `Duplicate` if the id or the `(key_type, version)` pair exists,
    /// or if the key is active and the type already has an active key.
    fn insert_key(&self, key: &EncryptionKey) -> Result<(), StorageError>;

    /// Atomically replaces the active key of a type.
    ///
    /// `demoted` is written over the stored record with the same id, which
    /// must still be active; `next` is inserted. Fails with `Conflict` if the
    /// stored record is no longer active or a retiring key of the type exists.
    fn swap_active_key(
        &self,
        demoted: &EncryptionKey,
        next: &EncryptionKey,
    ) -> Result<(), StorageError>;

    /// Overwrites a key if its stored status equals `expected`.
    fn update_key(&self, expected: KeyStatus, key: &EncryptionKey) -> Result<(), StorageError>;

    fn get_key(&self, key_id: &str) -> Result<Option<EncryptionKey>, StorageError>;

    /// Returns every key of a type in ascending version order.
    fn keys_of_type(&self, key_type: KeyType) -> Result<Vec<EncryptionKey>, StorageError>;
}

/// Storage for vault entries and sweep progress.
pub trait VaultStore: Send + Sync {
    /// Inserts an entry.
    ///
    /// With `index_fingerprint`, also claims the `(context, fingerprint)` slot;
    /// returns `Duplicate` if the token or the slot is taken.
    fn insert_entry(&self, entry: &VaultEntry, index_fingerprint: bool)
        -> Result<(), StorageError>;

    fn get_entry(&self, token: &str) -> Result<Option<VaultEntry>, StorageError>;

    /// Looks up an entry through the fingerprint index.
    fn find_by_fingerprint(
        &self,
        context: TokenContext,
        fingerprint: &str,
    ) -> Result<Option<VaultEntry>, StorageError>;

    /// Replaces the payload and key of an entry if it is still under `expected_key_id`.
    fn swap_entry_key(
        &self,
        token: &str,
        expected_key_id: &str,
        new_key_id: &str,
        payload: &[u8],
    ) -> Result<(), StorageError>;

    /// Increments the access count and sets the last access time.
    fn record_access(&self, token: &str, at: DateTime<Utc>) -> Result<VaultEntry, StorageError>;

    /// Returns up to `limit` entries under `key_id` with tokens after `after`, in token order.
    fn entries_for_key(
        &self,
        key_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VaultEntry>, StorageError>;

    /// Returns true if any entry is under `key_id`.
    fn key_in_use(&self, key_id: &str) -> Result<bool, StorageError> {
        Ok(!self.entries_for_key(key_id, None, 1)?.is_empty())
    }

    fn save_sweep(&self, checkpoint: &SweepCheckpoint) -> Result<(), StorageError>;

    fn load_sweep(&self, from_key_id: &str) -> Result<Option<SweepCheckpoint>, StorageError>;

    /// Returns every sweep not yet marked completed.
    fn pending_sweeps(&self) -> Result<Vec<SweepCheckpoint>, StorageError>;
}

/// A store serving all three contracts.
pub trait CustodyStore: AuditStore + KeyStore + VaultStore {}

impl<T: AuditStore + KeyStore + VaultStore> CustodyStore for T {}
