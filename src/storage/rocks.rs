// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! RocksDB-backed custody store.
//!
//! Uniqueness and compare-and-swap rules run inside pessimistic
//! transactions: every record a write depends on is read with
//! `get_for_update`, so two writers racing on the same slot cannot both
//! commit.

use std::path::Path;

use chrono::{DateTime, Utc};
use rocksdb::{
    Direction, IteratorMode, MultiThreaded, Options, Transaction, TransactionDB,
    TransactionDBOptions, TransactionOptions, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::audit::{AuditEvent, Checkpoint};
use crate::keys::{EncryptionKey, KeyStatus, KeyType};
use crate::vault::{SweepCheckpoint, TokenContext, VaultEntry};

use super::key::{
    decode_stream_key, encode_stream_key, fingerprint_key, id_key, key_version_key,
    key_version_prefix, prefix_end, stream_prefix, TAG_CHECKPOINT, TAG_ENTRY, TAG_EVENT, TAG_KEY,
    TAG_SWEEP,
};
use super::{AuditStore, KeyStore, StorageError, VaultStore};

/// Durability mode for write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Writes are synced to WAL but not fsynced to disk.
    /// Durable against process crashes but not power failures.
    #[default]
    WalOnly,
    /// Writes are fsynced to disk on every operation.
    FsyncEveryWrite,
}

type Db = TransactionDB<MultiThreaded>;

/// RocksDB-backed store implementing every custody store contract.
///
/// Audit events and checkpoints are always fsynced; other records follow
/// the configured [`DurabilityMode`].
pub struct RocksStore {
    db: Db,
    write_opts: WriteOptions,
    sync_write_opts: WriteOptions,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}

impl RocksStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::open_with_durability(path, DurabilityMode::default())
    }

    /// Opens or creates a store with the specified durability mode.
    pub fn open_with_durability(
        path: &Path,
        durability: DurabilityMode,
    ) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_level_compaction_dynamic_level_bytes(true);

        // Point lookups dominate detokenize
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);

        let db = Db::open(&opts, &TransactionDBOptions::default(), path)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(durability == DurabilityMode::FsyncEveryWrite);

        let mut sync_write_opts = WriteOptions::default();
        sync_write_opts.set_sync(true);

        Ok(Self {
            db,
            write_opts,
            sync_write_opts,
        })
    }

    fn txn(&self) -> Transaction<'_, Db> {
        self.db.transaction_opt(&self.write_opts, &TransactionOptions::default())
    }

    fn sync_txn(&self) -> Transaction<'_, Db> {
        self.db
            .transaction_opt(&self.sync_write_opts, &TransactionOptions::default())
    }

    fn get_record<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StorageError> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn locked_record<T: DeserializeOwned>(
        txn: &Transaction<'_, Db>,
        key: &[u8],
    ) -> Result<Option<T>, StorageError> {
        match txn.get_for_update(key, true)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Visits records whose keys start with `prefix`, from `start` onward.
    fn scan<F>(&self, prefix: &[u8], start: &[u8], mut visit: F) -> Result<(), StorageError>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool, StorageError>,
    {
        let iter = self.db.iterator(IteratorMode::From(start, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if !visit(&key[..], &value[..])? {
                break;
            }
        }
        Ok(())
    }

    fn scan_stream<T: DeserializeOwned>(
        &self,
        tag: u8,
        stream_id: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<T>, StorageError> {
        let prefix = stream_prefix(tag, stream_id);
        let start = encode_stream_key(tag, stream_id, from);
        let mut out = Vec::new();
        self.scan(&prefix, &start, |key, value| {
            let (_, height) = decode_stream_key(key)?;
            if height > to {
                return Ok(false);
            }
            out.push(decode(value)?);
            Ok(true)
        })?;
        Ok(out)
    }
}

impl AuditStore for RocksStore {
    fn last_event(&self, stream_id: &str) -> Result<Option<AuditEvent>, StorageError> {
        let prefix = stream_prefix(TAG_EVENT, stream_id);
        let upper = encode_stream_key(TAG_EVENT, stream_id, u64::MAX);
        let mut iter = self
            .db
            .iterator(IteratorMode::From(&upper, Direction::Reverse));
        match iter.next() {
            Some(item) => {
                let (key, value) = item?;
                if key.starts_with(&prefix) {
                    Ok(Some(decode(&value)?))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    fn insert_event(&self, event: &AuditEvent) -> Result<(), StorageError> {
        let key = encode_stream_key(TAG_EVENT, &event.stream_id, event.block_height);
        let txn = self.sync_txn();
        if txn.get_for_update(&key, true)?.is_some() {
            return Err(StorageError::Duplicate(format!(
                "event {}/{}",
                event.stream_id, event.block_height
            )));
        }
        txn.put(&key, encode(event)?)?;
        txn.commit().map_err(|e| match StorageError::from(e) {
            // The winner of a lock race has committed the same height
            StorageError::Conflict(msg) => StorageError::Duplicate(msg),
            other => other,
        })
    }

    fn read_events(
        &self,
        stream_id: &str,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<AuditEvent>, StorageError> {
        let to = to.unwrap_or(u64::MAX);
        if from > to {
            return Ok(Vec::new());
        }
        self.scan_stream(TAG_EVENT, stream_id, from, to)
    }

    fn streams(&self) -> Result<Vec<String>, StorageError> {
        let mut streams: Vec<String> = Vec::new();
        let mut start = vec![TAG_EVENT];
        loop {
            let mut iter = self
                .db
                .iterator(IteratorMode::From(&start, Direction::Forward));
            let Some(item) = iter.next() else { break };
            let (key, _) = item?;
            if key.first() != Some(&TAG_EVENT) {
                break;
            }
            let (stream, _) = decode_stream_key(&key)?;
            // Skip the rest of this stream
            let next = prefix_end(&stream_prefix(TAG_EVENT, &stream));
            streams.push(stream);
            match next {
                Some(next) => start = next,
                None => break,
            }
        }
        Ok(streams)
    }

    fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let key = encode_stream_key(TAG_CHECKPOINT, &checkpoint.stream_id, checkpoint.height);
        let txn = self.sync_txn();
        if txn.get_for_update(&key, true)?.is_some() {
            return Err(StorageError::Duplicate(format!(
                "checkpoint {}/{}",
                checkpoint.stream_id, checkpoint.height
            )));
        }
        txn.put(&key, encode(checkpoint)?)?;
        txn.commit()?;
        Ok(())
    }

    fn checkpoints(&self, stream_id: &str) -> Result<Vec<Checkpoint>, StorageError> {
        self.scan_stream(TAG_CHECKPOINT, stream_id, 0, u64::MAX)
    }
}

impl KeyStore for RocksStore {
    fn insert_key(&self, key: &EncryptionKey) -> Result<(), StorageError> {
        let record_key = id_key(TAG_KEY, &key.key_id);
        let version_key = key_version_key(key.key_type, key.version);
        let txn = self.txn();
        if txn.get_for_update(&record_key, true)?.is_some() {
            return Err(StorageError::Duplicate(format!("key {}", key.key_id)));
        }
        if txn.get_for_update(&version_key, true)?.is_some() {
            return Err(StorageError::Duplicate(format!(
                "key version {}/{}",
                key.key_type.as_str(),
                key.version
            )));
        }
        if key.status == KeyStatus::Active {
            // Version 0 of the index guards the "first active key" slot
            let bootstrap = key_version_key(key.key_type, 0);
            txn.get_for_update(&bootstrap, true)?;
            if self
                .keys_of_type(key.key_type)?
                .iter()
                .any(|k| k.status == KeyStatus::Active)
            {
                return Err(StorageError::Duplicate(format!(
                    "active {} key",
                    key.key_type.as_str()
                )));
            }
            txn.put(&bootstrap, key.key_id.as_bytes())?;
        }
        txn.put(&version_key, key.key_id.as_bytes())?;
        txn.put(&record_key, encode(key)?)?;
        txn.commit()?;
        Ok(())
    }

    fn swap_active_key(
        &self,
        demoted: &EncryptionKey,
        next: &EncryptionKey,
    ) -> Result<(), StorageError> {
        let demoted_key = id_key(TAG_KEY, &demoted.key_id);
        let next_key = id_key(TAG_KEY, &next.key_id);
        let version_key = key_version_key(next.key_type, next.version);

        let txn = self.txn();
        let stored: EncryptionKey = Self::locked_record(&txn, &demoted_key)?
            .ok_or_else(|| StorageError::Missing(format!("key {}", demoted.key_id)))?;
        if stored.status != KeyStatus::Active {
            return Err(StorageError::Conflict(format!(
                "key {} is no longer active",
                demoted.key_id
            )));
        }
        if self
            .keys_of_type(next.key_type)?
            .iter()
            .any(|k| k.status == KeyStatus::Retiring)
        {
            return Err(StorageError::Conflict(format!(
                "a {} key is still retiring",
                next.key_type.as_str()
            )));
        }
        if txn.get_for_update(&next_key, true)?.is_some()
            || txn.get_for_update(&version_key, true)?.is_some()
        {
            return Err(StorageError::Duplicate(format!(
                "key version {}/{}",
                next.key_type.as_str(),
                next.version
            )));
        }

        txn.put(&demoted_key, encode(demoted)?)?;
        txn.put(&version_key, next.key_id.as_bytes())?;
        txn.put(&next_key, encode(next)?)?;
        txn.commit()?;
        Ok(())
    }

    fn update_key(&self, expected: KeyStatus, key: &EncryptionKey) -> Result<(), StorageError> {
        let record_key = id_key(TAG_KEY, &key.key_id);
        let txn = self.txn();
        let stored: EncryptionKey = Self::locked_record(&txn, &record_key)?
            .ok_or_else(|| StorageError::Missing(format!("key {}", key.key_id)))?;
        if stored.status != expected {
            return Err(StorageError::Conflict(format!(
                "key {} is {}, expected {}",
                key.key_id,
                stored.status.as_str(),
                expected.as_str()
            )));
        }
        txn.put(&record_key, encode(key)?)?;
        txn.commit()?;
        Ok(())
    }

    fn get_key(&self, key_id: &str) -> Result<Option<EncryptionKey>, StorageError> {
        self.get_record(&id_key(TAG_KEY, key_id))
    }

    fn keys_of_type(&self, key_type: KeyType) -> Result<Vec<EncryptionKey>, StorageError> {
        let prefix = key_version_prefix(key_type);
        // Skip the bootstrap slot at version 0
        let start = key_version_key(key_type, 1);
        let mut ids = Vec::new();
        self.scan(&prefix, &start, |_, value| {
            ids.push(String::from_utf8_lossy(value).into_owned());
            Ok(true)
        })?;

        let mut keys = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_key(&id)? {
                Some(key) => keys.push(key),
                None => {
                    return Err(StorageError::Corruption(format!(
                        "version index points at missing key {}",
                        id
                    )))
                }
            }
        }
        Ok(keys)
    }
}

impl VaultStore for RocksStore {
    fn insert_entry(
        &self,
        entry: &VaultEntry,
        index_fingerprint: bool,
    ) -> Result<(), StorageError> {
        let record_key = id_key(TAG_ENTRY, &entry.token);
        let txn = self.txn();
        if txn.get_for_update(&record_key, true)?.is_some() {
            return Err(StorageError::Duplicate(format!("token {}", entry.token)));
        }
        if index_fingerprint {
            let slot = fingerprint_key(entry.context, &entry.payload_fingerprint);
            if txn.get_for_update(&slot, true)?.is_some() {
                return Err(StorageError::Duplicate(format!(
                    "{} fingerprint",
                    entry.context.as_str()
                )));
            }
            txn.put(&slot, entry.token.as_bytes())?;
        }
        txn.put(&record_key, encode(entry)?)?;
        txn.commit().map_err(|e| match StorageError::from(e) {
            StorageError::Conflict(msg) if index_fingerprint => StorageError::Duplicate(msg),
            other => other,
        })
    }

    fn get_entry(&self, token: &str) -> Result<Option<VaultEntry>, StorageError> {
        self.get_record(&id_key(TAG_ENTRY, token))
    }

    fn find_by_fingerprint(
        &self,
        context: TokenContext,
        fingerprint: &str,
    ) -> Result<Option<VaultEntry>, StorageError> {
        match self.db.get(fingerprint_key(context, fingerprint))? {
            Some(token) => self.get_entry(&String::from_utf8_lossy(&token)),
            None => Ok(None),
        }
    }

    fn swap_entry_key(
        &self,
        token: &str,
        expected_key_id: &str,
        new_key_id: &str,
        payload: &[u8],
    ) -> Result<(), StorageError> {
        let record_key = id_key(TAG_ENTRY, token);
        let txn = self.txn();
        let mut entry: VaultEntry = Self::locked_record(&txn, &record_key)?
            .ok_or_else(|| StorageError::Missing(format!("token {}", token)))?;
        if entry.key_id != expected_key_id {
            return Err(StorageError::Conflict(format!(
                "token {} moved to key {}",
                token, entry.key_id
            )));
        }
        entry.key_id = new_key_id.to_string();
        entry.encrypted_payload = payload.to_vec();
        txn.put(&record_key, encode(&entry)?)?;
        txn.commit()?;
        Ok(())
    }

    fn record_access(&self, token: &str, at: DateTime<Utc>) -> Result<VaultEntry, StorageError> {
        let record_key = id_key(TAG_ENTRY, token);
        let txn = self.txn();
        let mut entry: VaultEntry = Self::locked_record(&txn, &record_key)?
            .ok_or_else(|| StorageError::Missing(format!("token {}", token)))?;
        entry.access_count += 1;
        entry.last_accessed_at = Some(at);
        txn.put(&record_key, encode(&entry)?)?;
        txn.commit()?;
        Ok(entry)
    }

    fn entries_for_key(
        &self,
        key_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VaultEntry>, StorageError> {
        let prefix = [TAG_ENTRY];
        let start = match after {
            Some(token) => id_key(TAG_ENTRY, token),
            None => prefix.to_vec(),
        };
        let after_key = after.map(|t| id_key(TAG_ENTRY, t));
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        self.scan(&prefix, &start, |key, value| {
            if after_key.as_deref() == Some(key) {
                return Ok(true);
            }
            let entry: VaultEntry = decode(value)?;
            if entry.key_id == key_id {
                out.push(entry);
            }
            Ok(out.len() < limit)
        })?;
        Ok(out)
    }

    fn save_sweep(&self, checkpoint: &SweepCheckpoint) -> Result<(), StorageError> {
        let txn = self.txn();
        txn.put(id_key(TAG_SWEEP, &checkpoint.from_key_id), encode(checkpoint)?)?;
        txn.commit()?;
        Ok(())
    }

    fn load_sweep(&self, from_key_id: &str) -> Result<Option<SweepCheckpoint>, StorageError> {
        self.get_record(&id_key(TAG_SWEEP, from_key_id))
    }

    fn pending_sweeps(&self) -> Result<Vec<SweepCheckpoint>, StorageError> {
        let prefix = [TAG_SWEEP];
        let mut out = Vec::new();
        self.scan(&prefix, &prefix, |_, value| {
            let sweep: SweepCheckpoint = decode(value)?;
            if !sweep.completed {
                out.push(sweep);
            }
            Ok(true)
        })?;
        Ok(out)
    }
}
