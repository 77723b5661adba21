// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! In-memory store.
//!
//! All tables sit behind one `RwLock`, so every write is atomic with
//! respect to every other. Audit and key writes can be switched off to
//! exercise fail-closed paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::audit::{AuditEvent, Checkpoint};
use crate::keys::{EncryptionKey, KeyStatus, KeyType};
use crate::vault::{SweepCheckpoint, TokenContext, VaultEntry};

use super::{AuditStore, KeyStore, StorageError, VaultStore};

#[derive(Default)]
struct Tables {
    events: BTreeMap<(String, u64), AuditEvent>,
    checkpoints: BTreeMap<(String, u64), Checkpoint>,
    keys: HashMap<String, EncryptionKey>,
    key_versions: BTreeMap<(KeyType, u32), String>,
    entries: BTreeMap<String, VaultEntry>,
    fingerprints: HashMap<(TokenContext, String), String>,
    sweeps: BTreeMap<String, SweepCheckpoint>,
}

impl Tables {
    fn stream_range<'a, V>(
        map: &'a BTreeMap<(String, u64), V>,
        stream_id: &str,
        from: u64,
        to: u64,
    ) -> impl DoubleEndedIterator<Item = &'a V> + 'a {
        map.range((stream_id.to_string(), from)..=(stream_id.to_string(), to))
            .map(|(_, v)| v)
    }
}

/// Store backed by in-process maps.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    audit_available: AtomicBool,
    audit_contended: AtomicBool,
    key_writes_available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            audit_available: AtomicBool::new(true),
            audit_contended: AtomicBool::new(false),
            key_writes_available: AtomicBool::new(true),
        }
    }

    /// Makes audit inserts fail with `Unavailable` while `false`.
    ///
    /// Reads keep working.
    pub fn set_audit_available(&self, available: bool) {
        self.audit_available.store(available, Ordering::SeqCst);
    }

    /// Makes every audit insert lose its height race while `true`.
    pub fn set_audit_contended(&self, contended: bool) {
        self.audit_contended.store(contended, Ordering::SeqCst);
    }

    /// Makes key writes fail with `Unavailable` while `false`.
    pub fn set_key_writes_available(&self, available: bool) {
        self.key_writes_available.store(available, Ordering::SeqCst);
    }

    /// Returns the number of vault entries.
    pub fn entry_count(&self) -> usize {
        self.tables.read().entries.len()
    }

    fn check_audit_available(&self) -> Result<(), StorageError> {
        if self.audit_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("audit table offline".into()))
        }
    }

    fn check_key_writes_available(&self) -> Result<(), StorageError> {
        if self.key_writes_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("key table offline".into()))
        }
    }

    /// Rewrites a stored event in place, bypassing append-only rules.
    #[cfg(test)]
    pub(crate) fn tamper_event(&self, stream_id: &str, height: u64, f: impl FnOnce(&mut AuditEvent)) {
        if let Some(event) = self
            .tables
            .write()
            .events
            .get_mut(&(stream_id.to_string(), height))
        {
            f(event);
        }
    }

    /// Removes a stored event, bypassing append-only rules.
    #[cfg(test)]
    pub(crate) fn remove_event(&self, stream_id: &str, height: u64) {
        self.tables
            .write()
            .events
            .remove(&(stream_id.to_string(), height));
    }
}

impl AuditStore for MemoryStore {
    fn last_event(&self, stream_id: &str) -> Result<Option<AuditEvent>, StorageError> {
        let tables = self.tables.read();
        let last = Tables::stream_range(&tables.events, stream_id, 0, u64::MAX)
            .next_back()
            .cloned();
        Ok(last)
    }

    fn insert_event(&self, event: &AuditEvent) -> Result<(), StorageError> {
        self.check_audit_available()?;
        if self.audit_contended.load(Ordering::SeqCst) {
            return Err(StorageError::Duplicate(format!(
                "event {}@{}",
                event.stream_id, event.block_height
            )));
        }
        let mut tables = self.tables.write();
        let key = (event.stream_id.clone(), event.block_height);
        if tables.events.contains_key(&key) {
            return Err(StorageError::Duplicate(format!(
                "event {}/{}",
                event.stream_id, event.block_height
            )));
        }
        tables.events.insert(key, event.clone());
        Ok(())
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
        let tables = self.tables.read();
        Ok(Tables::stream_range(&tables.events, stream_id, from, to)
            .cloned()
            .collect())
    }

    fn streams(&self) -> Result<Vec<String>, StorageError> {
        let tables = self.tables.read();
        let mut streams: Vec<String> = Vec::new();
        for (stream, _) in tables.events.keys() {
            if streams.last() != Some(stream) {
                streams.push(stream.clone());
            }
        }
        Ok(streams)
    }

    fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        self.check_audit_available()?;
        let mut tables = self.tables.write();
        let key = (checkpoint.stream_id.clone(), checkpoint.height);
        if tables.checkpoints.contains_key(&key) {
            return Err(StorageError::Duplicate(format!(
                "checkpoint {}/{}",
                checkpoint.stream_id, checkpoint.height
            )));
        }
        tables.checkpoints.insert(key, checkpoint.clone());
        Ok(())
    }

    fn checkpoints(&self, stream_id: &str) -> Result<Vec<Checkpoint>, StorageError> {
        let tables = self.tables.read();
        Ok(
            Tables::stream_range(&tables.checkpoints, stream_id, 0, u64::MAX)
                .cloned()
                .collect(),
        )
    }
}

impl KeyStore for MemoryStore {
    fn insert_key(&self, key: &EncryptionKey) -> Result<(), StorageError> {
        self.check_key_writes_available()?;
        let mut tables = self.tables.write();
        if tables.keys.contains_key(&key.key_id) {
            return Err(StorageError::Duplicate(format!("key {}", key.key_id)));
        }
        if tables.key_versions.contains_key(&(key.key_type, key.version)) {
            return Err(StorageError::Duplicate(format!(
                "key version {}/{}",
                key.key_type.as_str(),
                key.version
            )));
        }
        if key.status == KeyStatus::Active
            && tables
                .keys
                .values()
                .any(|k| k.key_type == key.key_type && k.status == KeyStatus::Active)
        {
            return Err(StorageError::Duplicate(format!(
                "active {} key",
                key.key_type.as_str()
            )));
        }
        tables
            .key_versions
            .insert((key.key_type, key.version), key.key_id.clone());
        tables.keys.insert(key.key_id.clone(), key.clone());
        Ok(())
    }

    fn swap_active_key(
        &self,
        demoted: &EncryptionKey,
        next: &EncryptionKey,
    ) -> Result<(), StorageError> {
        self.check_key_writes_available()?;
        let mut tables = self.tables.write();
        match tables.keys.get(&demoted.key_id) {
            Some(stored) if stored.status == KeyStatus::Active => {}
            Some(_) => {
                return Err(StorageError::Conflict(format!(
                    "key {} is no longer active",
                    demoted.key_id
                )))
            }
            None => return Err(StorageError::Missing(format!("key {}", demoted.key_id))),
        }
        if tables
            .keys
            .values()
            .any(|k| k.key_type == next.key_type && k.status == KeyStatus::Retiring)
        {
            return Err(StorageError::Conflict(format!(
                "a {} key is still retiring",
                next.key_type.as_str()
            )));
        }
        if tables.keys.contains_key(&next.key_id)
            || tables.key_versions.contains_key(&(next.key_type, next.version))
        {
            return Err(StorageError::Duplicate(format!(
                "key version {}/{}",
                next.key_type.as_str(),
                next.version
            )));
        }

        tables.keys.insert(demoted.key_id.clone(), demoted.clone());
        tables
            .key_versions
            .insert((next.key_type, next.version), next.key_id.clone());
        tables.keys.insert(next.key_id.clone(), next.clone());
        Ok(())
    }

    fn update_key(&self, expected: KeyStatus, key: &EncryptionKey) -> Result<(), StorageError> {
        self.check_key_writes_available()?;
        let mut tables = self.tables.write();
        let stored = tables
            .keys
            .get_mut(&key.key_id)
            .ok_or_else(|| StorageError::Missing(format!("key {}", key.key_id)))?;
        if stored.status != expected {
            return Err(StorageError::Conflict(format!(
                "key {} is {}, expected {}",
                key.key_id,
                stored.status.as_str(),
                expected.as_str()
            )));
        }
        *stored = key.clone();
        Ok(())
    }

    fn get_key(&self, key_id: &str) -> Result<Option<EncryptionKey>, StorageError> {
        Ok(self.tables.read().keys.get(key_id).cloned())
    }

    fn keys_of_type(&self, key_type: KeyType) -> Result<Vec<EncryptionKey>, StorageError> {
        let tables = self.tables.read();
        Ok(tables
            .key_versions
            .range((key_type, 0)..=(key_type, u32::MAX))
            .filter_map(|(_, id)| tables.keys.get(id).cloned())
            .collect())
    }
}

impl VaultStore for MemoryStore {
    fn insert_entry(
        &self,
        entry: &VaultEntry,
        index_fingerprint: bool,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        if tables.entries.contains_key(&entry.token) {
            return Err(StorageError::Duplicate(format!("token {}", entry.token)));
        }
        let slot = (entry.context, entry.payload_fingerprint.clone());
        if index_fingerprint {
            if tables.fingerprints.contains_key(&slot) {
                return Err(StorageError::Duplicate(format!(
                    "{} fingerprint",
                    entry.context.as_str()
                )));
            }
            tables.fingerprints.insert(slot, entry.token.clone());
        }
        tables.entries.insert(entry.token.clone(), entry.clone());
        Ok(())
    }

    fn get_entry(&self, token: &str) -> Result<Option<VaultEntry>, StorageError> {
        Ok(self.tables.read().entries.get(token).cloned())
    }

    fn find_by_fingerprint(
        &self,
        context: TokenContext,
        fingerprint: &str,
    ) -> Result<Option<VaultEntry>, StorageError> {
        let tables = self.tables.read();
        Ok(tables
            .fingerprints
            .get(&(context, fingerprint.to_string()))
            .and_then(|token| tables.entries.get(token))
            .cloned())
    }

    fn swap_entry_key(
        &self,
        token: &str,
        expected_key_id: &str,
        new_key_id: &str,
        payload: &[u8],
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        let entry = tables
            .entries
            .get_mut(token)
            .ok_or_else(|| StorageError::Missing(format!("token {}", token)))?;
        if entry.key_id != expected_key_id {
            return Err(StorageError::Conflict(format!(
                "token {} moved to key {}",
                token, entry.key_id
            )));
        }
        entry.key_id = new_key_id.to_string();
        entry.encrypted_payload = payload.to_vec();
        Ok(())
    }

    fn record_access(&self, token: &str, at: DateTime<Utc>) -> Result<VaultEntry, StorageError> {
        let mut tables = self.tables.write();
        let entry = tables
            .entries
            .get_mut(token)
            .ok_or_else(|| StorageError::Missing(format!("token {}", token)))?;
        entry.access_count += 1;
        entry.last_accessed_at = Some(at);
        Ok(entry.clone())
    }

    fn entries_for_key(
        &self,
        key_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VaultEntry>, StorageError> {
        use std::ops::Bound;

        let tables = self.tables.read();
        let lower = match after {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Unbounded,
        };
        Ok(tables
            .entries
            .range((lower, Bound::Unbounded))
            .map(|(_, entry)| entry)
            .filter(|entry| entry.key_id == key_id)
            .take(limit)
            .cloned()
            .collect())
    }

    fn save_sweep(&self, checkpoint: &SweepCheckpoint) -> Result<(), StorageError> {
        self.tables
            .write()
            .sweeps
            .insert(checkpoint.from_key_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn load_sweep(&self, from_key_id: &str) -> Result<Option<SweepCheckpoint>, StorageError> {
        Ok(self.tables.read().sweeps.get(from_key_id).cloned())
    }

    fn pending_sweeps(&self) -> Result<Vec<SweepCheckpoint>, StorageError> {
        Ok(self
            .tables
            .read()
            .sweeps
            .values()
            .filter(|s| !s.completed)
            .cloned()
            .collect())
    }
}



#[cfg(test)]
mod tests {
    use super::fixtures::event;
    use super::*;

    #[test]
    fn test_audit_contract() {
        contract::audit_uniqueness(&MemoryStore::new());
    }

    #[test]
    fn test_key_contract() {
        contract::key_rotation(&MemoryStore::new());
    }

    #[test]
    fn test_vault_contract() {
        contract::vault_entries(&MemoryStore::new());
    }

    #[test]
    fn test_sweep_contract() {
        contract::sweeps(&MemoryStore::new());
    }

    #[test]
    fn test_audit_unavailable() {
        let store = MemoryStore::new();
        store.set_audit_available(false);
        assert!(matches!(
            store.insert_event(&event("s", 0)),
            Err(StorageError::Unavailable(_))
        ));
        assert!(store.read_events("s", 0, None).unwrap().is_empty());

        store.set_audit_available(true);
        store.insert_event(&event("s", 0)).unwrap();
    }

    #[test]
    fn test_audit_contended() {
        let store = MemoryStore::new();
        store.set_audit_contended(true);
        assert!(matches!(
            store.insert_event(&event("s", 0)),
            Err(StorageError::Duplicate(_))
        ));
        store.set_audit_contended(false);
        store.insert_event(&event("s", 0)).unwrap();
    }

    #[test]
    fn test_last_event_is_highest() {
        let store = MemoryStore::new();
        assert!(store.last_event("s").unwrap().is_none());
        for height in 0..3 {
            store.insert_event(&event("s", height)).unwrap();
        }
        store.insert_event(&event("t", 7)).unwrap();
        assert_eq!(store.last_event("s").unwrap().unwrap().block_height, 2);
        assert_eq!(store.last_event("t").unwrap().unwrap().block_height, 7);
    }
}
