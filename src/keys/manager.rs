// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Envelope key management.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ring::rand::SystemRandom;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditOutcome, AuditRecord, AuditTrail, EventType};
use crate::error::CustodyError;
use crate::identity::CallerIdentity;
use crate::security::{DataEncryptionKey, MasterKeyAuthority, SecurityError};
use crate::storage::{CustodyStore, StorageError};

use super::policy::KeyPolicy;
use super::types::{EncryptionKey, KeyStatus, KeyType};

/// Result of re-wrapping keys under the current master key.
#[derive(Debug, Default)]
pub struct RewrapResult {
    /// Number of keys successfully re-wrapped.
    pub rewrapped_count: usize,
    /// IDs of keys that failed.
    pub failed_keys: Vec<String>,
    /// Master key everything is now wrapped with.
    pub master_key_id: String,
}

impl RewrapResult {
    /// Returns true if every key was re-wrapped.
    pub fn is_complete(&self) -> bool {
        self.failed_keys.is_empty()
    }
}

fn authority_error(err: SecurityError) -> CustodyError {
    match err {
        SecurityError::AuthorityUnavailable(msg) | SecurityError::MasterKeyNotFound(msg) => {
            CustodyError::KeyUnavailable(msg)
        }
        other => CustodyError::Crypto(other),
    }
}

fn commit_error(err: StorageError) -> CustodyError {
    match err {
        StorageError::Conflict(msg) | StorageError::Duplicate(msg) => {
            CustodyError::ConcurrencyConflict(msg)
        }
        other => CustodyError::Storage(other),
    }
}

/// Manages data keys wrapped by an external master-key authority.
///
/// Key material is generated locally, wrapped immediately and stored
/// only in wrapped form. Every lifecycle change is recorded in the audit
/// trail before it is committed to the store.
pub struct KeyManager<S, M> {
    store: Arc<S>,
    authority: Arc<M>,
    audit: AuditTrail<S>,
    policy: KeyPolicy,
    rng: SystemRandom,
}

impl<S: CustodyStore, M: MasterKeyAuthority> KeyManager<S, M> {
    /// Creates a key manager.
    pub fn new(store: Arc<S>, authority: Arc<M>, audit: AuditTrail<S>, policy: KeyPolicy) -> Self {
        Self {
            store,
            authority,
            audit,
            policy,
            rng: SystemRandom::new(),
        }
    }

    /// Returns the lifecycle policy.
    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    fn stream(&self) -> &str {
        self.policy
            .audit_stream
            .as_deref()
            .unwrap_or_else(|| self.audit.default_stream())
    }

    /// Appends `record`, then runs `commit`.
    ///
    /// A failed commit is followed by a `rotation_failed` record.
    async fn audited_commit<F>(&self, record: AuditRecord, commit: F) -> Result<(), CustodyError>
    where
        F: FnOnce() -> Result<(), StorageError>,
    {
        let failure_template = record.clone();
        self.audit.append(self.stream(), record).await?;

        if let Err(e) = commit() {
            let failure = AuditRecord {
                event_type: EventType::RotationFailed,
                result: AuditOutcome::Error,
                description: e.to_string(),
                ..failure_template.clone()
            }
            .with_metadata("failed_event", failure_template.event_type.as_str())
            .with_metadata("action", failure_template.action);
            if let Err(audit_err) = self.audit.append(self.stream(), failure).await {
                error!(error = %audit_err, "could not record failed key commit");
            }
            return Err(commit_error(e));
        }
        Ok(())
    }

    /// Creates a new key of `key_type` and makes it active.
    ///
    /// The first key of a type is inserted directly (`key_created`).
    /// Otherwise the current active key is demoted to retiring in the
    /// same store transaction (`key_rotated`).
    ///
    /// # Errors
    ///
    /// [`CustodyError::ConcurrencyConflict`] if a retiring key of the type
    /// still exists or a concurrent rotation won.
    #[instrument(skip(self, caller), fields(key_type = key_type.as_str(), actor = %caller.actor_id))]
    pub async fn create_key(
        &self,
        key_type: KeyType,
        caller: &CallerIdentity,
    ) -> Result<EncryptionKey, CustodyError> {
        let existing = self.store.keys_of_type(key_type)?;
        let active = existing
            .iter()
            .find(|k| k.status == KeyStatus::Active)
            .cloned();
        if active.is_some() && existing.iter().any(|k| k.status == KeyStatus::Retiring) {
            return Err(CustodyError::ConcurrencyConflict(format!(
                "a {} rotation is still in progress",
                key_type.as_str()
            )));
        }
        let version = existing.last().map(|k| k.version + 1).unwrap_or(1);

        let key_id = Uuid::new_v4().to_string();
        let wrapped = {
            let dek = DataEncryptionKey::generate(&self.rng, key_id.clone())?;
            self.authority
                .wrap(dek.key())
                .await
                .map_err(authority_error)?
        };

        let now = Utc::now();
        let key = EncryptionKey {
            key_id: key_id.clone(),
            key_type,
            version,
            algorithm: key_type.algorithm(),
            wrapped_key_material: Some(wrapped.ciphertext),
            master_key_id: wrapped.master_key_id,
            status: KeyStatus::Active,
            created_at: now,
            activated_at: Some(now),
            retired_at: None,
            expires_at: None,
        };

        match active {
            None => {
                let record = AuditRecord::new(EventType::KeyCreated, caller, &key_id)
                    .with_action("create_key")
                    .with_metadata("key_type", key_type.as_str())
                    .with_metadata("version", version.to_string());
                self.audited_commit(record, || self.store.insert_key(&key))
                    .await?;
                info!(key_id = %key_id, version, "Key created");
            }
            Some(previous) => {
                let record = AuditRecord::new(EventType::KeyRotated, caller, &key_id)
                    .with_action("rotate_key")
                    .with_metadata("key_type", key_type.as_str())
                    .with_metadata("version", version.to_string())
                    .with_metadata("previous_key_id", previous.key_id.clone())
                    .with_metadata("previous_version", previous.version.to_string());
                let demoted = previous.to_retiring();
                self.audited_commit(record, || self.store.swap_active_key(&demoted, &key))
                    .await?;
                info!(
                    key_id = %key_id,
                    version,
                    previous_key_id = %previous.key_id,
                    "Key rotated"
                );
            }
        }

        Ok(key)
    }

    /// Returns the active key of `key_type`, creating the first one if none exists.
    pub async fn ensure_active_key(
        &self,
        key_type: KeyType,
        caller: &CallerIdentity,
    ) -> Result<EncryptionKey, CustodyError> {
        match self.get_active_key(key_type) {
            Ok(key) => Ok(key),
            Err(CustodyError::KeyUnavailable(_)) => match self.create_key(key_type, caller).await {
                // Lost a bootstrap race; the winner's key is active now
                Err(CustodyError::ConcurrencyConflict(_)) => self.get_active_key(key_type),
                other => other,
            },
            Err(e) => Err(e),
        }
    }

    /// Returns the active key of `key_type`.
    pub fn get_active_key(&self, key_type: KeyType) -> Result<EncryptionKey, CustodyError> {
        self.store
            .keys_of_type(key_type)?
            .into_iter()
            .rev()
            .find(|k| k.status == KeyStatus::Active)
            .ok_or_else(|| {
                CustodyError::KeyUnavailable(format!("no active {} key", key_type.as_str()))
            })
    }

    /// Returns a key by id. Retiring and retired keys are served for
    /// decryption; expired keys are not.
    pub fn get_key(&self, key_id: &str) -> Result<EncryptionKey, CustodyError> {
        let key = self
            .store
            .get_key(key_id)?
            .ok_or_else(|| CustodyError::NotFound(format!("key {}", key_id)))?;
        if !key.status.can_decrypt() {
            return Err(CustodyError::KeyUnavailable(format!(
                "key {} is expired",
                key_id
            )));
        }
        Ok(key)
    }

    /// Returns every key of `key_type`, oldest version first.
    pub fn list_keys(&self, key_type: KeyType) -> Result<Vec<EncryptionKey>, CustodyError> {
        Ok(self.store.keys_of_type(key_type)?)
    }

    /// Unwraps the material of `key` through the master-key authority.
    ///
    /// The returned DEK is zeroized on drop; callers must not keep it
    /// beyond the operation that needed it.
    pub async fn unwrap_key(&self, key: &EncryptionKey) -> Result<DataEncryptionKey, CustodyError> {
        let material = match (&key.wrapped_key_material, key.status.can_decrypt()) {
            (Some(material), true) => material,
            _ => {
                return Err(CustodyError::KeyUnavailable(format!(
                    "key {} has no usable material",
                    key.key_id
                )))
            }
        };
        let plaintext = self
            .authority
            .unwrap(material, &key.master_key_id)
            .await
            .map_err(authority_error)?;
        Ok(DataEncryptionKey::from_slice(&plaintext, key.key_id.clone())?)
    }

    /// Moves a retiring key to retired once no vault entry references it.
    ///
    /// Sets `expires_at` to now plus the retired-key grace period.
    #[instrument(skip(self, caller), fields(actor = %caller.actor_id))]
    pub async fn retire_key(
        &self,
        key_id: &str,
        caller: &CallerIdentity,
    ) -> Result<EncryptionKey, CustodyError> {
        let key = self
            .store
            .get_key(key_id)?
            .ok_or_else(|| CustodyError::NotFound(format!("key {}", key_id)))?;
        if !key.status.can_transition_to(KeyStatus::Retired) {
            return Err(CustodyError::Validation(format!(
                "key {} is {}, only retiring keys can be retired",
                key_id,
                key.status.as_str()
            )));
        }
        if self.store.key_in_use(key_id)? {
            return Err(CustodyError::Validation(format!(
                "key {} is still referenced by vault entries",
                key_id
            )));
        }

        let retired = key.to_retired(Utc::now(), self.policy.retired_key_grace);
        let record = AuditRecord::new(EventType::KeyRetired, caller, key_id)
            .with_action("retire_key")
            .with_metadata("key_type", key.key_type.as_str())
            .with_metadata("version", key.version.to_string());
        self.audited_commit(record, || {
            self.store.update_key(KeyStatus::Retiring, &retired)
        })
        .await?;

        info!(key_id = %key_id, expires_at = ?retired.expires_at, "Key retired");
        Ok(retired)
    }

    /// Expires a retired key that no vault entry references, discarding
    /// its wrapped material. Expired is terminal.
    #[instrument(skip(self, caller), fields(actor = %caller.actor_id))]
    pub async fn expire_key(
        &self,
        key_id: &str,
        caller: &CallerIdentity,
    ) -> Result<EncryptionKey, CustodyError> {
        let key = self
            .store
            .get_key(key_id)?
            .ok_or_else(|| CustodyError::NotFound(format!("key {}", key_id)))?;
        if !key.status.can_transition_to(KeyStatus::Expired) {
            return Err(CustodyError::Validation(format!(
                "key {} is {}, only retired keys can expire",
                key_id,
                key.status.as_str()
            )));
        }
        if self.store.key_in_use(key_id)? {
            return Err(CustodyError::Validation(format!(
                "key {} is still referenced by vault entries",
                key_id
            )));
        }

        let expired = key.to_expired();
        let record = AuditRecord::new(EventType::KeyExpired, caller, key_id)
            .with_action("expire_key")
            .with_metadata("key_type", key.key_type.as_str())
            .with_metadata("version", key.version.to_string());
        self.audited_commit(record, || {
            self.store.update_key(KeyStatus::Retired, &expired)
        })
        .await?;

        warn!(key_id = %key_id, "Key expired, material discarded");
        Ok(expired)
    }

    /// Expires every retired key whose grace period ended by `now`.
    ///
    /// Keys still referenced are skipped. Returns the expired key ids.
    pub async fn expire_due_keys(
        &self,
        now: DateTime<Utc>,
        caller: &CallerIdentity,
    ) -> Result<Vec<String>, CustodyError> {
        let mut expired = Vec::new();
        for key_type in [KeyType::TokenizationData, KeyType::Fingerprint] {
            for key in self.store.keys_of_type(key_type)? {
                if !key.is_due_for_expiry(now) {
                    continue;
                }
                if self.store.key_in_use(&key.key_id)? {
                    warn!(key_id = %key.key_id, "Key past grace period is still referenced");
                    continue;
                }
                self.expire_key(&key.key_id, caller).await?;
                expired.push(key.key_id);
            }
        }
        Ok(expired)
    }

    /// Re-wraps every live key not yet under the authority's current master key.
    ///
    /// Used after the master key itself is rotated. Keys that fail keep
    /// their previous wrapping.
    #[instrument(skip(self))]
    pub async fn rewrap_all(&self) -> Result<RewrapResult, CustodyError> {
        let master_key_id = self.authority.master_key_id();
        let mut result = RewrapResult {
            master_key_id: master_key_id.clone(),
            ..Default::default()
        };

        for key_type in [KeyType::TokenizationData, KeyType::Fingerprint] {
            for key in self.store.keys_of_type(key_type)? {
                if !key.status.can_decrypt() || key.master_key_id == master_key_id {
                    continue;
                }
                match self.rewrap_key(&key).await {
                    Ok(()) => result.rewrapped_count += 1,
                    Err(e) => {
                        error!(key_id = %key.key_id, error = %e, "Failed to re-wrap key");
                        result.failed_keys.push(key.key_id);
                    }
                }
            }
        }

        info!(
            rewrapped = result.rewrapped_count,
            failed = result.failed_keys.len(),
            "Key re-wrap complete"
        );
        Ok(result)
    }

    async fn rewrap_key(&self, key: &EncryptionKey) -> Result<(), CustodyError> {
        let dek = self.unwrap_key(key).await?;
        let wrapped = self
            .authority
            .wrap(dek.key())
            .await
            .map_err(authority_error)?;
        drop(dek);

        let mut updated = key.clone();
        updated.wrapped_key_material = Some(wrapped.ciphertext);
        updated.master_key_id = wrapped.master_key_id;
        self.store
            .update_key(key.status, &updated)
            .map_err(commit_error)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::audit::{AuditConfig, AuditQuery};
    use crate::identity::ActorType;
    use crate::security::{LocalKms, PayloadCipher};
    use crate::storage::{AuditStore, KeyStore, MemoryStore, VaultStore};
    use crate::vault::{TokenContext, VaultEntry};

    struct Fixture {
        store: Arc<MemoryStore>,
        kms: Arc<LocalKms>,
        audit: AuditTrail<MemoryStore>,
        manager: KeyManager<MemoryStore, LocalKms>,
    }

    fn fixture(policy: KeyPolicy) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let kms = Arc::new(LocalKms::generate().unwrap());
        let audit = AuditTrail::new(Arc::clone(&store), AuditConfig::default());
        let manager = KeyManager::new(Arc::clone(&store), Arc::clone(&kms), audit.clone(), policy);
        Fixture {
            store,
            kms,
            audit,
            manager,
        }
    }

    fn admin() -> CallerIdentity {
        CallerIdentity::new("key-admin", ActorType::User)
    }

    fn events_of(audit: &AuditTrail<MemoryStore>, event_type: EventType) -> usize {
        audit
            .query(&AuditQuery::new().event_type(event_type))
            .unwrap()
            .len()
    }

    fn reference(store: &MemoryStore, key_id: &str) {
        let entry = VaultEntry {
            token: "tok_ref".into(),
            context: TokenContext::Generic,
            encrypted_payload: vec![0; 32],
            payload_fingerprint: "fp".into(),
            masked_value: "*".into(),
            key_id: key_id.into(),
            created_at: Utc::now(),
            last_accessed_at: None,
            access_count: 0,
        };
        store.insert_entry(&entry, false).unwrap();
    }

    #[tokio::test]
    async fn test_first_key_is_created_active() {
        let f = fixture(KeyPolicy::default());
        let key = f
            .manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();

        assert_eq!(key.version, 1);
        assert_eq!(key.status, KeyStatus::Active);
        assert_eq!(key.master_key_id, f.kms.master_key_id());
        assert_eq!(
            f.manager.get_active_key(KeyType::TokenizationData).unwrap().key_id,
            key.key_id
        );
        assert_eq!(events_of(&f.audit, EventType::KeyCreated), 1);
    }

    #[tokio::test]
    async fn test_no_active_key() {
        let f = fixture(KeyPolicy::default());
        assert!(matches!(
            f.manager.get_active_key(KeyType::Fingerprint),
            Err(CustodyError::KeyUnavailable(_))
        ));
        assert!(matches!(
            f.manager.get_key("missing"),
            Err(CustodyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rotation_demotes_previous() {
        let f = fixture(KeyPolicy::default());
        let v1 = f
            .manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();
        let v2 = f
            .manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();

        assert_eq!(v2.version, 2);
        assert_eq!(f.manager.get_key(&v1.key_id).unwrap().status, KeyStatus::Retiring);
        assert_eq!(
            f.manager.get_active_key(KeyType::TokenizationData).unwrap().key_id,
            v2.key_id
        );

        let rotated = f
            .audit
            .query(&AuditQuery::new().event_type(EventType::KeyRotated))
            .unwrap();
        assert_eq!(rotated.len(), 1);
        assert_eq!(
            rotated[0].metadata.get("previous_key_id"),
            Some(&v1.key_id)
        );
    }

    #[tokio::test]
    async fn test_rotation_blocked_while_retiring() {
        let f = fixture(KeyPolicy::default());
        f.manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();
        f.manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();

        let result = f
            .manager
            .create_key(KeyType::TokenizationData, &admin())
            .await;
        assert!(matches!(result, Err(CustodyError::ConcurrencyConflict(_))));
        assert_eq!(f.manager.list_keys(KeyType::TokenizationData).unwrap().len(), 2);
        // Key types rotate independently
        f.manager
            .create_key(KeyType::Fingerprint, &admin())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unaudited_rotation_is_not_committed() {
        let f = fixture(KeyPolicy::default());
        f.store.set_audit_available(false);

        let result = f
            .manager
            .create_key(KeyType::TokenizationData, &admin())
            .await;
        assert!(matches!(result, Err(CustodyError::AuditWriteFailure(_))));
        assert!(f.manager.list_keys(KeyType::TokenizationData).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_commit_is_audited() {
        let f = fixture(KeyPolicy::default());
        let v1 = f
            .manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();

        f.store.set_key_writes_available(false);
        let result = f
            .manager
            .create_key(KeyType::TokenizationData, &admin())
            .await;
        assert!(matches!(
            result,
            Err(CustodyError::Storage(StorageError::Unavailable(_)))
        ));

        assert_eq!(events_of(&f.audit, EventType::KeyRotated), 1);
        assert_eq!(events_of(&f.audit, EventType::RotationFailed), 1);
        assert_eq!(f.manager.get_key(&v1.key_id).unwrap().status, KeyStatus::Active);
        assert!(f.audit.verify_integrity("custody", None, None).unwrap().valid);
    }

    #[tokio::test]
    async fn test_unwrap_key_material() {
        let f = fixture(KeyPolicy::default());
        let key = f
            .manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();

        let dek = f.manager.unwrap_key(&key).await.unwrap();
        let sealed = PayloadCipher::new(&dek).seal(b"secret", b"aad").unwrap();
        drop(dek);

        let again = f.manager.unwrap_key(&key).await.unwrap();
        assert_eq!(again.id(), key.key_id);
        assert_eq!(
            PayloadCipher::new(&again).open(&sealed, b"aad").unwrap().as_slice(),
            b"secret"
        );
    }

    #[tokio::test]
    async fn test_retire_and_expire() {
        let f = fixture(KeyPolicy::default().with_retired_key_grace(Duration::days(30)));
        let v1 = f
            .manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();

        // Active keys cannot be retired or expired
        assert!(matches!(
            f.manager.retire_key(&v1.key_id, &admin()).await,
            Err(CustodyError::Validation(_))
        ));
        assert!(matches!(
            f.manager.expire_key(&v1.key_id, &admin()).await,
            Err(CustodyError::Validation(_))
        ));

        f.manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();
        let retired = f.manager.retire_key(&v1.key_id, &admin()).await.unwrap();
        assert_eq!(retired.status, KeyStatus::Retired);
        let expires_at = retired.expires_at.unwrap();
        assert!(expires_at > Utc::now() + Duration::days(29));

        // Retired keys still decrypt
        assert!(f.manager.unwrap_key(&retired).await.is_ok());

        // Each step runs once
        assert!(matches!(
            f.manager.retire_key(&v1.key_id, &admin()).await,
            Err(CustodyError::Validation(_))
        ));

        let expired = f.manager.expire_key(&v1.key_id, &admin()).await.unwrap();
        assert!(expired.wrapped_key_material.is_none());
        assert!(matches!(
            f.manager.expire_key(&v1.key_id, &admin()).await,
            Err(CustodyError::Validation(_))
        ));
        assert!(matches!(
            f.manager.get_key(&v1.key_id),
            Err(CustodyError::KeyUnavailable(_))
        ));
        assert!(matches!(
            f.manager.unwrap_key(&expired).await,
            Err(CustodyError::KeyUnavailable(_))
        ));
        assert_eq!(events_of(&f.audit, EventType::KeyRetired), 1);
        assert_eq!(events_of(&f.audit, EventType::KeyExpired), 1);
    }

    #[tokio::test]
    async fn test_referenced_key_cannot_retire() {
        let f = fixture(KeyPolicy::default());
        let v1 = f
            .manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();
        reference(&f.store, &v1.key_id);
        f.manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();

        assert!(matches!(
            f.manager.retire_key(&v1.key_id, &admin()).await,
            Err(CustodyError::Validation(_))
        ));
        assert_eq!(f.manager.get_key(&v1.key_id).unwrap().status, KeyStatus::Retiring);
    }

    #[tokio::test]
    async fn test_expire_due_keys() {
        let f = fixture(KeyPolicy::default().with_retired_key_grace(Duration::hours(1)));
        let v1 = f
            .manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();
        f.manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();
        f.manager.retire_key(&v1.key_id, &admin()).await.unwrap();

        let none = f.manager.expire_due_keys(Utc::now(), &admin()).await.unwrap();
        assert!(none.is_empty());

        let later = Utc::now() + Duration::hours(2);
        let expired = f.manager.expire_due_keys(later, &admin()).await.unwrap();
        assert_eq!(expired, vec![v1.key_id.clone()]);
        assert_eq!(
            f.store.get_key(&v1.key_id).unwrap().unwrap().status,
            KeyStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_rewrap_after_master_rotation() {
        let f = fixture(KeyPolicy::default());
        let data = f
            .manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();
        f.manager
            .create_key(KeyType::Fingerprint, &admin())
            .await
            .unwrap();
        let old_master = f.kms.master_key_id();

        f.kms.rotate_master("kek-2").unwrap();
        let result = f.manager.rewrap_all().await.unwrap();
        assert!(result.is_complete());
        assert_eq!(result.rewrapped_count, 2);
        assert_eq!(result.master_key_id, "kek-2");

        f.kms.drop_master(&old_master).unwrap();
        let rewrapped = f.manager.get_key(&data.key_id).unwrap();
        assert_eq!(rewrapped.master_key_id, "kek-2");
        assert!(f.manager.unwrap_key(&rewrapped).await.is_ok());

        // Nothing left to do
        assert_eq!(f.manager.rewrap_all().await.unwrap().rewrapped_count, 0);
    }

    #[tokio::test]
    async fn test_ensure_active_key_is_idempotent() {
        let f = fixture(KeyPolicy::default());
        let a = f
            .manager
            .ensure_active_key(KeyType::Fingerprint, &admin())
            .await
            .unwrap();
        let b = f
            .manager
            .ensure_active_key(KeyType::Fingerprint, &admin())
            .await
            .unwrap();
        assert_eq!(a.key_id, b.key_id);
        assert_eq!(events_of(&f.audit, EventType::KeyCreated), 1);
    }

    #[tokio::test]
    async fn test_key_events_use_policy_stream() {
        let f = fixture(KeyPolicy::default().with_audit_stream("keys"));
        f.manager
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();
        assert_eq!(f.store.read_events("keys", 0, None).unwrap().len(), 1);
        assert!(f.store.read_events("custody", 0, None).unwrap().is_empty());
    }
}
