// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The tokenization vault.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use ring::rand::SystemRandom;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use crate::audit::{AuditEvent, AuditOutcome, AuditRecord, AuditTrail, EventType};
use crate::error::CustodyError;
use crate::identity::CallerIdentity;
use crate::keys::{EncryptionKey, KeyManager, KeyStatus, KeyType};
use crate::security::{keyed_fingerprint, MasterKeyAuthority, PayloadCipher};
use crate::storage::{CustodyStore, StorageError};

use super::config::{DedupPolicy, SweepMode, VaultConfig};
use super::context::TokenContext;
use super::entry::{
    generate_token, is_well_formed_token, payload_aad, SweepCheckpoint, TokenizeResult, VaultEntry,
};
use super::policy::AuthorizationPolicy;
use super::sweep::{SweepHandle, SweepReport};

const SWEEP_COMPONENT: &str = "reencryption-sweep";

/// Audit target recorded for input that is not shaped like a token.
const MALFORMED_TOKEN: &str = "malformed";

/// Returns `token` if it is shaped like a token, else a fixed marker.
///
/// Callers sometimes paste raw values into the token field; those must
/// not reach the ledger or the logs.
fn token_label(token: &str) -> &str {
    if is_well_formed_token(token) {
        token
    } else {
        MALFORMED_TOKEN
    }
}

/// Converts sensitive values into opaque tokens and back.
///
/// Plaintext exists only inside `tokenize` and `detokenize`; the store
/// sees ciphertext, a keyed fingerprint and a masked form. Every
/// detokenize outcome is in the audit trail before the caller sees it.
pub struct TokenVault<S, M> {
    store: Arc<S>,
    keys: Arc<KeyManager<S, M>>,
    audit: AuditTrail<S>,
    policy: Arc<dyn AuthorizationPolicy>,
    config: VaultConfig,
    rng: SystemRandom,
}

impl<S, M> Clone for TokenVault<S, M> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            keys: Arc::clone(&self.keys),
            audit: self.audit.clone(),
            policy: Arc::clone(&self.policy),
            config: self.config.clone(),
            rng: self.rng.clone(),
        }
    }
}

impl<S: CustodyStore, M: MasterKeyAuthority> TokenVault<S, M> {
    /// Creates a vault.
    pub fn new(
        store: Arc<S>,
        keys: Arc<KeyManager<S, M>>,
        audit: AuditTrail<S>,
        policy: Arc<dyn AuthorizationPolicy>,
        config: VaultConfig,
    ) -> Self {
        Self {
            store,
            keys,
            audit,
            policy,
            config,
            rng: SystemRandom::new(),
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Returns the key manager the vault encrypts with.
    pub fn keys(&self) -> &KeyManager<S, M> {
        &self.keys
    }

    fn stream(&self) -> &str {
        self.config
            .audit_stream
            .as_deref()
            .unwrap_or_else(|| self.audit.default_stream())
    }

    /// Appends `record`; any failure to commit it is an audit write failure.
    async fn append_or_fail(&self, record: AuditRecord) -> Result<AuditEvent, CustodyError> {
        self.audit
            .append(self.stream(), record)
            .await
            .map_err(|e| match e {
                CustodyError::AuditWriteFailure(reason) => CustodyError::AuditWriteFailure(reason),
                other => CustodyError::AuditWriteFailure(other.to_string()),
            })
    }

    /// Makes sure an active data key and fingerprint key exist.
    pub async fn initialize(&self, caller: &CallerIdentity) -> Result<(), CustodyError> {
        let data = self
            .keys
            .ensure_active_key(KeyType::TokenizationData, caller)
            .await?;
        let fingerprint = self
            .keys
            .ensure_active_key(KeyType::Fingerprint, caller)
            .await?;
        info!(
            data_key = %data.key_id,
            fingerprint_key = %fingerprint.key_id,
            "Vault initialized"
        );
        Ok(())
    }

    /// Tokenizes `plaintext` as a value of `context`.
    ///
    /// Under [`DedupPolicy::PerContext`] a value already in the vault
    /// returns its existing token. Either way a `tokenize` event naming
    /// only the token is appended.
    ///
    /// # Errors
    ///
    /// - [`CustodyError::Validation`] if the value is too long or malformed
    /// - [`CustodyError::KeyUnavailable`] before [`initialize`](Self::initialize)
    #[instrument(skip(self, plaintext, caller), fields(context = context.as_str(), actor = %caller.actor_id))]
    pub async fn tokenize(
        &self,
        plaintext: &str,
        context: TokenContext,
        caller: &CallerIdentity,
    ) -> Result<TokenizeResult, CustodyError> {
        if plaintext.len() > self.config.max_plaintext_len {
            return Err(CustodyError::Validation(format!(
                "value exceeds {} bytes",
                self.config.max_plaintext_len
            )));
        }
        let normalized = context.normalize(plaintext)?;

        let fingerprint = {
            let key = self.keys.get_active_key(KeyType::Fingerprint)?;
            let dek = self.keys.unwrap_key(&key).await?;
            keyed_fingerprint(&dek, context.as_str(), normalized.as_bytes())
        };

        let dedup = self.config.dedup == DedupPolicy::PerContext;
        if dedup {
            if let Some(existing) = self.store.find_by_fingerprint(context, &fingerprint)? {
                return self.tokenized(existing, caller, true).await;
            }
        }

        let data_key = self.keys.get_active_key(KeyType::TokenizationData)?;
        let token = generate_token(&self.rng)?;
        let encrypted_payload = {
            let dek = self.keys.unwrap_key(&data_key).await?;
            PayloadCipher::new(&dek).seal(normalized.as_bytes(), &payload_aad(&token, context))?
        };

        let entry = VaultEntry {
            token,
            context,
            encrypted_payload,
            payload_fingerprint: fingerprint,
            masked_value: self.config.masking_rule(context).apply(context, &normalized),
            key_id: data_key.key_id,
            created_at: Utc::now(),
            last_accessed_at: None,
            access_count: 0,
        };

        match self.store.insert_entry(&entry, dedup) {
            Ok(()) => self.tokenized(entry, caller, false).await,
            Err(StorageError::Duplicate(reason)) if dedup => {
                // A concurrent call stored the same value first
                match self
                    .store
                    .find_by_fingerprint(context, &entry.payload_fingerprint)?
                {
                    Some(existing) => self.tokenized(existing, caller, true).await,
                    None => Err(CustodyError::ConcurrencyConflict(reason)),
                }
            }
            Err(StorageError::Duplicate(reason)) => Err(CustodyError::ConcurrencyConflict(reason)),
            Err(e) => Err(e.into()),
        }
    }

    async fn tokenized(
        &self,
        entry: VaultEntry,
        caller: &CallerIdentity,
        deduplicated: bool,
    ) -> Result<TokenizeResult, CustodyError> {
        let record = AuditRecord::new(EventType::Tokenize, caller, &entry.token)
            .with_action("tokenize")
            .with_metadata("context", entry.context.as_str())
            .with_metadata("key_id", entry.key_id.clone())
            .with_metadata("deduplicated", deduplicated.to_string());
        self.append_or_fail(record).await?;

        debug!(token = %entry.token, deduplicated, "Value tokenized");
        Ok(TokenizeResult {
            token: entry.token,
            masked_value: entry.masked_value,
            deduplicated,
        })
    }

    /// Resolves `token` to its normalized plaintext for `purpose`.
    ///
    /// The authorization decision comes first and is audited either way.
    /// Plaintext is returned only after the `detokenize` event is
    /// committed and the access has been recorded.
    ///
    /// # Errors
    ///
    /// - [`CustodyError::Authorization`] if no caller role is allowed for `purpose`
    /// - [`CustodyError::AuditWriteFailure`] if the event could not be committed
    /// - [`CustodyError::NotFound`] for unknown tokens
    /// - [`CustodyError::KeyUnavailable`] if the entry's key has expired
    #[instrument(skip(self, token, caller), fields(token = token_label(token), actor = %caller.actor_id))]
    pub async fn detokenize(
        &self,
        token: &str,
        caller: &CallerIdentity,
        purpose: &str,
    ) -> Result<Zeroizing<String>, CustodyError> {
        let label = token_label(token);
        if !caller
            .roles
            .iter()
            .any(|role| self.policy.is_allowed(role, purpose))
        {
            let record = AuditRecord::new(EventType::DetokenizeDenied, caller, label)
                .with_action("detokenize")
                .with_result(AuditOutcome::Denied)
                .with_metadata("purpose", purpose);
            self.append_or_fail(record).await?;
            warn!(token = %label, purpose = %purpose, "Detokenize denied");
            return Err(CustodyError::Authorization(format!(
                "{} may not detokenize for {}",
                caller.actor_id, purpose
            )));
        }

        if label == MALFORMED_TOKEN {
            return Err(CustodyError::NotFound("malformed token".into()));
        }
        let entry = self
            .store
            .get_entry(token)?
            .ok_or_else(|| CustodyError::NotFound(format!("token {}", token)))?;
        let key = self.keys.get_key(&entry.key_id)?;

        let plaintext = {
            let dek = self.keys.unwrap_key(&key).await?;
            let bytes = PayloadCipher::new(&dek)
                .open(&entry.encrypted_payload, &payload_aad(token, entry.context))?;
            let text = std::str::from_utf8(&bytes).map_err(|_| {
                CustodyError::Validation(format!("payload of {} is not text", token))
            })?;
            Zeroizing::new(text.to_string())
        };

        let record = AuditRecord::new(EventType::Detokenize, caller, token)
            .with_action("detokenize")
            .with_metadata("purpose", purpose)
            .with_metadata("context", entry.context.as_str())
            .with_metadata("key_id", entry.key_id.clone());
        self.append_or_fail(record).await?;

        self.store.record_access(token, Utc::now())?;
        debug!(token = %token, "Token detokenized");
        Ok(plaintext)
    }

    /// Rotates the key of `key_type` and returns the new key id.
    ///
    /// The previous key becomes retiring and a sweep moving its entries
    /// to the new key is recorded. With [`SweepMode::Inline`] the sweep
    /// runs before this returns; a failed inline sweep stays pending for
    /// [`resume_sweeps`](Self::resume_sweeps).
    #[instrument(skip(self, caller), fields(key_type = key_type.as_str(), actor = %caller.actor_id))]
    pub async fn rotate_key(
        &self,
        key_type: KeyType,
        caller: &CallerIdentity,
    ) -> Result<String, CustodyError> {
        if key_type == KeyType::Fingerprint {
            return Err(CustodyError::Validation(
                "fingerprint keys are not rotated through the vault".into(),
            ));
        }

        let next = self.keys.create_key(key_type, caller).await?;
        let previous = self
            .keys
            .list_keys(key_type)?
            .into_iter()
            .find(|k| k.status == KeyStatus::Retiring);
        let previous = match previous {
            Some(previous) => previous,
            None => return Ok(next.key_id),
        };

        let checkpoint =
            SweepCheckpoint::new(previous.key_id.clone(), next.key_id.clone(), key_type);
        self.store.save_sweep(&checkpoint)?;

        if self.config.sweep_mode == SweepMode::Inline {
            let never = AtomicBool::new(false);
            match self.run_sweep(&previous.key_id, &never).await {
                Ok(report) if !report.completed => {
                    warn!(from_key_id = %previous.key_id, "Inline sweep left entries behind");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(from_key_id = %previous.key_id, error = %e, "Inline sweep failed, left pending");
                }
            }
        }
        Ok(next.key_id)
    }

    /// Re-encrypts every entry under `from_key_id` with the sweep's target key.
    ///
    /// Progress is checkpointed after each batch, so a cancelled or
    /// crashed sweep continues where it stopped. Each entry moves by
    /// compare-and-swap on its key id. When no entry references the old
    /// key it is retired and `reencryption_completed` is appended.
    /// Running a completed sweep again returns its final report.
    #[instrument(skip(self, cancel))]
    pub async fn run_sweep(
        &self,
        from_key_id: &str,
        cancel: &AtomicBool,
    ) -> Result<SweepReport, CustodyError> {
        let mut checkpoint = match self.store.load_sweep(from_key_id)? {
            Some(checkpoint) => checkpoint,
            None => self.start_sweep(from_key_id)?,
        };
        if checkpoint.completed {
            return Ok(SweepReport::from_checkpoint(&checkpoint, false));
        }

        let from_key = self.sweep_key(&checkpoint.from_key_id)?;
        let to_key = self.sweep_key(&checkpoint.to_key_id)?;
        let from_dek = self.keys.unwrap_key(&from_key).await?;
        let to_dek = self.keys.unwrap_key(&to_key).await?;
        let opener = PayloadCipher::new(&from_dek);
        let sealer = PayloadCipher::new(&to_dek);

        while checkpoint.passes < self.config.max_sweep_passes {
            loop {
                if cancel.load(Ordering::SeqCst) {
                    checkpoint.updated_at = Utc::now();
                    self.store.save_sweep(&checkpoint)?;
                    info!(
                        from_key_id = %from_key_id,
                        reencrypted = checkpoint.reencrypted,
                        "Sweep cancelled"
                    );
                    return Ok(SweepReport::from_checkpoint(&checkpoint, true));
                }

                let batch = self.store.entries_for_key(
                    &checkpoint.from_key_id,
                    checkpoint.cursor.as_deref(),
                    self.config.sweep_batch_size,
                )?;
                let last = match batch.last() {
                    Some(entry) => entry.token.clone(),
                    None => break,
                };

                for entry in &batch {
                    let aad = payload_aad(&entry.token, entry.context);
                    let plaintext = opener.open(&entry.encrypted_payload, &aad)?;
                    let payload = sealer.seal(&plaintext, &aad)?;
                    match self.store.swap_entry_key(
                        &entry.token,
                        &checkpoint.from_key_id,
                        &checkpoint.to_key_id,
                        &payload,
                    ) {
                        Ok(()) => checkpoint.reencrypted += 1,
                        Err(StorageError::Conflict(_)) | Err(StorageError::Missing(_)) => {
                            checkpoint.skipped += 1
                        }
                        Err(e) => return Err(e.into()),
                    }
                }

                checkpoint.cursor = Some(last);
                checkpoint.updated_at = Utc::now();
                self.store.save_sweep(&checkpoint)?;
                debug!(
                    from_key_id = %from_key_id,
                    reencrypted = checkpoint.reencrypted,
                    "Sweep batch done"
                );
                tokio::task::yield_now().await;
            }

            checkpoint.passes += 1;
            checkpoint.cursor = None;
            if !self.store.key_in_use(&checkpoint.from_key_id)? {
                break;
            }
        }
        drop(opener);
        drop(sealer);
        drop(from_dek);
        drop(to_dek);

        if self.store.key_in_use(&checkpoint.from_key_id)? {
            checkpoint.updated_at = Utc::now();
            self.store.save_sweep(&checkpoint)?;
            warn!(
                from_key_id = %from_key_id,
                passes = checkpoint.passes,
                "Sweep stopped with entries still under the old key"
            );
            return Ok(SweepReport::from_checkpoint(&checkpoint, false));
        }

        self.finish_sweep(&mut checkpoint, from_key.status).await?;
        Ok(SweepReport::from_checkpoint(&checkpoint, false))
    }

    fn start_sweep(&self, from_key_id: &str) -> Result<SweepCheckpoint, CustodyError> {
        let from_key = self.sweep_key(from_key_id)?;
        if from_key.status != KeyStatus::Retiring {
            return Err(CustodyError::Validation(format!(
                "key {} is {}, only retiring keys are swept",
                from_key_id,
                from_key.status.as_str()
            )));
        }
        let to_key = self.keys.get_active_key(from_key.key_type)?;
        let checkpoint = SweepCheckpoint::new(from_key.key_id, to_key.key_id, from_key.key_type);
        self.store.save_sweep(&checkpoint)?;
        Ok(checkpoint)
    }

    fn sweep_key(&self, key_id: &str) -> Result<EncryptionKey, CustodyError> {
        let key = self.keys.get_key(key_id)?;
        if key.key_type != KeyType::TokenizationData {
            return Err(CustodyError::Validation(format!(
                "key {} does not encrypt vault payloads",
                key_id
            )));
        }
        Ok(key)
    }

    async fn finish_sweep(
        &self,
        checkpoint: &mut SweepCheckpoint,
        from_status: KeyStatus,
    ) -> Result<(), CustodyError> {
        let system = CallerIdentity::system(SWEEP_COMPONENT);
        // Already retired if an earlier run stopped after this step
        if from_status == KeyStatus::Retiring {
            self.keys.retire_key(&checkpoint.from_key_id, &system).await?;
        }

        let record = AuditRecord::new(
            EventType::ReencryptionCompleted,
            &system,
            &checkpoint.from_key_id,
        )
        .with_action("reencrypt")
        .with_metadata("to_key_id", checkpoint.to_key_id.clone())
        .with_metadata("key_type", checkpoint.key_type.as_str())
        .with_metadata("reencrypted", checkpoint.reencrypted.to_string())
        .with_metadata("skipped", checkpoint.skipped.to_string())
        .with_metadata("passes", checkpoint.passes.to_string());
        self.audit.append(self.stream(), record).await?;

        checkpoint.completed = true;
        checkpoint.updated_at = Utc::now();
        self.store.save_sweep(checkpoint)?;
        info!(
            from_key_id = %checkpoint.from_key_id,
            to_key_id = %checkpoint.to_key_id,
            reencrypted = checkpoint.reencrypted,
            "Re-encryption sweep completed"
        );
        Ok(())
    }

    /// Runs every sweep that still has work to do.
    ///
    /// Covers persisted sweeps that have not completed, retiring data
    /// keys whose sweep was never recorded, and retired data keys that
    /// entries still reference.
    pub async fn resume_sweeps(&self) -> Result<Vec<SweepReport>, CustodyError> {
        let mut from_keys: Vec<String> = self
            .store
            .pending_sweeps()?
            .into_iter()
            .map(|pending| pending.from_key_id)
            .collect();

        for key in self.keys.list_keys(KeyType::TokenizationData)? {
            if from_keys.contains(&key.key_id) {
                continue;
            }
            match key.status {
                KeyStatus::Retiring => {
                    if self.store.load_sweep(&key.key_id)?.is_none() {
                        warn!(from_key_id = %key.key_id, "Retiring key has no recorded sweep");
                        from_keys.push(key.key_id);
                    }
                }
                KeyStatus::Retired if self.store.key_in_use(&key.key_id)? => {
                    warn!(from_key_id = %key.key_id, "Retired key is still referenced, sweeping again");
                    let to_key = self.keys.get_active_key(KeyType::TokenizationData)?;
                    let checkpoint =
                        SweepCheckpoint::new(key.key_id.clone(), to_key.key_id, key.key_type);
                    self.store.save_sweep(&checkpoint)?;
                    from_keys.push(key.key_id);
                }
                _ => {}
            }
        }

        let never = AtomicBool::new(false);
        let mut reports = Vec::with_capacity(from_keys.len());
        for from_key_id in from_keys {
            info!(from_key_id = %from_key_id, "Resuming sweep");
            reports.push(self.run_sweep(&from_key_id, &never).await?);
        }
        Ok(reports)
    }
}

impl<S, M> TokenVault<S, M>
where
    S: CustodyStore + 'static,
    M: MasterKeyAuthority + 'static,
{
    /// Runs [`run_sweep`](Self::run_sweep) on a tokio task.
    pub fn spawn_sweep(&self, from_key_id: impl Into<String>) -> SweepHandle {
        let from_key_id = from_key_id.into();
        let cancel = Arc::new(AtomicBool::new(false));
        let vault = self.clone();
        let task = {
            let cancel = Arc::clone(&cancel);
            let from_key_id = from_key_id.clone();
            tokio::spawn(async move { vault.run_sweep(&from_key_id, &cancel).await })
        };
        SweepHandle::new(from_key_id, cancel, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditConfig, AuditQuery};
    use crate::identity::ActorType;
    use crate::keys::KeyPolicy;
    use crate::security::LocalKms;
    use crate::storage::{MemoryStore, VaultStore};
    use crate::vault::{MaskingRule, StaticPolicy};

    const CARD: &str = "4111 1111 1111 1111";

    struct Fixture {
        store: Arc<MemoryStore>,
        audit: AuditTrail<MemoryStore>,
        vault: TokenVault<MemoryStore, LocalKms>,
    }

    async fn fixture(config: VaultConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let kms = Arc::new(LocalKms::generate().unwrap());
        let audit = AuditTrail::new(Arc::clone(&store), AuditConfig::default());
        let keys = Arc::new(KeyManager::new(
            Arc::clone(&store),
            kms,
            audit.clone(),
            KeyPolicy::default(),
        ));
        let policy = Arc::new(StaticPolicy::new().allow("support", "refund"));
        let vault = TokenVault::new(Arc::clone(&store), keys, audit.clone(), policy, config);
        vault.initialize(&admin()).await.unwrap();
        Fixture {
            store,
            audit,
            vault,
        }
    }

    fn admin() -> CallerIdentity {
        CallerIdentity::new("key-admin", ActorType::User)
    }

    fn agent() -> CallerIdentity {
        CallerIdentity::new("agent-7", ActorType::User).with_role("support")
    }

    fn events_of(audit: &AuditTrail<MemoryStore>, event_type: EventType) -> usize {
        audit
            .query(&AuditQuery::new().event_type(event_type))
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_card_round_trip() {
        let f = fixture(VaultConfig::default()).await;
        let result = f
            .vault
            .tokenize(CARD, TokenContext::PaymentCard, &agent())
            .await
            .unwrap();

        assert!(is_well_formed_token(&result.token));
        assert_eq!(result.masked_value, "411111******1111");
        assert!(!result.deduplicated);

        let plaintext = f
            .vault
            .detokenize(&result.token, &agent(), "refund")
            .await
            .unwrap();
        assert_eq!(plaintext.as_str(), "4111111111111111");

        let entry = f.store.get_entry(&result.token).unwrap().unwrap();
        assert_eq!(entry.access_count, 1);
        assert!(entry.last_accessed_at.is_some());
        assert_eq!(events_of(&f.audit, EventType::Tokenize), 1);
        assert_eq!(events_of(&f.audit, EventType::Detokenize), 1);
    }

    #[tokio::test]
    async fn test_plaintext_never_reaches_audit_or_store() {
        let f = fixture(VaultConfig::default()).await;
        let result = f
            .vault
            .tokenize(CARD, TokenContext::PaymentCard, &agent())
            .await
            .unwrap();
        f.vault
            .detokenize(&result.token, &agent(), "refund")
            .await
            .unwrap();

        for event in f.audit.query(&AuditQuery::new()).unwrap() {
            let json = serde_json::to_string(&event).unwrap();
            assert!(!json.contains("4111111111111111"));
        }
        let entry = f.store.get_entry(&result.token).unwrap().unwrap();
        assert!(!entry
            .encrypted_payload
            .windows(16)
            .any(|w| w == b"4111111111111111"));
        assert!(!format!("{:?}", entry).contains("4111111111111111"));
    }

    #[tokio::test]
    async fn test_invalid_values_rejected() {
        let f = fixture(VaultConfig::default().with_max_plaintext_len(32)).await;

        for (value, context) in [
            ("4111 1111 1111 1112", TokenContext::PaymentCard),
            ("666-12-3456", TokenContext::Ssn),
            ("not-an-email", TokenContext::Email),
            ("", TokenContext::Generic),
        ] {
            assert!(matches!(
                f.vault.tokenize(value, context, &agent()).await,
                Err(CustodyError::Validation(_))
            ));
        }
        let long = "x".repeat(33);
        assert!(matches!(
            f.vault.tokenize(&long, TokenContext::Generic, &agent()).await,
            Err(CustodyError::Validation(_))
        ));
        assert_eq!(f.store.entry_count(), 0);
        assert_eq!(events_of(&f.audit, EventType::Tokenize), 0);
    }

    #[tokio::test]
    async fn test_tokenize_requires_keys() {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditTrail::new(Arc::clone(&store), AuditConfig::default());
        let keys = Arc::new(KeyManager::new(
            Arc::clone(&store),
            Arc::new(LocalKms::generate().unwrap()),
            audit.clone(),
            KeyPolicy::default(),
        ));
        let vault = TokenVault::new(
            store,
            keys,
            audit,
            Arc::new(StaticPolicy::new()),
            VaultConfig::default(),
        );
        assert!(matches!(
            vault.tokenize(CARD, TokenContext::PaymentCard, &agent()).await,
            Err(CustodyError::KeyUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_detokenize_fails_closed() {
        let f = fixture(VaultConfig::default()).await;
        let result = f
            .vault
            .tokenize(CARD, TokenContext::PaymentCard, &agent())
            .await
            .unwrap();

        f.store.set_audit_available(false);
        let outcome = f.vault.detokenize(&result.token, &agent(), "refund").await;
        assert!(matches!(outcome, Err(CustodyError::AuditWriteFailure(_))));

        f.store.set_audit_available(true);
        let entry = f.store.get_entry(&result.token).unwrap().unwrap();
        assert_eq!(entry.access_count, 0);
        assert!(entry.last_accessed_at.is_none());
        assert_eq!(events_of(&f.audit, EventType::Detokenize), 0);
    }

    #[tokio::test]
    async fn test_denial_logged_once() {
        let f = fixture(VaultConfig::default()).await;
        let result = f
            .vault
            .tokenize(CARD, TokenContext::PaymentCard, &agent())
            .await
            .unwrap();

        let intruder = CallerIdentity::new("mallory", ActorType::Service).with_role("marketing");
        let outcome = f.vault.detokenize(&result.token, &intruder, "refund").await;
        assert!(matches!(outcome, Err(CustodyError::Authorization(_))));
        // Allowed role, wrong purpose
        let outcome = f.vault.detokenize(&result.token, &agent(), "export").await;
        assert!(matches!(outcome, Err(CustodyError::Authorization(_))));

        let denied = f
            .audit
            .query(&AuditQuery::new().event_type(EventType::DetokenizeDenied))
            .unwrap();
        assert_eq!(denied.len(), 2);
        assert_eq!(denied[0].actor_id, "mallory");
        assert_eq!(denied[0].result, AuditOutcome::Denied);
        assert_eq!(denied[0].target_id, result.token);
        assert_eq!(events_of(&f.audit, EventType::Detokenize), 0);
        assert_eq!(
            f.store.get_entry(&result.token).unwrap().unwrap().access_count,
            0
        );
    }

    #[tokio::test]
    async fn test_denial_without_audit() {
        let f = fixture(VaultConfig::default()).await;
        f.store.set_audit_available(false);
        let intruder = CallerIdentity::new("mallory", ActorType::User);
        let outcome = f
            .vault
            .detokenize("tok_00000000000000000000000000000000", &intruder, "refund")
            .await;
        assert!(matches!(outcome, Err(CustodyError::AuditWriteFailure(_))));
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let f = fixture(VaultConfig::default()).await;
        for token in ["tok_00000000000000000000000000000000", "garbage"] {
            assert!(matches!(
                f.vault.detokenize(token, &agent(), "refund").await,
                Err(CustodyError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_dedup_per_context() {
        let f = fixture(VaultConfig::default()).await;
        let a = f
            .vault
            .tokenize("Alice@Example.COM", TokenContext::Email, &agent())
            .await
            .unwrap();
        let b = f
            .vault
            .tokenize("Alice@example.com", TokenContext::Email, &agent())
            .await
            .unwrap();

        assert_eq!(a.token, b.token);
        assert!(b.deduplicated);
        assert_eq!(a.masked_value, "A****@example.com");
        assert_eq!(f.store.entry_count(), 1);
        // Repeats are still audited
        assert_eq!(events_of(&f.audit, EventType::Tokenize), 2);

        let other = f
            .vault
            .tokenize("Alice@example.com", TokenContext::Generic, &agent())
            .await
            .unwrap();
        assert_ne!(other.token, a.token);
    }

    #[tokio::test]
    async fn test_dedup_disabled() {
        let f = fixture(VaultConfig::default().with_dedup(DedupPolicy::Disabled)).await;
        let a = f
            .vault
            .tokenize(CARD, TokenContext::PaymentCard, &agent())
            .await
            .unwrap();
        let b = f
            .vault
            .tokenize(CARD, TokenContext::PaymentCard, &agent())
            .await
            .unwrap();
        assert_ne!(a.token, b.token);
        assert!(!b.deduplicated);
        assert_eq!(f.store.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_masking_override() {
        let f = fixture(
            VaultConfig::default().with_masking(TokenContext::Ssn, MaskingRule::new(0, 0)),
        )
        .await;
        let result = f
            .vault
            .tokenize("123-45-6789", TokenContext::Ssn, &agent())
            .await
            .unwrap();
        assert_eq!(result.masked_value, "*********");
    }

    #[tokio::test]
    async fn test_rotation_continuity() {
        let f = fixture(VaultConfig::default().with_sweep_mode(SweepMode::Deferred)).await;
        let v1 = f
            .vault
            .keys()
            .get_active_key(KeyType::TokenizationData)
            .unwrap();
        let result = f
            .vault
            .tokenize(CARD, TokenContext::PaymentCard, &agent())
            .await
            .unwrap();

        let v2_id = f
            .vault
            .rotate_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();
        assert_ne!(v2_id, v1.key_id);

        // Readable while the entry is still under the retiring key
        let before = f
            .vault
            .detokenize(&result.token, &agent(), "refund")
            .await
            .unwrap();
        assert_eq!(before.as_str(), "4111111111111111");

        let report = f
            .vault
            .run_sweep(&v1.key_id, &AtomicBool::new(false))
            .await
            .unwrap();
        assert!(report.completed);
        assert_eq!(report.reencrypted, 1);
        assert_eq!(report.to_key_id, v2_id);

        let entry = f.store.get_entry(&result.token).unwrap().unwrap();
        assert_eq!(entry.key_id, v2_id);
        let after = f
            .vault
            .detokenize(&result.token, &agent(), "refund")
            .await
            .unwrap();
        assert_eq!(after.as_str(), "4111111111111111");

        assert_eq!(
            f.vault.keys().get_key(&v1.key_id).unwrap().status,
            KeyStatus::Retired
        );
        assert_eq!(events_of(&f.audit, EventType::ReencryptionCompleted), 1);

        f.vault.keys().expire_key(&v1.key_id, &admin()).await.unwrap();
        let still = f
            .vault
            .detokenize(&result.token, &agent(), "refund")
            .await
            .unwrap();
        assert_eq!(still.as_str(), "4111111111111111");
        assert!(f.audit.verify_integrity("custody", None, None).unwrap().valid);
    }

    #[tokio::test]
    async fn test_inline_rotation() {
        let f = fixture(VaultConfig::default()).await;
        let mut tokens = Vec::new();
        for value in ["123-45-6789", "234-56-7890", "345-67-8901"] {
            tokens.push(
                f.vault
                    .tokenize(value, TokenContext::Ssn, &agent())
                    .await
                    .unwrap()
                    .token,
            );
        }
        let v1 = f
            .vault
            .keys()
            .get_active_key(KeyType::TokenizationData)
            .unwrap();

        let v2_id = f
            .vault
            .rotate_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();

        for token in &tokens {
            assert_eq!(f.store.get_entry(token).unwrap().unwrap().key_id, v2_id);
        }
        assert_eq!(
            f.vault.keys().get_key(&v1.key_id).unwrap().status,
            KeyStatus::Retired
        );
        assert!(f.store.pending_sweeps().unwrap().is_empty());

        // A second rotation is possible once the first finished
        f.vault
            .rotate_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fingerprint_rotation_rejected() {
        let f = fixture(VaultConfig::default()).await;
        assert!(matches!(
            f.vault.rotate_key(KeyType::Fingerprint, &admin()).await,
            Err(CustodyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_cancel_and_resume() {
        let config = VaultConfig::default()
            .with_sweep_mode(SweepMode::Deferred)
            .with_sweep_batch_size(2)
            .with_dedup(DedupPolicy::Disabled);
        let f = fixture(config).await;
        for _ in 0..5 {
            f.vault
                .tokenize("order-42", TokenContext::Generic, &agent())
                .await
                .unwrap();
        }
        let v1 = f
            .vault
            .keys()
            .get_active_key(KeyType::TokenizationData)
            .unwrap();
        f.vault
            .rotate_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();

        let cancelled = f
            .vault
            .run_sweep(&v1.key_id, &AtomicBool::new(true))
            .await
            .unwrap();
        assert!(cancelled.cancelled);
        assert!(!cancelled.completed);
        assert_eq!(f.store.pending_sweeps().unwrap().len(), 1);

        let reports = f.vault.resume_sweeps().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].completed);
        assert_eq!(reports[0].reencrypted, 5);
        assert!(!f.store.key_in_use(&v1.key_id).unwrap());

        // Idempotent once complete
        let again = f
            .vault
            .run_sweep(&v1.key_id, &AtomicBool::new(false))
            .await
            .unwrap();
        assert_eq!(again, reports[0]);
        assert_eq!(events_of(&f.audit, EventType::ReencryptionCompleted), 1);
    }

    #[tokio::test]
    async fn test_sweep_continues_from_checkpoint() {
        let config = VaultConfig::default()
            .with_sweep_mode(SweepMode::Deferred)
            .with_sweep_batch_size(2)
            .with_dedup(DedupPolicy::Disabled);
        let f = fixture(config).await;
        for _ in 0..4 {
            f.vault
                .tokenize("order-42", TokenContext::Generic, &agent())
                .await
                .unwrap();
        }
        let v1 = f
            .vault
            .keys()
            .get_active_key(KeyType::TokenizationData)
            .unwrap();
        f.vault
            .rotate_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();

        // Simulate a run that stopped after its first batch
        let mut checkpoint = f.store.load_sweep(&v1.key_id).unwrap().unwrap();
        let first = f.store.entries_for_key(&v1.key_id, None, 2).unwrap();
        checkpoint.cursor = Some(first[1].token.clone());
        f.store.save_sweep(&checkpoint).unwrap();

        let report = f
            .vault
            .run_sweep(&v1.key_id, &AtomicBool::new(false))
            .await
            .unwrap();
        assert!(report.completed);
        // Two from the resumed pass, two picked up by the next pass
        assert_eq!(report.reencrypted, 4);
        assert_eq!(report.passes, 2);
    }

    #[tokio::test]
    async fn test_spawned_sweep() {
        let f = fixture(VaultConfig::default().with_sweep_mode(SweepMode::Deferred)).await;
        f.vault
            .tokenize(CARD, TokenContext::PaymentCard, &agent())
            .await
            .unwrap();
        let v1 = f
            .vault
            .keys()
            .get_active_key(KeyType::TokenizationData)
            .unwrap();
        f.vault
            .rotate_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();

        let handle = f.vault.spawn_sweep(v1.key_id.clone());
        assert_eq!(handle.from_key_id(), v1.key_id);
        let report = handle.join().await.unwrap().unwrap();
        assert!(report.completed);
        assert_eq!(report.reencrypted, 1);
    }

    #[tokio::test]
    async fn test_sweep_rejects_active_key() {
        let f = fixture(VaultConfig::default()).await;
        let active = f
            .vault
            .keys()
            .get_active_key(KeyType::TokenizationData)
            .unwrap();
        assert!(matches!(
            f.vault
                .run_sweep(&active.key_id, &AtomicBool::new(false))
                .await,
            Err(CustodyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_detokenize_fails_closed_under_contention() {
        let f = fixture(VaultConfig::default()).await;
        let result = f
            .vault
            .tokenize(CARD, TokenContext::PaymentCard, &agent())
            .await
            .unwrap();

        f.store.set_audit_contended(true);
        let outcome = f.vault.detokenize(&result.token, &agent(), "refund").await;
        assert!(matches!(outcome, Err(CustodyError::AuditWriteFailure(_))));
        let intruder = CallerIdentity::new("mallory", ActorType::User);
        let outcome = f.vault.detokenize(&result.token, &intruder, "refund").await;
        assert!(matches!(outcome, Err(CustodyError::AuditWriteFailure(_))));

        f.store.set_audit_contended(false);
        assert_eq!(
            f.store.get_entry(&result.token).unwrap().unwrap().access_count,
            0
        );
        assert_eq!(events_of(&f.audit, EventType::Detokenize), 0);
    }

    #[tokio::test]
    async fn test_malformed_token_not_recorded() {
        let f = fixture(VaultConfig::default()).await;
        let intruder = CallerIdentity::new("mallory", ActorType::User);
        let outcome = f.vault.detokenize(CARD, &intruder, "refund").await;
        assert!(matches!(outcome, Err(CustodyError::Authorization(_))));

        let denied = f
            .audit
            .query(&AuditQuery::new().event_type(EventType::DetokenizeDenied))
            .unwrap();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].target_id, MALFORMED_TOKEN);

        match f.vault.detokenize(CARD, &agent(), "refund").await {
            Err(CustodyError::NotFound(msg)) => assert!(!msg.contains("4111")),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }

        for event in f.audit.query(&AuditQuery::new()).unwrap() {
            let json = serde_json::to_string(&event).unwrap();
            assert!(!json.contains("4111"));
        }
    }

    #[tokio::test]
    async fn test_resume_retiring_key_without_sweep() {
        let f = fixture(VaultConfig::default()).await;
        let token = f
            .vault
            .tokenize("123-45-6789", TokenContext::Ssn, &agent())
            .await
            .unwrap()
            .token;
        let v1 = f
            .vault
            .keys()
            .get_active_key(KeyType::TokenizationData)
            .unwrap();

        // Rotated outside the vault, so no sweep was recorded
        let v2 = f
            .vault
            .keys()
            .create_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();
        assert!(f.store.load_sweep(&v1.key_id).unwrap().is_none());

        let reports = f.vault.resume_sweeps().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].completed);
        assert_eq!(reports[0].reencrypted, 1);
        assert_eq!(f.store.get_entry(&token).unwrap().unwrap().key_id, v2.key_id);
        assert_eq!(
            f.vault.keys().get_key(&v1.key_id).unwrap().status,
            KeyStatus::Retired
        );

        f.vault
            .rotate_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resume_moves_entries_off_retired_key() {
        let f = fixture(VaultConfig::default()).await;
        f.vault
            .tokenize("order-1", TokenContext::Generic, &agent())
            .await
            .unwrap();
        let v1_id = f
            .vault
            .keys()
            .get_active_key(KeyType::TokenizationData)
            .unwrap()
            .key_id;
        let v2_id = f
            .vault
            .rotate_key(KeyType::TokenizationData, &admin())
            .await
            .unwrap();
        let v1 = f.vault.keys().get_key(&v1_id).unwrap();
        assert_eq!(v1.status, KeyStatus::Retired);

        // A tokenize that read v1 as active just before the rotation
        let token = generate_token(&SystemRandom::new()).unwrap();
        let dek = f.vault.keys().unwrap_key(&v1).await.unwrap();
        let encrypted_payload = PayloadCipher::new(&dek)
            .seal(b"order-7", &payload_aad(&token, TokenContext::Generic))
            .unwrap();
        drop(dek);
        let late = VaultEntry {
            token: token.clone(),
            context: TokenContext::Generic,
            encrypted_payload,
            payload_fingerprint: "late".into(),
            masked_value: "*******".into(),
            key_id: v1_id.clone(),
            created_at: Utc::now(),
            last_accessed_at: None,
            access_count: 0,
        };
        f.store.insert_entry(&late, false).unwrap();

        let reports = f.vault.resume_sweeps().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].completed);
        assert_eq!(reports[0].reencrypted, 1);
        assert_eq!(f.store.get_entry(&token).unwrap().unwrap().key_id, v2_id);
        assert!(!f.store.key_in_use(&v1_id).unwrap());
        assert_eq!(
            f.vault
                .detokenize(&token, &agent(), "refund")
                .await
                .unwrap()
                .as_str(),
            "order-7"
        );

        // Nothing left to do
        assert!(f.vault.resume_sweeps().await.unwrap().is_empty());
    }
}
