// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Wiring of the three custody components over one store.

use std::sync::Arc;

use crate::audit::AuditTrail;
use crate::config::CustodyConfig;
use crate::error::CustodyError;
use crate::identity::CallerIdentity;
use crate::keys::KeyManager;
use crate::security::MasterKeyAuthority;
use crate::storage::CustodyStore;
use crate::vault::{AuthorizationPolicy, SweepReport, TokenVault};

/// An audit trail, key manager and vault sharing one store.
pub struct Custody<S, M> {
    audit: AuditTrail<S>,
    keys: Arc<KeyManager<S, M>>,
    vault: TokenVault<S, M>,
}

impl<S: CustodyStore, M: MasterKeyAuthority> Custody<S, M> {
    /// Builds the components from `config`.
    pub fn new(
        store: Arc<S>,
        authority: Arc<M>,
        policy: Arc<dyn AuthorizationPolicy>,
        config: CustodyConfig,
    ) -> Self {
        let audit = AuditTrail::new(Arc::clone(&store), config.audit);
        let keys = Arc::new(KeyManager::new(
            Arc::clone(&store),
            authority,
            audit.clone(),
            config.keys,
        ));
        let vault = TokenVault::new(
            store,
            Arc::clone(&keys),
            audit.clone(),
            policy,
            config.vault,
        );
        Self { audit, keys, vault }
    }

    /// Ensures active keys exist and finishes sweeps left by a previous run.
    pub async fn start(&self, caller: &CallerIdentity) -> Result<Vec<SweepReport>, CustodyError> {
        self.vault.initialize(caller).await?;
        self.vault.resume_sweeps().await
    }

    pub fn audit(&self) -> &AuditTrail<S> {
        &self.audit
    }

    pub fn keys(&self) -> &KeyManager<S, M> {
        &self.keys
    }

    pub fn vault(&self) -> &TokenVault<S, M> {
        &self.vault
    }
}
