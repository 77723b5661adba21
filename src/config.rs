// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Combined configuration for a custody deployment.

use crate::audit::AuditConfig;
use crate::keys::KeyPolicy;
use crate::vault::VaultConfig;

/// Configuration of all three custody components.
#[derive(Debug, Clone, Default)]
pub struct CustodyConfig {
    pub audit: AuditConfig,
    pub vault: VaultConfig,
    pub keys: KeyPolicy,
}

impl CustodyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_audit(mut self, audit: AuditConfig) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_vault(mut self, vault: VaultConfig) -> Self {
        self.vault = vault;
        self
    }

    pub fn with_keys(mut self, keys: KeyPolicy) -> Self {
        self.keys = keys;
        self
    }
}
