// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Detokenization authorization.

use std::collections::{HashMap, HashSet};

/// Decides whether a role may detokenize for a stated purpose.
pub trait AuthorizationPolicy: Send + Sync {
    fn is_allowed(&self, role: &str, purpose: &str) -> bool;
}

/// A fixed role/purpose allow-list. Everything not listed is denied.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy {
    grants: HashMap<String, HashSet<String>>,
}

impl StaticPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows `role` to detokenize for `purpose`.
    pub fn allow(mut self, role: impl Into<String>, purpose: impl Into<String>) -> Self {
        self.grants
            .entry(role.into())
            .or_default()
            .insert(purpose.into());
        self
    }
}

impl AuthorizationPolicy for StaticPolicy {
    fn is_allowed(&self, role: &str, purpose: &str) -> bool {
        self.grants
            .get(role)
            .map(|purposes| purposes.contains(purpose))
            .unwrap_or(false)
    }
}
