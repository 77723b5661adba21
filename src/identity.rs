// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Verified caller identity supplied by the authentication layer.

use serde::{Deserialize, Serialize};

/// Kind of principal behind an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// A human user.
    User,
    /// A service account.
    Service,
    /// The custody subsystem itself (background sweeps, expiry).
    System,
}

impl ActorType {
    /// Returns the stable name used in audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::Service => "service",
            ActorType::System => "system",
        }
    }
}

/// A caller whose identity has already been verified upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Stable principal identifier.
    pub actor_id: String,
    /// Kind of principal.
    pub actor_type: ActorType,
    /// Roles granted to the principal.
    pub roles: Vec<String>,
}

impl CallerIdentity {
    /// Creates an identity with no roles.
    pub fn new(actor_id: impl Into<String>, actor_type: ActorType) -> Self {
        Self {
            actor_id: actor_id.into(),
            actor_type,
            roles: Vec::new(),
        }
    }

    /// Identity used for work the subsystem performs on its own behalf.
    pub fn system(component: impl Into<String>) -> Self {
        Self::new(component, ActorType::System)
    }

    /// Adds a role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Returns true if the caller holds `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
