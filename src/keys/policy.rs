// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Key lifecycle policy.

use chrono::Duration;

/// Lifecycle settings for [`KeyManager`](super::KeyManager).
#[derive(Debug, Clone)]
pub struct KeyPolicy {
    /// Time a retired key stays decrypt-capable before it may expire.
    pub retired_key_grace: Duration,
    /// Audit stream for key events; the trail's default stream if unset.
    pub audit_stream: Option<String>,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            retired_key_grace: Duration::days(30),
            audit_stream: None,
        }
    }
}

impl KeyPolicy {
    /// Sets the retired-key grace period.
    pub fn with_retired_key_grace(mut self, grace: Duration) -> Self {
        self.retired_key_grace = grace;
        self
    }

    /// Sets the audit stream.
    pub fn with_audit_stream(mut self, stream: impl Into<String>) -> Self {
        self.audit_stream = Some(stream.into());
        self
    }
}
