// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Audit trail configuration.

use std::time::Duration;

/// Default stream every component writes to.
pub const DEFAULT_STREAM: &str = "custody";

/// Configuration for [`AuditTrail`](super::AuditTrail).
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Stream used when a caller does not name one.
    pub stream_id: String,
    /// Uniqueness rejections tolerated before giving up with a conflict.
    pub max_append_retries: u32,
    /// Time an append may spend retrying an unavailable store (zero = fail at once).
    pub storage_budget: Duration,
    /// Initial backoff between unavailable-store retries; doubles each time.
    pub retry_backoff: Duration,
    /// A checkpoint is written at every non-zero multiple of this height (0 = never).
    pub checkpoint_interval: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            stream_id: DEFAULT_STREAM.to_string(),
            max_append_retries: 16,
            storage_budget: Duration::ZERO,
            retry_backoff: Duration::from_millis(5),
            checkpoint_interval: 1024,
        }
    }
}

impl AuditConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default stream.
    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = stream_id.into();
        self
    }

    /// Sets the retry limit for uniqueness rejections.
    pub fn with_max_append_retries(mut self, retries: u32) -> Self {
        self.max_append_retries = retries;
        self
    }

    /// Sets the time budget for retrying an unavailable store.
    pub fn with_storage_budget(mut self, budget: Duration) -> Self {
        self.storage_budget = budget;
        self
    }

    /// Sets the initial backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Sets the checkpoint interval.
    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }
}
