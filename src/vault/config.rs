// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Vault configuration.

use std::collections::HashMap;

use super::context::{MaskingRule, TokenContext};

/// Whether equal values in the same context share a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupPolicy {
    /// One token per (context, normalized value).
    #[default]
    PerContext,
    /// Every tokenize call mints a new token.
    Disabled,
}

/// When the re-encryption sweep runs after a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepMode {
    /// Inside `rotate_key`, before it returns.
    #[default]
    Inline,
    /// Left for `spawn_sweep` or `resume_sweeps`.
    Deferred,
}

/// Configuration for [`TokenVault`](super::TokenVault).
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Audit stream for vault events; the trail's default stream if unset.
    pub audit_stream: Option<String>,
    pub dedup: DedupPolicy,
    pub sweep_mode: SweepMode,
    /// Entries re-encrypted between checkpoint writes.
    pub sweep_batch_size: usize,
    /// Passes over the old key's entries before a sweep gives up for now.
    pub max_sweep_passes: u32,
    /// Per-context masking rules replacing the defaults.
    pub masking: HashMap<TokenContext, MaskingRule>,
    /// Longest accepted plaintext, in bytes.
    pub max_plaintext_len: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            audit_stream: None,
            dedup: DedupPolicy::PerContext,
            sweep_mode: SweepMode::Inline,
            sweep_batch_size: 256,
            max_sweep_passes: 4,
            masking: HashMap::new(),
            max_plaintext_len: 4096,
        }
    }
}

impl VaultConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_audit_stream(mut self, stream: impl Into<String>) -> Self {
        self.audit_stream = Some(stream.into());
        self
    }

    pub fn with_dedup(mut self, dedup: DedupPolicy) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_sweep_mode(mut self, mode: SweepMode) -> Self {
        self.sweep_mode = mode;
        self
    }

    pub fn with_sweep_batch_size(mut self, size: usize) -> Self {
        self.sweep_batch_size = size.max(1);
        self
    }

    pub fn with_max_sweep_passes(mut self, passes: u32) -> Self {
        self.max_sweep_passes = passes.max(1);
        self
    }

    /// Overrides the masking rule of one context.
    pub fn with_masking(mut self, context: TokenContext, rule: MaskingRule) -> Self {
        self.masking.insert(context, rule);
        self
    }

    pub fn with_max_plaintext_len(mut self, len: usize) -> Self {
        self.max_plaintext_len = len;
        self
    }

    /// Returns the masking rule in effect for `context`.
    pub fn masking_rule(&self, context: TokenContext) -> MaskingRule {
        self.masking
            .get(&context)
            .copied()
            .unwrap_or_else(|| context.default_masking())
    }
}
