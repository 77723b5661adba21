// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Audit event types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{ActorType, CallerIdentity};

/// Kinds of custody operations recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A value was tokenized.
    Tokenize,
    /// A token was resolved to its plaintext.
    Detokenize,
    /// A detokenize request was refused by policy.
    DetokenizeDenied,
    /// A key was rotated; the previous active key became retiring.
    KeyRotated,
    /// A rotation could not be committed.
    RotationFailed,
    /// A chain verification was performed.
    IntegrityCheck,
    /// The first key of a type was created.
    KeyCreated,
    /// A retiring key was retired.
    KeyRetired,
    /// A retired key was expired and its material discarded.
    KeyExpired,
    /// A re-encryption sweep finished.
    ReencryptionCompleted,
}

impl EventType {
    /// Returns the stable name used in the canonical encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Tokenize => "tokenize",
            EventType::Detokenize => "detokenize",
            EventType::DetokenizeDenied => "detokenize_denied",
            EventType::KeyRotated => "key_rotated",
            EventType::RotationFailed => "rotation_failed",
            EventType::IntegrityCheck => "integrity_check",
            EventType::KeyCreated => "key_created",
            EventType::KeyRetired => "key_retired",
            EventType::KeyExpired => "key_expired",
            EventType::ReencryptionCompleted => "reencryption_completed",
        }
    }

    /// Returns the severity used when mirroring the event to tracing.
    pub fn severity(&self) -> AuditSeverity {
        match self {
            EventType::Tokenize | EventType::Detokenize | EventType::IntegrityCheck => {
                AuditSeverity::Info
            }
            EventType::KeyCreated
            | EventType::KeyRetired
            | EventType::ReencryptionCompleted => AuditSeverity::Info,
            EventType::KeyRotated | EventType::KeyExpired => AuditSeverity::Warning,
            EventType::RotationFailed => AuditSeverity::Error,
            EventType::DetokenizeDenied => AuditSeverity::Critical,
        }
    }
}

/// Severity levels for audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuditSeverity {
    /// Informational event.
    Info,
    /// Unusual but expected event.
    Warning,
    /// An operation failed.
    Error,
    /// Security violation.
    Critical,
}

impl AuditSeverity {
    /// Returns the severity as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "INFO",
            AuditSeverity::Warning => "WARN",
            AuditSeverity::Error => "ERROR",
            AuditSeverity::Critical => "CRITICAL",
        }
    }
}

/// Outcome recorded on an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Error,
}

impl AuditOutcome {
    /// Returns the stable name used in the canonical encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Denied => "denied",
            AuditOutcome::Error => "error",
        }
    }
}

/// A committed, hash-chained audit event.
///
/// Events are immutable once stored. `event_hash` covers every other
/// field together with `previous_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub stream_id: String,
    pub block_height: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub actor_id: String,
    pub actor_type: ActorType,
    pub target_id: String,
    pub action: String,
    pub result: AuditOutcome,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
    pub event_hash: String,
    pub previous_hash: String,
}

/// The caller-supplied part of an event, before it is placed on a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub event_type: EventType,
    pub actor_id: String,
    pub actor_type: ActorType,
    pub target_id: String,
    pub action: String,
    pub result: AuditOutcome,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

impl AuditRecord {
    /// Creates a successful record of `event_type` by `actor` against `target_id`.
    ///
    /// The action defaults to the event type name.
    pub fn new(event_type: EventType, actor: &CallerIdentity, target_id: impl Into<String>) -> Self {
        Self {
            event_type,
            actor_id: actor.actor_id.clone(),
            actor_type: actor.actor_type,
            target_id: target_id.into(),
            action: event_type.as_str().to_string(),
            result: AuditOutcome::Success,
            description: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the action.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// Sets the outcome.
    pub fn with_result(mut self, result: AuditOutcome) -> Self {
        self.result = result;
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a metadata entry. Never pass plaintext or key material.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A trusted chain position used to anchor partial verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stream_id: String,
    pub height: u64,
    pub event_hash: String,
    pub created_at: DateTime<Utc>,
}
