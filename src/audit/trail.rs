// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The hash-chained audit trail.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::error::CustodyError;
use crate::identity::CallerIdentity;
use crate::storage::{AuditStore, StorageError};

use super::canonical::{compute_event_hash, truncate_to_micros, GENESIS_HASH};
use super::config::AuditConfig;
use super::event::{AuditEvent, AuditOutcome, AuditRecord, AuditSeverity, Checkpoint, EventType};
use super::query::AuditQuery;

/// Outcome of a chain verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub stream_id: String,
    pub valid: bool,
    /// Lowest height at which the chain fails to verify.
    pub first_invalid_height: Option<u64>,
    pub events_checked: u64,
    /// Checkpoint height replay started from, if not genesis.
    pub anchor_height: Option<u64>,
}

impl IntegrityReport {
    /// Converts an invalid report into [`CustodyError::Integrity`].
    pub fn into_result(self) -> Result<Self, CustodyError> {
        match (self.valid, self.first_invalid_height) {
            (false, Some(height)) => Err(CustodyError::Integrity {
                stream_id: self.stream_id,
                height,
            }),
            (false, None) => Err(CustodyError::Integrity {
                stream_id: self.stream_id,
                height: 0,
            }),
            (true, _) => Ok(self),
        }
    }
}

/// Append-only, hash-chained audit log over an [`AuditStore`].
///
/// Appends are serialized per stream by the store's uniqueness on
/// `(stream_id, block_height)`. The tail is re-read on every attempt, so
/// several trails (or processes) may write to one stream.
pub struct AuditTrail<S> {
    store: Arc<S>,
    config: AuditConfig,
}

impl<S> Clone for AuditTrail<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: AuditStore> AuditTrail<S> {
    /// Creates a trail over `store`.
    pub fn new(store: Arc<S>, config: AuditConfig) -> Self {
        Self { store, config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Returns the default stream.
    pub fn default_stream(&self) -> &str {
        &self.config.stream_id
    }

    /// Appends `record` to `stream_id` and returns the committed event.
    ///
    /// Either the event is durably committed or an error is returned;
    /// nothing is written on failure.
    ///
    /// # Errors
    ///
    /// - [`CustodyError::ConcurrencyConflict`] after `max_append_retries`
    ///   uniqueness rejections
    /// - [`CustodyError::AuditWriteFailure`] if the store stays unavailable
    ///   beyond `storage_budget`, or fails in any other way
    #[instrument(skip(self, record), fields(stream = %stream_id, event_type = record.event_type.as_str()))]
    pub async fn append(
        &self,
        stream_id: &str,
        record: AuditRecord,
    ) -> Result<AuditEvent, CustodyError> {
        let started = Instant::now();
        let mut backoff = self.config.retry_backoff;
        let mut conflicts = 0u32;

        loop {
            let attempt = self
                .store
                .last_event(stream_id)
                .and_then(|tail| {
                    let event = Self::build_event(stream_id, &record, tail)?;
                    self.store.insert_event(&event)?;
                    Ok(event)
                });

            match attempt {
                Ok(event) => {
                    Self::mirror(&event);
                    self.maybe_checkpoint(&event);
                    return Ok(event);
                }
                Err(StorageError::Duplicate(_)) | Err(StorageError::Conflict(_)) => {
                    conflicts += 1;
                    if conflicts > self.config.max_append_retries {
                        warn!(conflicts, "audit append lost every race");
                        return Err(CustodyError::ConcurrencyConflict(format!(
                            "append to {} rejected {} times",
                            stream_id, conflicts
                        )));
                    }
                    debug!(conflicts, "audit tail moved, retrying");
                    tokio::task::yield_now().await;
                }
                Err(StorageError::Unavailable(reason)) => {
                    if started.elapsed() + backoff > self.config.storage_budget {
                        error!(reason = %reason, "audit store unavailable, failing closed");
                        return Err(CustodyError::AuditWriteFailure(reason));
                    }
                    warn!(reason = %reason, backoff_ms = backoff.as_millis() as u64, "audit store unavailable, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    error!(error = %e, "audit append failed, failing closed");
                    return Err(CustodyError::AuditWriteFailure(e.to_string()));
                }
            }
        }
    }

    /// Appends to the default stream.
    pub async fn append_default(&self, record: AuditRecord) -> Result<AuditEvent, CustodyError> {
        let stream = self.config.stream_id.clone();
        self.append(&stream, record).await
    }

    fn build_event(
        stream_id: &str,
        record: &AuditRecord,
        tail: Option<AuditEvent>,
    ) -> Result<AuditEvent, StorageError> {
        let now = truncate_to_micros(Utc::now());
        let (block_height, previous_hash, timestamp) = match tail {
            Some(tail) => (
                tail.block_height + 1,
                tail.event_hash,
                now.max(tail.timestamp),
            ),
            None => (0, GENESIS_HASH.to_string(), now),
        };

        let mut event = AuditEvent {
            stream_id: stream_id.to_string(),
            block_height,
            timestamp,
            event_type: record.event_type,
            actor_id: record.actor_id.clone(),
            actor_type: record.actor_type,
            target_id: record.target_id.clone(),
            action: record.action.clone(),
            result: record.result,
            description: record.description.clone(),
            metadata: record.metadata.clone(),
            event_hash: String::new(),
            previous_hash,
        };
        event.event_hash = compute_event_hash(&event).map_err(|e| {
            StorageError::Corruption(format!("tail of {} has an unusable hash: {}", stream_id, e))
        })?;
        Ok(event)
    }

    fn mirror(event: &AuditEvent) {
        match event.event_type.severity() {
            AuditSeverity::Info => info!(
                target: "audit",
                stream = %event.stream_id,
                height = event.block_height,
                event_type = event.event_type.as_str(),
                actor = %event.actor_id,
                target_id = %event.target_id,
                result = event.result.as_str(),
                "Audit event committed"
            ),
            AuditSeverity::Warning => warn!(
                target: "audit",
                stream = %event.stream_id,
                height = event.block_height,
                event_type = event.event_type.as_str(),
                actor = %event.actor_id,
                target_id = %event.target_id,
                result = event.result.as_str(),
                "Audit event committed"
            ),
            AuditSeverity::Error | AuditSeverity::Critical => error!(
                target: "audit",
                stream = %event.stream_id,
                height = event.block_height,
                event_type = event.event_type.as_str(),
                actor = %event.actor_id,
                target_id = %event.target_id,
                result = event.result.as_str(),
                severity = event.event_type.severity().as_str(),
                "Audit event committed"
            ),
        }
    }

    fn maybe_checkpoint(&self, event: &AuditEvent) {
        let interval = self.config.checkpoint_interval;
        if interval == 0 || event.block_height == 0 || event.block_height % interval != 0 {
            return;
        }
        if let Err(e) = self.store.insert_checkpoint(&Self::checkpoint_of(event)) {
            // The chain itself is committed; a missing checkpoint only slows verification
            warn!(stream = %event.stream_id, height = event.block_height, error = %e, "checkpoint write failed");
        }
    }

    fn checkpoint_of(event: &AuditEvent) -> Checkpoint {
        Checkpoint {
            stream_id: event.stream_id.clone(),
            height: event.block_height,
            event_hash: event.event_hash.clone(),
            created_at: Utc::now(),
        }
    }

    /// Writes a checkpoint at the current tail of `stream_id`.
    ///
    /// Returns `None` for an empty stream.
    #[instrument(skip(self))]
    pub fn checkpoint(&self, stream_id: &str) -> Result<Option<Checkpoint>, CustodyError> {
        let Some(tail) = self.store.last_event(stream_id)? else {
            return Ok(None);
        };
        let checkpoint = Self::checkpoint_of(&tail);
        match self.store.insert_checkpoint(&checkpoint) {
            Ok(()) | Err(StorageError::Duplicate(_)) => {
                info!(height = checkpoint.height, "checkpoint written");
                Ok(Some(checkpoint))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replays `stream_id` between `from` and `to` (inclusive) and checks
    /// every link and hash.
    ///
    /// A partial range starts from the nearest checkpoint at or below
    /// `from`; checkpoints inside the replayed range must match the
    /// events they point at.
    #[instrument(skip(self))]
    pub fn verify_integrity(
        &self,
        stream_id: &str,
        from: Option<u64>,
        to: Option<u64>,
    ) -> Result<IntegrityReport, CustodyError> {
        let from = from.unwrap_or(0);
        if let Some(to) = to {
            if from > to {
                return Err(CustodyError::Validation(format!(
                    "empty range {}..={}",
                    from, to
                )));
            }
        }

        let checkpoints = self.store.checkpoints(stream_id)?;
        let anchor = if from == 0 {
            None
        } else {
            checkpoints.iter().rev().find(|cp| cp.height <= from)
        };
        let start = anchor.map(|cp| cp.height).unwrap_or(0);
        let upper = to.unwrap_or(u64::MAX);
        let attested: BTreeMap<u64, &str> = checkpoints
            .iter()
            .filter(|cp| cp.height >= start && cp.height <= upper)
            .map(|cp| (cp.height, cp.event_hash.as_str()))
            .collect();

        let events = self.store.read_events(stream_id, start, to)?;

        let mut report = IntegrityReport {
            stream_id: stream_id.to_string(),
            valid: true,
            first_invalid_height: None,
            events_checked: 0,
            anchor_height: anchor.map(|cp| cp.height),
        };

        // Anchored replay trusts the checkpoint for the anchor's own link
        let mut expected_prev: Option<String> = match anchor {
            Some(_) => None,
            None => Some(GENESIS_HASH.to_string()),
        };
        let mut expected_height = start;

        for event in &events {
            report.events_checked += 1;

            if event.block_height != expected_height {
                report.first_invalid_height = Some(expected_height);
                break;
            }
            if let Some(prev) = &expected_prev {
                if &event.previous_hash != prev {
                    report.first_invalid_height = Some(event.block_height);
                    break;
                }
            }
            match compute_event_hash(event) {
                Ok(hash) if hash == event.event_hash => {}
                _ => {
                    report.first_invalid_height = Some(event.block_height);
                    break;
                }
            }
            if let Some(attested_hash) = attested.get(&event.block_height) {
                if *attested_hash != event.event_hash {
                    report.first_invalid_height = Some(event.block_height);
                    break;
                }
            }

            expected_prev = Some(event.event_hash.clone());
            expected_height = event.block_height + 1;
        }

        if report.first_invalid_height.is_none() {
            // A checkpoint past the last event means the tail was removed
            if let Some((&height, _)) = attested.range(expected_height..).next() {
                report.first_invalid_height = Some(expected_height.min(height));
            } else if anchor.is_some() && events.is_empty() {
                report.first_invalid_height = Some(start);
            }
        }

        report.valid = report.first_invalid_height.is_none();
        if report.valid {
            info!(events_checked = report.events_checked, anchor = ?report.anchor_height, "audit chain verified");
        } else {
            warn!(
                target: "audit",
                stream = %stream_id,
                first_invalid_height = ?report.first_invalid_height,
                "audit chain failed verification"
            );
        }
        Ok(report)
    }

    /// Appends an `integrity_check` event summarizing `report`.
    pub async fn record_integrity_check(
        &self,
        stream_id: &str,
        actor: &CallerIdentity,
        report: &IntegrityReport,
    ) -> Result<AuditEvent, CustodyError> {
        let mut record = AuditRecord::new(EventType::IntegrityCheck, actor, &report.stream_id)
            .with_action("verify_integrity")
            .with_result(if report.valid {
                AuditOutcome::Success
            } else {
                AuditOutcome::Error
            })
            .with_metadata("events_checked", report.events_checked.to_string());
        if let Some(height) = report.first_invalid_height {
            record = record.with_metadata("first_invalid_height", height.to_string());
        }
        if let Some(height) = report.anchor_height {
            record = record.with_metadata("anchor_height", height.to_string());
        }
        self.append(stream_id, record).await
    }

    /// Returns events matching `query`, oldest first.
    pub fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, CustodyError> {
        let stream = query
            .stream_id
            .as_deref()
            .unwrap_or(&self.config.stream_id);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(self
            .store
            .read_events(stream, 0, None)?
            .into_iter()
            .filter(|event| query.matches(event))
            .take(limit)
            .collect())
    }
}
