// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Read-only audit queries.

use chrono::{DateTime, Utc};

use super::event::{AuditEvent, EventType};

/// Filter over one stream. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Stream to search; the trail's default stream if unset.
    pub stream_id: Option<String>,
    pub actor_id: Option<String>,
    pub target_id: Option<String>,
    pub event_type: Option<EventType>,
    /// Inclusive lower bound on the event timestamp.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the event timestamp.
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of events returned, oldest first.
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `event` passes every set filter.
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(actor) = &self.actor_id {
            if &event.actor_id != actor {
                return false;
            }
        }
        if let Some(target) = &self.target_id {
            if &event.target_id != target {
                return false;
            }
        }
        if let Some(event_type) = self.event_type {
            if event.event_type != event_type {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp >= until {
                return false;
            }
        }
        true
    }
}
