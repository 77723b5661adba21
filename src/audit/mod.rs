// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Immutable, hash-chained audit trail.
//!
//! Every custody operation that releases data or changes keys is
//! recorded here before it completes. Each event carries the hash of
//! its predecessor, so any edit, insertion or removal of a committed
//! event is detected by [`AuditTrail::verify_integrity`].
//!
//! # Chain Layout
//!
//! ```text
//! height 0            height 1            height 2
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ prev = 0…0   │◄───┤ prev = h0    │◄───┤ prev = h1    │
//! │ hash = h0    │    │ hash = h1    │    │ hash = h2    │
//! └──────────────┘    └──────────────┘    └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ledgervault::audit::{AuditConfig, AuditRecord, AuditTrail, EventType};
//! use ledgervault::identity::{ActorType, CallerIdentity};
//! use ledgervault::storage::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let trail = AuditTrail::new(Arc::new(MemoryStore::new()), AuditConfig::default());
//!     let caller = CallerIdentity::new("ops", ActorType::User);
//!
//!     trail
//!         .append_default(AuditRecord::new(EventType::IntegrityCheck, &caller, "custody"))
//!         .await
//!         .expect("append failed");
//!     assert!(trail.verify_integrity("custody", None, None).unwrap().valid);
//! }
//! ```

mod canonical;
mod config;
mod event;
mod query;
mod trail;

pub use canonical::{canonical_fields, compute_event_hash, CANONICAL_VERSION, GENESIS_HASH};
pub use config::{AuditConfig, DEFAULT_STREAM};
pub use event::{AuditEvent, AuditOutcome, AuditRecord, AuditSeverity, Checkpoint, EventType};
pub use query::AuditQuery;
pub use trail::{AuditTrail, IntegrityReport};
