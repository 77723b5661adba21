// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! LedgerVault: secure data custody with a hash-chained audit ledger, a tokenization vault and envelope key management
//!
//! This crate provides the components for holding sensitive values so
//! that every release of plaintext and every key change is provably
//! recorded before it takes effect.

pub mod audit;
pub mod config;
pub mod custody;
pub mod error;
pub mod identity;
pub mod keys;
pub mod security;
pub mod storage;
pub mod vault;

pub use audit::{
    AuditConfig, AuditEvent, AuditOutcome, AuditQuery, AuditRecord, AuditTrail, Checkpoint,
    EventType, IntegrityReport,
};
pub use config::CustodyConfig;
pub use custody::Custody;
pub use error::CustodyError;
pub use identity::{ActorType, CallerIdentity};
pub use keys::{EncryptionKey, KeyManager, KeyPolicy, KeyStatus, KeyType};
pub use security::{LocalKms, MasterKeyAuthority, SecurityError};
pub use storage::{CustodyStore, MemoryStore, RocksStore, StorageError};
pub use vault::{
    AuthorizationPolicy, DedupPolicy, StaticPolicy, SweepMode, TokenContext, TokenVault,
    TokenizeResult, VaultConfig,
};
