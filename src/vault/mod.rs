// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Tokenization vault.
//!
//! Sensitive values are validated, normalized and encrypted under the
//! active data key; callers get back a random token and a masked form.
//! Detokenization is authorized per purpose and audited before the
//! plaintext is released.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ledgervault::audit::{AuditConfig, AuditTrail};
//! use ledgervault::identity::{ActorType, CallerIdentity};
//! use ledgervault::keys::{KeyManager, KeyPolicy};
//! use ledgervault::security::LocalKms;
//! use ledgervault::storage::MemoryStore;
//! use ledgervault::vault::{StaticPolicy, TokenContext, TokenVault, VaultConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryStore::new());
//!     let audit = AuditTrail::new(Arc::clone(&store), AuditConfig::default());
//!     let kms = Arc::new(LocalKms::generate().expect("failed to generate KMS"));
//!     let keys = Arc::new(KeyManager::new(Arc::clone(&store), kms, audit.clone(), KeyPolicy::default()));
//!     let policy = Arc::new(StaticPolicy::new().allow("support", "refund"));
//!     let vault = TokenVault::new(store, keys, audit, policy, VaultConfig::default());
//!
//!     let agent = CallerIdentity::new("agent-7", ActorType::User).with_role("support");
//!     vault.initialize(&agent).await.expect("init failed");
//!
//!     let result = vault
//!         .tokenize("4111 1111 1111 1111", TokenContext::PaymentCard, &agent)
//!         .await
//!         .expect("tokenize failed");
//!     assert_eq!(result.masked_value, "411111******1111");
//!
//!     let card = vault
//!         .detokenize(&result.token, &agent, "refund")
//!         .await
//!         .expect("detokenize failed");
//!     assert_eq!(card.as_str(), "4111111111111111");
//! }
//! ```

mod config;
mod context;
mod entry;
mod policy;
mod sweep;
#[allow(clippy::module_inception)]
mod vault;

pub use config::{DedupPolicy, SweepMode, VaultConfig};
pub use context::{MaskingRule, TokenContext};
pub use entry::{
    generate_token, is_well_formed_token, payload_aad, SweepCheckpoint, TokenizeResult,
    VaultEntry, TOKEN_PREFIX,
};
pub use policy::{AuthorizationPolicy, StaticPolicy};
pub use sweep::{SweepHandle, SweepReport};
pub use vault::TokenVault;
