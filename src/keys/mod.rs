// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Envelope key management.
//!
//! Tokenization and fingerprint keys are data keys (DEKs) wrapped by a
//! [`MasterKeyAuthority`](crate::security::MasterKeyAuthority). Each key
//! moves through a one-way lifecycle:
//!
//! ```text
//! Active ──► Retiring ──► Retired ──► Expired
//!   (encrypt)   (decrypt)    (decrypt,    (material
//!                             grace)       discarded)
//! ```
//!
//! At most one key per type is active. Rotation demotes the active key
//! and installs its successor atomically.

mod manager;
mod policy;
mod types;

pub use manager::{KeyManager, RewrapResult};
pub use policy::KeyPolicy;
pub use types::{EncryptionKey, KeyAlgorithm, KeyStatus, KeyType};
