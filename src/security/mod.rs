// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Cryptographic building blocks for the custody subsystem.
//!
//! Provides envelope encryption against a pluggable master-key
//! authority, authenticated payload encryption and keyed fingerprints.
//!
//! # Key Hierarchy
//!
//! - **KEK (Key Encryption Key)**: Master key held by the authority, used to wrap DEKs
//! - **DEK (Data Encryption Key)**: Tokenization and fingerprint keys, stored only wrapped
//!
//! This two-tier hierarchy keeps the master key away from every
//! operation that touches vault payloads.
//!
//! # Example
//!
//! ```rust,no_run
//! use ledgervault::security::{LocalKms, MasterKeyAuthority};
//!
//! #[tokio::main]
//! async fn main() {
//!     let kms = LocalKms::generate().expect("failed to generate KMS");
//!
//!     let wrapped = kms.wrap(&[0u8; 32]).await.expect("failed to wrap");
//!     let material = kms
//!         .unwrap(&wrapped.ciphertext, &wrapped.master_key_id)
//!         .await
//!         .expect("failed to unwrap");
//!     assert_eq!(material.len(), 32);
//! }
//! ```

#[cfg(feature = "aws-kms")]
mod aws_kms;
mod encryption;
mod error;
mod fingerprint;
mod hex;
mod kms;
mod local_kms;

#[cfg(feature = "aws-kms")]
pub use aws_kms::AwsKms;
pub use encryption::PayloadCipher;
pub use error::SecurityError;
pub use fingerprint::{keyed_fingerprint, sha256};
pub use hex::{hex_decode, hex_encode};
pub use kms::{
    DataEncryptionKey, MasterKeyAuthority, WrappedMaterial, AES_256_KEY_SIZE, AES_GCM_NONCE_SIZE,
    AES_GCM_TAG_SIZE,
};
pub use local_kms::LocalKms;
