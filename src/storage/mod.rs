// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Durable storage for audit streams, keys and vault entries.
//!
//! The custody components depend only on the [`AuditStore`],
//! [`KeyStore`] and [`VaultStore`] contracts. Two backends are provided:
//!
//! - [`MemoryStore`]: in-process maps, with write failure injection
//! - [`RocksStore`]: RocksDB pessimistic transactions, records as JSON
//!
//! # Example
//!
//! ```no_run
//! use ledgervault::storage::{AuditStore, RocksStore};
//! use std::path::Path;
//!
//! let store = RocksStore::open(Path::new("/tmp/ledgervault")).unwrap();
//! match store.last_event("custody").unwrap() {
//!     Some(event) => println!("tail at height {}", event.block_height),
//!     None => println!("empty stream"),
//! }
//! ```

mod error;
mod key;
mod memory;
mod rocks;
mod store;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use rocks::{DurabilityMode, RocksStore};
pub use store::{AuditStore, CustodyStore, KeyStore, VaultStore};
