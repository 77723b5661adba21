// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Canonical event encoding and chain hashing.
//!
//! Format (version 1, frozen):
//!
//! ```text
//! ┌──────────────────┬─────────┬─────────────────────────────────────────┐
//! │ prev hash (32)   │ 0x01    │ fields                                  │
//! └──────────────────┴─────────┴─────────────────────────────────────────┘
//! fields = stream_id, block_height:u64 BE, timestamp:i64 BE micros,
//!          event_type, actor_id, actor_type, target_id, action, result,
//!          description, metadata
//! string = len:u32 BE ‖ utf-8 bytes
//! metadata = count:u32 BE ‖ (key, value)* in ascending key order
//! ```
//!
//! Changing this layout invalidates every stored chain.

use chrono::{DateTime, TimeZone, Utc};

use crate::security::{hex_decode, hex_encode, sha256, SecurityError};

use super::event::AuditEvent;

/// Previous hash of the first event in every stream.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Version byte of the canonical layout.
pub const CANONICAL_VERSION: u8 = 1;

#[inline]
fn put_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
}

/// Encodes every field of `event` except the two hashes.
pub fn canonical_fields(event: &AuditEvent) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    buf.push(CANONICAL_VERSION);
    put_str(&mut buf, &event.stream_id);
    buf.extend_from_slice(&event.block_height.to_be_bytes());
    buf.extend_from_slice(&event.timestamp.timestamp_micros().to_be_bytes());
    put_str(&mut buf, event.event_type.as_str());
    put_str(&mut buf, &event.actor_id);
    put_str(&mut buf, event.actor_type.as_str());
    put_str(&mut buf, &event.target_id);
    put_str(&mut buf, &event.action);
    put_str(&mut buf, event.result.as_str());
    put_str(&mut buf, &event.description);
    buf.extend_from_slice(&(event.metadata.len() as u32).to_be_bytes());
    // BTreeMap iterates in ascending key order
    for (key, value) in &event.metadata {
        put_str(&mut buf, key);
        put_str(&mut buf, value);
    }
    buf
}

/// Computes the hash `event` should carry, chained from its `previous_hash`.
///
/// Fails if `previous_hash` is not 32 bytes of hex.
pub fn compute_event_hash(event: &AuditEvent) -> Result<String, SecurityError> {
    let previous = hex_decode(&event.previous_hash)?;
    if previous.len() != 32 {
        return Err(SecurityError::InvalidKeyLength {
            expected: 32,
            got: previous.len(),
        });
    }
    let fields = canonical_fields(event);
    Ok(hex_encode(&sha256(&[&previous, &fields])))
}

/// Truncates a timestamp to the microsecond precision the encoding keeps.
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    let micros = ts.timestamp_micros();
    Utc.timestamp_micros(micros).single().unwrap_or(ts)
}
