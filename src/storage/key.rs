// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Record key encoding for the RocksDB backend.
//!
//! Every record lives in one keyspace, separated by a one-byte table tag.
//! Variable-length components are length-prefixed so that a component can
//! never run into the next one, and integers are big-endian so that byte
//! order matches numeric order.
//!
//! ```text
//! event       a ‖ len:u32 ‖ stream ‖ height:u64
//! checkpoint  c ‖ len:u32 ‖ stream ‖ height:u64
//! key         k ‖ key_id
//! key version v ‖ key_type:u8 ‖ version:u32
//! entry       e ‖ token
//! fingerprint f ‖ context:u8 ‖ fingerprint
//! sweep       s ‖ from_key_id
//! ```

use crate::keys::KeyType;
use crate::vault::TokenContext;

use super::StorageError;

pub(crate) const TAG_EVENT: u8 = b'a';
pub(crate) const TAG_CHECKPOINT: u8 = b'c';
pub(crate) const TAG_KEY: u8 = b'k';
pub(crate) const TAG_KEY_VERSION: u8 = b'v';
pub(crate) const TAG_ENTRY: u8 = b'e';
pub(crate) const TAG_FINGERPRINT: u8 = b'f';
pub(crate) const TAG_SWEEP: u8 = b's';

/// Returns the prefix shared by all height-ordered records of a stream.
#[inline]
pub fn stream_prefix(tag: u8, stream_id: &str) -> Vec<u8> {
    let bytes = stream_id.as_bytes();
    let mut prefix = Vec::with_capacity(1 + 4 + bytes.len() + 8);
    prefix.push(tag);
    prefix.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    prefix.extend_from_slice(bytes);
    prefix
}

/// Encodes the key of a height-ordered stream record.
#[inline]
pub fn encode_stream_key(tag: u8, stream_id: &str, height: u64) -> Vec<u8> {
    let mut key = stream_prefix(tag, stream_id);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

/// Decodes a stream record key back into stream id and height.
pub fn decode_stream_key(encoded: &[u8]) -> Result<(String, u64), StorageError> {
    if encoded.len() < 5 {
        return Err(StorageError::InvalidKeyEncoding(
            "key too short for length prefix".to_string(),
        ));
    }

    let len = u32::from_be_bytes([encoded[1], encoded[2], encoded[3], encoded[4]]) as usize;
    let expected = 1 + 4 + len + 8;
    if encoded.len() != expected {
        return Err(StorageError::InvalidKeyEncoding(format!(
            "expected {} bytes, got {}",
            expected,
            encoded.len()
        )));
    }

    let stream = std::str::from_utf8(&encoded[5..5 + len])
        .map_err(|e| StorageError::InvalidKeyEncoding(e.to_string()))?
        .to_string();
    let mut height = [0u8; 8];
    height.copy_from_slice(&encoded[5 + len..]);
    Ok((stream, u64::from_be_bytes(height)))
}

/// Encodes a record keyed by a single string id.
#[inline]
pub fn id_key(tag: u8, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + id.len());
    key.push(tag);
    key.extend_from_slice(id.as_bytes());
    key
}

fn key_type_tag(key_type: KeyType) -> u8 {
    match key_type {
        KeyType::TokenizationData => 1,
        KeyType::Fingerprint => 2,
    }
}

fn context_tag(context: TokenContext) -> u8 {
    match context {
        TokenContext::PaymentCard => 1,
        TokenContext::Ssn => 2,
        TokenContext::Email => 3,
        TokenContext::Generic => 4,
    }
}

/// Returns the prefix of the version index of a key type.
#[inline]
pub fn key_version_prefix(key_type: KeyType) -> Vec<u8> {
    vec![TAG_KEY_VERSION, key_type_tag(key_type)]
}

/// Encodes the unique `(key_type, version)` index entry.
#[inline]
pub fn key_version_key(key_type: KeyType, version: u32) -> Vec<u8> {
    let mut key = key_version_prefix(key_type);
    key.extend_from_slice(&version.to_be_bytes());
    key
}

/// Encodes the unique `(context, fingerprint)` dedup index entry.
#[inline]
pub fn fingerprint_key(context: TokenContext, fingerprint: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + fingerprint.len());
    key.push(TAG_FINGERPRINT);
    key.push(context_tag(context));
    key.extend_from_slice(fingerprint.as_bytes());
    key
}

/// Returns the first key strictly after every key starting with `prefix`.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_key_decodes() {
        let encoded = encode_stream_key(TAG_EVENT, "custody", 42);
        let (stream, height) = decode_stream_key(&encoded).unwrap();
        assert_eq!(stream, "custody");
        assert_eq!(height, 42);
    }

    #[test]
    fn test_heights_sort_numerically() {
        let a = encode_stream_key(TAG_EVENT, "s", 255);
        let b = encode_stream_key(TAG_EVENT, "s", 256);
        assert!(a < b);
    }

    #[test]
    fn test_streams_do_not_interleave() {
        // "ab" must not share a prefix with "a" followed by height bytes
        let short = stream_prefix(TAG_EVENT, "a");
        let long = encode_stream_key(TAG_EVENT, "ab", 0);
        assert!(!long.starts_with(&short));
    }

    #[test]
    fn test_tables_do_not_overlap() {
        let event = encode_stream_key(TAG_EVENT, "s", 0);
        let checkpoint = encode_stream_key(TAG_CHECKPOINT, "s", 0);
        assert!(!event.starts_with(&stream_prefix(TAG_CHECKPOINT, "s")));
        assert!(!checkpoint.starts_with(&stream_prefix(TAG_EVENT, "s")));
    }

    #[test]
    fn test_decode_too_short() {
        assert!(decode_stream_key(&[TAG_EVENT, 0, 0]).is_err());
    }

    #[test]
    fn test_decode_wrong_length() {
        assert!(decode_stream_key(&[TAG_EVENT, 0, 0, 0, 5, 1, 2, 3]).is_err());
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(&[1, 2]), Some(vec![1, 3]));
        assert_eq!(prefix_end(&[1, 0xff]), Some(vec![2]));
        assert_eq!(prefix_end(&[0xff, 0xff]), None);
    }

    #[test]
    fn test_versions_sort_within_type() {
        let v2 = key_version_key(KeyType::TokenizationData, 2);
        let v10 = key_version_key(KeyType::TokenizationData, 10);
        assert!(v2 < v10);
        assert!(v10.starts_with(&key_version_prefix(KeyType::TokenizationData)));
        assert!(!v10.starts_with(&key_version_prefix(KeyType::Fingerprint)));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn height_order_is_byte_order(
            stream in "[a-z]{1,12}",
            a in any::<u64>(),
            b in any::<u64>(),
        ) {
            let ka = encode_stream_key(TAG_EVENT, &stream, a);
            let kb = encode_stream_key(TAG_EVENT, &stream, b);
            prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }

        #[test]
        fn prefix_is_prefix(stream in "\\PC{0,20}", height in any::<u64>()) {
            let key = encode_stream_key(TAG_CHECKPOINT, &stream, height);
            prop_assert!(key.starts_with(&stream_prefix(TAG_CHECKPOINT, &stream)));
        }
    }
}
