// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Lowercase hex encoding for hashes, fingerprints and tokens.

use super::error::SecurityError;

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

/// Encodes bytes as lowercase hex.
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX_CHARS[(b >> 4) as usize] as char);
        out.push(HEX_CHARS[(b & 0x0f) as usize] as char);
    }
    out
}

/// Decodes a hex string to bytes.
pub fn hex_decode(hex: &str) -> Result<Vec<u8>, SecurityError> {
    if hex.len() % 2 != 0 {
        return Err(SecurityError::InvalidHex("odd length".into()));
    }
    if !hex.is_ascii() {
        return Err(SecurityError::InvalidHex("non-ascii input".into()));
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| SecurityError::InvalidHex(format!("bad digit at offset {}", i)))
        })
        .collect()
}
