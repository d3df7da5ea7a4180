// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stable device identity.
//
// The proxy identifies its output device to the infrastructure printer by
// a URN UUID derived from the device URI, so the same device keeps the
// same identity across restarts and re-registrations.

use sha2::{Digest, Sha256};

/// Derive the output-device UUID URN for a device URI.
///
/// The URN is built from bytes 16..31 of the SHA-256 hash of the URI,
/// with the UUID version nibble forced to 3 and the variant bits to `10`.
/// A missing device URI hashes `file://<hostname>/dev/null` instead.
pub fn device_uuid(device_uri: Option<&str>) -> String {
    let fallback;
    let uri = match device_uri {
        Some(uri) => uri,
        None => {
            let host = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string());
            fallback = format!("file://{host}/dev/null");
            &fallback
        }
    };

    let hash = Sha256::digest(uri.as_bytes());

    format!(
        "urn:uuid:{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        hash[16],
        hash[17],
        hash[18],
        hash[19],
        hash[20],
        hash[21],
        (hash[22] & 0x0f) | 0x30,
        hash[23],
        (hash[24] & 0x3f) | 0x80,
        hash[25],
        hash[26],
        hash[27],
        hash[28],
        hash[29],
        hash[30],
        hash[31],
    )
}
