//! Ciphertext envelope recognition.
//!
//! The interception layer treats a string as already-encrypted iff it
//! matches one of four textual shapes:
//!
//! * `hub:{uuid}:{base64(IV||CT||TAG)}`
//! * `kms:{uuid}:{base64(EDK)}:{base64(IV||CT||TAG)}`
//! * `vault:{alias}:v{n}:{data}`
//! * legacy: a pure base64 string whose decoded prefix is a hyphenated UUID
//!   and whose decoded length is at least 64 bytes
//!
//! A mixed form `PLAIN::ENC::CIPHER` is also recognized; detection examines
//! the suffix after the last `::ENC::` marker only.
//!
//! Recognition is format-level only.  Values that pass are never sent to the
//! Engine for a second encryption.

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Marker separating a plaintext prefix from a ciphertext suffix in the
/// mixed form.
pub const MIXED_MARKER: &str = "::ENC::";

/// Minimum decoded payload for the `hub:`/`kms:` shapes: 12-byte IV plus a
/// 16-byte tag, i.e. a non-empty GCM payload.
const MIN_PAYLOAD_LEN: usize = 28;

/// Minimum decoded length for the legacy shape: a 36-byte UUID prefix plus
/// at least one AES block of payload.
const MIN_LEGACY_LEN: usize = 64;

/// Whether the value is recognized as ciphertext.
pub fn is_ciphertext(value: &str) -> bool {
    let candidate = match value.rfind(MIXED_MARKER) {
        Some(idx) => &value[idx + MIXED_MARKER.len()..],
        None => value,
    };
    is_hub_envelope(candidate)
        || is_kms_envelope(candidate)
        || is_vault_envelope(candidate)
        || is_legacy_envelope(candidate)
}

fn is_hub_envelope(value: &str) -> bool {
    let mut parts = value.splitn(3, ':');
    let (Some(tag), Some(uuid), Some(payload)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if tag != "hub" || !is_hyphenated_uuid(uuid) {
        return false;
    }
    decoded_len(payload).is_some_and(|len| len >= MIN_PAYLOAD_LEN)
}

fn is_kms_envelope(value: &str) -> bool {
    let mut parts = value.splitn(4, ':');
    let (Some(tag), Some(uuid), Some(edk), Some(payload)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if tag != "kms" || !is_hyphenated_uuid(uuid) {
        return false;
    }
    decoded_len(edk).is_some_and(|len| len > 0)
        && decoded_len(payload).is_some_and(|len| len >= MIN_PAYLOAD_LEN)
}

fn is_vault_envelope(value: &str) -> bool {
    let mut parts = value.splitn(4, ':');
    let (Some(tag), Some(alias), Some(version), Some(data)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if tag != "vault" || alias.is_empty() || data.is_empty() {
        return false;
    }
    match version.strip_prefix('v') {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn is_legacy_envelope(value: &str) -> bool {
    let Ok(decoded) = STANDARD.decode(value) else {
        return false;
    };
    if decoded.len() < MIN_LEGACY_LEN {
        return false;
    }
    match std::str::from_utf8(&decoded[..36]) {
        Ok(prefix) => is_hyphenated_uuid(prefix),
        Err(_) => false,
    }
}

fn decoded_len(value: &str) -> Option<usize> {
    STANDARD.decode(value).ok().map(|bytes| bytes.len())
}

/// 36-character hyphenated UUID check (8-4-4-4-12, lower or upper hex).
fn is_hyphenated_uuid(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if *b != b'-' {
                    return false;
                }
            }
            _ => {
                if !b.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}
