//! Wire types and response parsing for the Engine API.
//!
//! Parsing lives here as pure functions over `(status, body)` so the
//! tolerance rules are testable without HTTP:
//!
//! * a successful envelope carries `data` either as a raw string or as an
//!   object holding `encryptedData`/`decryptedData` — both yield the inner
//!   string;
//! * the not-encrypted sentinel anywhere in a decrypt response body wins
//!   over every other interpretation, HTTP status included.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use dadp_domain::error::{Error, Result};

use crate::DecryptOutcome;

/// The Engine's distinguished "data is not encrypted" message.
pub const NOT_ENCRYPTED_SENTINEL: &str = "데이터가 암호화되지 않았습니다";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EncryptRequest<'a> {
    pub data: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<&'a str>,
    #[serde(skip_serializing_if = "is_false")]
    pub for_search: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DecryptRequest<'a> {
    pub encrypted_data: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_policy_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_policy_uid: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchRequest<T> {
    pub items: Vec<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EncryptBatchItemWire<'a> {
    pub data: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DecryptBatchItemWire<'a> {
    pub data: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_policy_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_policy_uid: Option<&'a str>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchEnvelope {
    #[serde(default)]
    results: Vec<BatchResultWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchResultWire {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    encrypted_data: Option<String>,
    #[serde(default)]
    decrypted_data: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    original_data: Option<String>,
}

/// Extract the inner string from an envelope `data` value, accepting both
/// the raw-string and the object form.
fn inner_string(data: &Value) -> Option<String> {
    match data {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("encryptedData")
            .or_else(|| map.get("decryptedData"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn parse_encrypt_body(status: u16, body: &str) -> Result<String> {
    if !(200..300).contains(&status) {
        return Err(Error::engine_connection(format!(
            "encrypt returned {status}: {}",
            snippet(body)
        )));
    }
    let envelope: ApiEnvelope = serde_json::from_str(body)
        .map_err(|e| Error::engine_connection(format!("malformed encrypt response: {e}")))?;
    if !envelope.success {
        return Err(Error::engine_policy(
            envelope.message.unwrap_or_else(|| "encrypt rejected".into()),
        ));
    }
    envelope
        .data
        .as_ref()
        .and_then(inner_string)
        .ok_or_else(|| Error::engine_policy("encrypt response carried no data"))
}

pub(crate) fn parse_decrypt_body(status: u16, body: &str) -> Result<DecryptOutcome> {
    // The sentinel wins regardless of status or envelope shape.
    if body.contains(NOT_ENCRYPTED_SENTINEL) {
        return Ok(DecryptOutcome::NotEncrypted);
    }
    if !(200..300).contains(&status) {
        return Err(Error::engine_connection(format!(
            "decrypt returned {status}: {}",
            snippet(body)
        )));
    }
    let envelope: ApiEnvelope = serde_json::from_str(body)
        .map_err(|e| Error::engine_connection(format!("malformed decrypt response: {e}")))?;

    let data = envelope.data.as_ref().and_then(inner_string);
    if envelope.success {
        return data
            .map(DecryptOutcome::Plaintext)
            .ok_or_else(|| Error::engine_policy("decrypt response carried no data"));
    }
    // Mask convention: rejected envelope that still carries a view.
    match data {
        Some(view) if !view.is_empty() => Ok(DecryptOutcome::Masked(view)),
        _ => Err(Error::engine_policy(
            envelope.message.unwrap_or_else(|| "decrypt rejected".into()),
        )),
    }
}

pub(crate) fn parse_encrypt_batch_body(
    status: u16,
    body: &str,
    expected: usize,
) -> Result<Vec<Option<String>>> {
    if !(200..300).contains(&status) {
        return Err(Error::engine_connection(format!(
            "encrypt/batch returned {status}: {}",
            snippet(body)
        )));
    }
    let envelope: BatchEnvelope = serde_json::from_str(body)
        .map_err(|e| Error::engine_connection(format!("malformed encrypt/batch response: {e}")))?;
    if envelope.results.len() != expected {
        return Err(Error::engine_policy(format!(
            "encrypt/batch returned {} results for {expected} items",
            envelope.results.len()
        )));
    }
    Ok(envelope
        .results
        .into_iter()
        .map(|r| if r.success { r.encrypted_data } else { None })
        .collect())
}

pub(crate) fn parse_decrypt_batch_body(
    status: u16,
    body: &str,
    expected: usize,
) -> Result<Vec<DecryptOutcome>> {
    if !(200..300).contains(&status) {
        return Err(Error::engine_connection(format!(
            "decrypt/batch returned {status}: {}",
            snippet(body)
        )));
    }
    let envelope: BatchEnvelope = serde_json::from_str(body)
        .map_err(|e| Error::engine_connection(format!("malformed decrypt/batch response: {e}")))?;
    if envelope.results.len() != expected {
        return Err(Error::engine_policy(format!(
            "decrypt/batch returned {} results for {expected} items",
            envelope.results.len()
        )));
    }
    Ok(envelope
        .results
        .into_iter()
        .map(|r| match (r.success, r.decrypted_data) {
            (true, Some(plain)) => DecryptOutcome::Plaintext(plain),
            // Mask convention, same as the single-value path.
            (false, Some(view)) if !view.is_empty() => DecryptOutcome::Masked(view),
            _ => DecryptOutcome::NotEncrypted,
        })
        .collect())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use dadp_domain::error::EngineErrorKind;

    fn engine_kind(err: Error) -> EngineErrorKind {
        match err {
            Error::Engine { kind, .. } => kind,
            other => panic!("expected engine error, got {other:?}"),
        }
    }

    #[test]
    fn encrypt_accepts_raw_string_data() {
        let body = r#"{"success":true,"data":"hub:cipher"}"#;
        assert_eq!(parse_encrypt_body(200, body).unwrap(), "hub:cipher");
    }

    #[test]
    fn encrypt_accepts_object_data() {
        let body = r#"{"success":true,"data":{"encryptedData":"hub:cipher"}}"#;
        assert_eq!(parse_encrypt_body(200, body).unwrap(), "hub:cipher");
    }

    #[test]
    fn encrypt_failure_is_policy_class() {
        let body = r#"{"success":false,"message":"unknown policy"}"#;
        assert_eq!(
            engine_kind(parse_encrypt_body(200, body).unwrap_err()),
            EngineErrorKind::Policy
        );
    }

    #[test]
    fn encrypt_non_2xx_is_connection_class() {
        assert_eq!(
            engine_kind(parse_encrypt_body(503, "unavailable").unwrap_err()),
            EngineErrorKind::Connection
        );
    }

    #[test]
    fn decrypt_accepts_both_data_shapes() {
        let raw = r#"{"success":true,"data":"bob@example.com"}"#;
        assert_eq!(
            parse_decrypt_body(200, raw).unwrap(),
            DecryptOutcome::Plaintext("bob@example.com".into())
        );

        let object = r#"{"success":true,"data":{"decryptedData":"bob@example.com"}}"#;
        assert_eq!(
            parse_decrypt_body(200, object).unwrap(),
            DecryptOutcome::Plaintext("bob@example.com".into())
        );
    }

    #[test]
    fn sentinel_is_not_an_error_regardless_of_status() {
        let body = format!(r#"{{"success":false,"message":"{NOT_ENCRYPTED_SENTINEL}"}}"#);
        assert_eq!(parse_decrypt_body(200, &body).unwrap(), DecryptOutcome::NotEncrypted);
        assert_eq!(parse_decrypt_body(400, &body).unwrap(), DecryptOutcome::NotEncrypted);
        assert_eq!(parse_decrypt_body(500, &body).unwrap(), DecryptOutcome::NotEncrypted);
    }

    #[test]
    fn mask_convention_yields_masked_view() {
        let body = r#"{"success":false,"data":{"decryptedData":"b**@example.com"}}"#;
        assert_eq!(
            parse_decrypt_body(200, body).unwrap(),
            DecryptOutcome::Masked("b**@example.com".into())
        );
    }

    #[test]
    fn decrypt_failure_without_view_is_policy_class() {
        let body = r#"{"success":false,"message":"bad cipher"}"#;
        assert_eq!(
            engine_kind(parse_decrypt_body(200, body).unwrap_err()),
            EngineErrorKind::Policy
        );
    }

    #[test]
    fn encrypt_batch_maps_by_index() {
        let body = r#"{"results":[
            {"success":true,"encryptedData":"c0"},
            {"success":false,"originalData":"plain"},
            {"success":true,"encryptedData":"c2"}
        ]}"#;
        assert_eq!(
            parse_encrypt_batch_body(200, body, 3).unwrap(),
            vec![Some("c0".into()), None, Some("c2".into())]
        );
    }

    #[test]
    fn batch_count_mismatch_is_rejected() {
        let body = r#"{"results":[{"success":true,"encryptedData":"c0"}]}"#;
        assert_eq!(
            engine_kind(parse_encrypt_batch_body(200, body, 2).unwrap_err()),
            EngineErrorKind::Policy
        );
        let body = r#"{"results":[{"success":true,"decryptedData":"p0"}]}"#;
        assert_eq!(
            engine_kind(parse_decrypt_batch_body(200, body, 3).unwrap_err()),
            EngineErrorKind::Policy
        );
    }

    #[test]
    fn decrypt_batch_distinguishes_outcomes() {
        let body = r#"{"results":[
            {"success":true,"decryptedData":"p0"},
            {"success":false,"decryptedData":"m**1"},
            {"success":false,"originalData":"legacy"}
        ]}"#;
        assert_eq!(
            parse_decrypt_batch_body(200, body, 3).unwrap(),
            vec![
                DecryptOutcome::Plaintext("p0".into()),
                DecryptOutcome::Masked("m**1".into()),
                DecryptOutcome::NotEncrypted,
            ]
        );
    }

    #[test]
    fn request_wire_shape_skips_absent_fields() {
        let req = EncryptRequest {
            data: "v",
            policy_name: None,
            for_search: false,
        };
        assert_eq!(serde_json::to_string(&req).unwrap(), r#"{"data":"v"}"#);

        let req = DecryptRequest {
            encrypted_data: "c",
            policy_name: Some("p1"),
            mask_policy_name: Some("m1"),
            mask_policy_uid: None,
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"encryptedData":"c","policyName":"p1","maskPolicyName":"m1"}"#
        );
    }
}
