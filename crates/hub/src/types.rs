//! Wire types and response interpretation for the Hub API.
//!
//! Interpretation is pure over `(status, body)` so the outcome table is
//! testable without HTTP.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use dadp_domain::error::{Error, Result};
use dadp_domain::model::{EndpointRouting, PolicyMapping, PolicySnapshot, SchemaEntry};

use crate::{CheckOutcome, PullOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterRequest<'a> {
    pub instance_id: &'a str,
    /// Deployment shape, reflected verbatim back to the Hub.
    #[serde(rename = "type")]
    pub shape: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SchemaSyncRequest<'a> {
    pub instance_id: &'a str,
    pub schemas: Vec<SchemaSyncRow<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SchemaSyncRow<'a> {
    pub schema_name: &'a str,
    pub table_name: &'a str,
    pub column_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<&'a str>,
}

impl<'a> From<&'a SchemaEntry> for SchemaSyncRow<'a> {
    fn from(entry: &'a SchemaEntry) -> Self {
        Self {
            schema_name: &entry.schema_name,
            table_name: &entry.table_name,
            column_name: &entry.column_name,
            policy_name: entry.policy_name.as_deref(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<RegisterData>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterData {
    hub_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckBody {
    #[serde(default)]
    reregistered: bool,
    #[serde(default)]
    hub_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullBody {
    version: u64,
    #[serde(default)]
    mappings: Vec<PolicyMapping>,
    #[serde(default)]
    endpoint: Option<EndpointRouting>,
}

#[derive(Debug, Deserialize)]
struct AckEnvelope {
    #[serde(default)]
    success: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interpretation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn interpret_register(status: u16, body: &str) -> Result<String> {
    if !(200..300).contains(&status) {
        return Err(Error::Hub(format!("register returned {status}")));
    }
    let envelope: RegisterEnvelope = serde_json::from_str(body)
        .map_err(|e| Error::Hub(format!("malformed register response: {e}")))?;
    if !envelope.success {
        return Err(Error::Hub(
            envelope
                .message
                .unwrap_or_else(|| "registration rejected".into()),
        ));
    }
    envelope
        .data
        .map(|d| d.hub_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Hub("register response carried no hubId".into()))
}

pub(crate) fn interpret_check(status: u16, body: &str) -> Result<CheckOutcome> {
    match status {
        304 => Ok(CheckOutcome::Unchanged),
        404 => Ok(CheckOutcome::UnknownTenant),
        s if (200..300).contains(&s) => {
            // A bare 200 with no parsable body still means "newer version
            // available".
            let parsed: CheckBody = serde_json::from_str(body).unwrap_or_default();
            match (parsed.reregistered, parsed.hub_id) {
                (true, Some(hub_id)) if !hub_id.is_empty() => {
                    Ok(CheckOutcome::Reregistered { hub_id })
                }
                _ => Ok(CheckOutcome::ChangeAvailable),
            }
        }
        s => Err(Error::Hub(format!("mappings/check returned {s}"))),
    }
}

pub(crate) fn interpret_pull(status: u16, body: &str) -> Result<PullOutcome> {
    match status {
        304 => Ok(PullOutcome::NotModified),
        404 => Ok(PullOutcome::UnknownTenant),
        s if (200..300).contains(&s) => {
            let parsed: PullBody = serde_json::from_str(body)
                .map_err(|e| Error::Hub(format!("malformed policies response: {e}")))?;
            Ok(PullOutcome::Snapshot {
                snapshot: PolicySnapshot {
                    version: parsed.version,
                    mappings: parsed.mappings,
                    attributes: Default::default(),
                    updated_at: Utc::now(),
                },
                endpoint: parsed.endpoint,
            })
        }
        s => Err(Error::Hub(format!("policies returned {s}"))),
    }
}

pub(crate) fn interpret_ack(status: u16, body: &str) -> Result<bool> {
    if !(200..300).contains(&status) {
        return Err(Error::Hub(format!("schema/sync returned {status}")));
    }
    let envelope: AckEnvelope = serde_json::from_str(body).unwrap_or(AckEnvelope { success: false });
    Ok(envelope.success)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
