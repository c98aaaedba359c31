//! Control-plane data model.
//!
//! Field names carry `camelCase` serde renames so the same structs serialize
//! into the persisted JSON documents and the Hub wire format unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ident;

/// Path segment reserved for the Hub control plane.  A crypto endpoint whose
/// API base path contains it must never be admitted as a data-plane URL.
pub const HUB_CONTROL_SEGMENT: &str = "/hub/api";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deployment shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The deployment mode.  `Aop` wraps repository/service boundaries in the
/// application runtime; `Wrapper` wraps a database connection.  The value is
/// reflected verbatim back to the Hub in the `type` field of registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    #[serde(rename = "AOP")]
    Aop,
    #[serde(rename = "WRAPPER")]
    Wrapper,
}

impl Shape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::Aop => "AOP",
            Shape::Wrapper => "WRAPPER",
        }
    }

    /// Per-deployment state directory under the home directory.
    pub fn state_dir_name(&self) -> &'static str {
        match self {
            Shape::Aop => ".dadp-aop",
            Shape::Wrapper => ".dadp-wrapper",
        }
    }

    /// Name of the instance-identity document for this shape.
    pub fn config_file_name(&self) -> &'static str {
        match self {
            Shape::Aop => "aop-config.json",
            Shape::Wrapper => "wrapper-config.json",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Instance identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who this deployment is.  `alias` is the caller-chosen label, stable
/// across restarts; `hub_id` is Hub-issued and is the authoritative tenant
/// identifier carried in `X-Tenant` on every outbound control-plane request.
///
/// While `hub_id` is empty, only instance registration may be called.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentity {
    #[serde(default)]
    pub hub_id: Option<String>,
    pub hub_url: String,
    /// Caller-chosen stable label (`instanceId` on the wire and on disk).
    #[serde(rename = "instanceId")]
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_open: Option<bool>,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl InstanceIdentity {
    pub fn new(hub_url: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            hub_id: None,
            hub_url: hub_url.into(),
            alias: alias.into(),
            fail_open: None,
            created_at: Utc::now(),
        }
    }

    /// The tenant identifier, when the Hub has issued one.
    pub fn tenant(&self) -> Option<&str> {
        self.hub_id.as_deref().filter(|id| !id.is_empty())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy mappings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One column-to-policy assignment from the Hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyMapping {
    #[serde(default)]
    pub datasource_id: Option<String>,
    #[serde(default)]
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    pub policy_name: String,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub use_iv: Option<bool>,
    #[serde(default)]
    pub use_plain: Option<bool>,
}

impl PolicyMapping {
    /// Canonical storage key for this mapping (most specific form the
    /// mapping can express).
    pub fn key(&self) -> String {
        ident::mapping_key(
            self.datasource_id.as_deref(),
            Some(&self.schema_name),
            &self.table_name,
            &self.column_name,
        )
    }

    /// Key without the datasource qualifier, matching schema catalog keys.
    pub fn schema_key(&self) -> String {
        ident::schema_key(&self.schema_name, &self.table_name, &self.column_name)
    }
}

/// Per-policy attributes.  Unknown policies resolve to the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAttributes {
    #[serde(default = "d_true")]
    pub use_iv: bool,
    #[serde(default)]
    pub use_plain: bool,
}

impl Default for PolicyAttributes {
    fn default() -> Self {
        Self {
            use_iv: true,
            use_plain: false,
        }
    }
}

fn d_true() -> bool {
    true
}

/// A version-stamped policy snapshot as pulled from the Hub.  Replaced
/// atomically, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySnapshot {
    pub version: u64,
    pub mappings: Vec<PolicyMapping>,
    #[serde(default)]
    pub attributes: std::collections::HashMap<String, PolicyAttributes>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Endpoint routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Data-plane routing discovered from the Hub.  `crypto_url` is opaque to
/// us; admission only checks that it does not point back at the Hub
/// control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRouting {
    pub crypto_url: String,
    #[serde(default)]
    pub hub_id: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_url: Option<String>,
}

impl EndpointRouting {
    /// Whether the crypto URL may be admitted as a data-plane endpoint.
    pub fn admissible(&self) -> bool {
        !is_hub_control_url(&self.crypto_url)
    }
}

/// True when the URL's path contains the Hub control segment.
pub fn is_hub_control_url(url: &str) -> bool {
    url.contains(HUB_CONTROL_SEGMENT)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle of a collected schema entry.  Advances CREATED → REGISTERED
/// only upon acknowledged acceptance by the Hub schema-sync endpoint, and
/// never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaStatus {
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "REGISTERED")]
    Registered,
}

/// One collected column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    #[serde(default)]
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_nullable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    pub status: SchemaStatus,
}

impl SchemaEntry {
    /// Minimal entry in CREATED state.  Identifiers are normalized on
    /// construction so the catalog key rule holds.
    pub fn created(schema: &str, table: &str, column: &str) -> Self {
        Self {
            datasource_id: None,
            db_vendor: None,
            database_name: None,
            schema_name: ident::normalize(schema),
            table_name: ident::normalize(table),
            column_name: ident::normalize(column),
            column_type: None,
            is_nullable: None,
            column_default: None,
            policy_name: None,
            status: SchemaStatus::Created,
        }
    }

    /// Catalog key: normalized `schema.table.column`.
    pub fn key(&self) -> String {
        ident::schema_key(&self.schema_name, &self.table_name, &self.column_name)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Masking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Directive consumed by the Engine to return a redacted view instead of
/// plaintext on decrypt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskDirective {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_uid: Option<String>,
}
