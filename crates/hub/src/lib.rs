//! `dadp-hub` — client for the Hub control plane.
//!
//! Provides the [`HubApi`] trait the sync orchestrator drives (instance
//! registration, version-conditional mapping checks, policy snapshot pulls,
//! schema publication) and the production REST implementation
//! ([`RestHubClient`]).
//!
//! The Hub speaks in statuses as much as bodies: 304 means "your version is
//! current", 404 means "I don't know this tenant".  Both are ordinary
//! outcomes here, never errors — only transport faults and 5xx surface as
//! [`Error::Hub`](dadp_domain::error::Error) and are retried on the next
//! periodic tick.

pub mod rest;
pub mod types;

pub use rest::{HubClientOptions, RestHubClient};

use async_trait::async_trait;

use dadp_domain::error::Result;
use dadp_domain::model::{EndpointRouting, PolicySnapshot, SchemaEntry, Shape};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of a `mappings/check` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// 304 — versions match.
    Unchanged,
    /// 200 — a newer snapshot is available.
    ChangeAvailable,
    /// 200 with `reregistered: true` — the Hub dropped the old identity and
    /// minted a new one.
    Reregistered { hub_id: String },
    /// 404 — the Hub does not know this tenant.
    UnknownTenant,
}

/// Result of a policy snapshot pull.
#[derive(Debug, Clone)]
pub enum PullOutcome {
    /// 304 — the current version is already in effect.
    NotModified,
    Snapshot {
        snapshot: PolicySnapshot,
        endpoint: Option<EndpointRouting>,
    },
    /// 404 — registration is required first.
    UnknownTenant,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The Hub control plane.
#[async_trait]
pub trait HubApi: Send + Sync {
    /// Register this deployment under its alias.  Returns the Hub-issued
    /// tenant identifier.
    async fn register_instance(&self, alias: &str, shape: Shape) -> Result<String>;

    /// Version-conditional change check.
    async fn check_mapping_change(&self, hub_id: &str, current_version: u64)
        -> Result<CheckOutcome>;

    /// Pull the policy snapshot, conditionally on the current version.
    async fn pull_policies(
        &self,
        hub_id: &str,
        alias: &str,
        current_version: u64,
    ) -> Result<PullOutcome>;

    /// Publish collected schema entries.  Returns true iff the Hub
    /// acknowledged acceptance.
    async fn sync_schemas(
        &self,
        hub_id: &str,
        alias: &str,
        entries: &[SchemaEntry],
    ) -> Result<bool>;
}
