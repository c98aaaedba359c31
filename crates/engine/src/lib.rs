//! `dadp-engine` — client for the Engine data plane.
//!
//! Provides the [`CryptoEngine`] trait that abstracts over the external
//! Engine's HTTP API (single and batch encrypt/decrypt), the production
//! REST implementation ([`RestCryptoClient`]), and the [`EngineHandle`]
//! swap point through which the sync orchestrator replaces the client when
//! identity or endpoint routing changes.
//!
//! Two Engine conventions are surfaced as distinguished, non-error
//! outcomes:
//!
//! * the "data is not encrypted" sentinel on decrypt becomes
//!   [`DecryptOutcome::NotEncrypted`], independent of HTTP status;
//! * a response carrying decrypted data with an inner `success: false` is
//!   the mask convention and becomes [`DecryptOutcome::Masked`].

pub mod rest;
pub mod types;

pub use rest::{CryptoClientOptions, RestCryptoClient};

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use dadp_domain::error::Result;
use dadp_domain::model::MaskDirective;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcomes and batch items
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of a decrypt call for a single value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptOutcome {
    Plaintext(String),
    /// The Engine applied a mask policy; the redacted view is written back
    /// like plaintext.
    Masked(String),
    /// The value was never encrypted; the caller keeps the original
    /// byte-for-byte.
    NotEncrypted,
}

/// One item of an `encrypt/batch` request.
#[derive(Debug, Clone)]
pub struct BatchEncryptItem {
    pub data: String,
    pub policy_name: Option<String>,
}

/// One item of a `decrypt/batch` request.
#[derive(Debug, Clone)]
pub struct BatchDecryptItem {
    pub data: String,
    pub mask: Option<MaskDirective>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The Engine data plane.
///
/// Batch calls bind results to inputs by index: implementations must return
/// exactly one outcome per input item, in input order.
#[async_trait]
pub trait CryptoEngine: Send + Sync {
    /// Encrypt a single value.  `policy_name = None` lets the Engine apply
    /// its own default policy.
    async fn encrypt(
        &self,
        data: &str,
        policy_name: Option<&str>,
        for_search: bool,
    ) -> Result<String>;

    /// Decrypt a single value, optionally through a mask policy.
    async fn decrypt(
        &self,
        data: &str,
        policy_name: Option<&str>,
        mask: Option<&MaskDirective>,
    ) -> Result<DecryptOutcome>;

    /// Batch encrypt.  `None` in the result means the item failed
    /// individually and the caller keeps the original value.
    async fn encrypt_batch(&self, items: &[BatchEncryptItem]) -> Result<Vec<Option<String>>>;

    /// Batch decrypt.
    async fn decrypt_batch(&self, items: &[BatchDecryptItem]) -> Result<Vec<DecryptOutcome>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared slot holding the tenant identifier the data plane operates
/// under.
///
/// Bound by the sync orchestrator on registration and rebound on
/// re-registration; read per request, so an identity swap is observed
/// within one call.  While unbound, data-plane calls that require the
/// tenant header are skipped (fail-open) or refused (fail-closed).
#[derive(Debug, Clone, Default)]
pub struct TenantHandle {
    inner: Arc<RwLock<Option<String>>>,
}

impl TenantHandle {
    pub fn unbound() -> Self {
        Self::default()
    }

    /// Bind (or rebind) the tenant identifier.
    pub fn bind(&self, hub_id: String) {
        *self.inner.write() = Some(hub_id);
    }

    pub fn current(&self) -> Option<String> {
        self.inner.read().clone().filter(|id| !id.is_empty())
    }

    pub fn is_bound(&self) -> bool {
        self.current().is_some()
    }
}

/// Shared slot holding the current Engine client.
///
/// The orchestrator replaces the client wholesale on identity or endpoint
/// change; routing fields are never mutated in place.  Readers fetch their
/// reference anew on each call and therefore observe a swap within one
/// call.
#[derive(Clone, Default)]
pub struct EngineHandle {
    inner: Arc<RwLock<Option<Arc<dyn CryptoEngine>>>>,
}

impl EngineHandle {
    /// A handle with no client yet (no endpoint discovered).
    pub fn empty() -> Self {
        Self::default()
    }

    /// A handle seeded with a client.
    pub fn with_engine(engine: Arc<dyn CryptoEngine>) -> Self {
        let handle = Self::default();
        handle.replace(engine);
        handle
    }

    /// Swap in a freshly-built client.
    pub fn replace(&self, engine: Arc<dyn CryptoEngine>) {
        *self.inner.write() = Some(engine);
    }

    /// The client currently in effect.
    pub fn current(&self) -> Option<Arc<dyn CryptoEngine>> {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_handle_rebinds_and_ignores_empty_ids() {
        let tenant = TenantHandle::unbound();
        assert!(!tenant.is_bound());

        tenant.bind("H1".into());
        assert_eq!(tenant.current().as_deref(), Some("H1"));

        tenant.bind("H2".into());
        assert_eq!(tenant.current().as_deref(), Some("H2"));

        tenant.bind(String::new());
        assert!(!tenant.is_bound());
    }
}
