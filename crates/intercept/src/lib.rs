//! `dadp-intercept` — the interception engine.
//!
//! The hot path of the system.  For each intercepted call it detects the
//! target fields from the entity's registered descriptor, resolves the
//! policy per column, chooses individual or batched Engine round-trips, and
//! writes transformed values back while preserving the caller's container
//! shape.
//!
//! Two entry points:
//!
//! * [`Interceptor::encrypt_call`] — write-leaning: transform arguments,
//!   then continue the call with the ciphertext in place.
//! * [`Interceptor::decrypt_call`] — read-leaning: run the call, quarantine
//!   the returned entities from their session, decrypt (or mask) the target
//!   fields, and re-wrap the result.
//!
//! The single most important property lives in the read path: transforming
//! values in returned entities must never cause a write back to the data
//! store.  See [`session::SessionHooks`].

pub mod batch;
pub mod descriptor;
pub mod session;
pub mod shapes;

mod decrypt;
mod encrypt;

pub use descriptor::{DescriptorRegistry, EntityDescriptor, FieldAccess, FieldDescriptor};
pub use session::SessionHooks;
pub use shapes::{CallOrigin, CallResult, Intercepted, Page, PageInfo};

use std::sync::Arc;

use dadp_domain::config::{BatchConfig, HubConfig, InterceptConfig};
use dadp_domain::error::{Error, Result};
use dadp_domain::model::MaskDirective;
use dadp_engine::{CryptoEngine, EngineHandle, TenantHandle};
use dadp_policy::PolicyResolver;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Call options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-call options supplied by the adapter glue.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Restrict processing to this subset of declared fields.  `None`
    /// processes every encrypt-marked field.
    pub fields: Option<Vec<String>>,
    /// Call-level mask default for the decrypt path.  A per-field mask on
    /// the descriptor takes precedence.
    pub mask: Option<MaskDirective>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interceptor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The interception engine.
///
/// Borrows the policy resolver and the engine handle read-only during a
/// call; the engine reference is fetched anew per call so a client swap by
/// the sync orchestrator is observed within one call.
pub struct Interceptor {
    resolver: Arc<PolicyResolver>,
    engine: EngineHandle,
    tenant: TenantHandle,
    registry: Arc<DescriptorRegistry>,
    batch: BatchConfig,
    fallback_to_original: bool,
    fail_open: bool,
}

impl Interceptor {
    pub fn new(
        resolver: Arc<PolicyResolver>,
        engine: EngineHandle,
        tenant: TenantHandle,
        registry: Arc<DescriptorRegistry>,
        hub: &HubConfig,
        batch: BatchConfig,
        intercept: InterceptConfig,
    ) -> Self {
        Self {
            resolver,
            engine,
            tenant,
            registry,
            batch,
            fallback_to_original: intercept.fallback_to_original,
            fail_open: hub.fail_open,
        }
    }

    /// The descriptor registry, shared with the schema collector.
    pub fn registry(&self) -> &Arc<DescriptorRegistry> {
        &self.registry
    }

    /// The Engine currently routed to, gated on a bound tenant.
    ///
    /// Data-plane calls require the tenant header.  Without one, fail-open
    /// degrades to a connection-class fault (so fallback-to-original skips
    /// the transformation), while fail-closed refuses the call outright —
    /// the one fault class fallback never recovers.  A missing endpoint is
    /// likewise a connection-class fault.
    pub(crate) fn engine(&self) -> Result<Arc<dyn CryptoEngine>> {
        if !self.tenant.is_bound() {
            return Err(if self.fail_open {
                Error::engine_connection("no hub identity; data-plane call skipped")
            } else {
                Error::TenantMissing
            });
        }
        self.engine
            .current()
            .ok_or_else(|| Error::engine_connection("no crypto endpoint available"))
    }
}
