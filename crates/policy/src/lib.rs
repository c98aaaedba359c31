//! `dadp-policy` — the in-memory policy resolver.
//!
//! A versioned map from canonical column identifiers to policy names, plus
//! per-policy attributes.  The map is copy-on-write: a refresh builds a new
//! snapshot and swaps the `Arc`, so a concurrent reader sees either the
//! whole old snapshot or the whole new one, never a partial state.
//!
//! The resolver never talks to the Hub itself; refreshes are driven by the
//! sync orchestrator.  Writes flow through a weak back-reference to the
//! persistent store, so the resolver outliving the store degrades to
//! memory-only instead of keeping the store alive.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use dadp_domain::ident;
use dadp_domain::model::{PolicyAttributes, PolicyMapping};
use dadp_domain::trace::TraceEvent;
use dadp_store::PersistentStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
struct ResolverSnapshot {
    version: Option<u64>,
    by_key: HashMap<String, String>,
    attributes: HashMap<String, PolicyAttributes>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Versioned column-to-policy resolver.
pub struct PolicyResolver {
    snapshot: RwLock<Arc<ResolverSnapshot>>,
    store: Weak<PersistentStore>,
}

impl PolicyResolver {
    /// A resolver backed by the given store for persistence.
    pub fn new(store: &Arc<PersistentStore>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(ResolverSnapshot::default())),
            store: Arc::downgrade(store),
        }
    }

    /// A resolver with no persistence backing.
    pub fn unbacked() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(ResolverSnapshot::default())),
            store: Weak::new(),
        }
    }

    /// Resolve the policy for a column.  Candidate keys are tried most
    /// specific first; identifiers are case-normalized identically on write
    /// and lookup.
    pub fn resolve(
        &self,
        datasource_id: Option<&str>,
        schema: Option<&str>,
        table: &str,
        column: &str,
    ) -> Option<String> {
        let snapshot = self.snapshot.read().clone();
        for key in ident::lookup_keys(datasource_id, schema, table, column) {
            if let Some(policy) = snapshot.by_key.get(&key) {
                return Some(policy.clone());
            }
        }
        None
    }

    /// Attributes for a policy; defaults when the policy is unknown.
    pub fn attributes(&self, policy_name: &str) -> PolicyAttributes {
        self.snapshot
            .read()
            .attributes
            .get(policy_name)
            .copied()
            .unwrap_or_default()
    }

    /// The version of the snapshot currently in effect, if any was ever
    /// admitted.
    pub fn current_version(&self) -> Option<u64> {
        self.snapshot.read().version
    }

    /// Admit a new snapshot from the Hub: drop disabled and unnamed
    /// mappings, swap atomically, then persist synchronously.
    ///
    /// Refreshing twice with the same inputs leaves the observable state
    /// identical to a single refresh.
    pub fn refresh(
        &self,
        mappings: &[PolicyMapping],
        attributes: HashMap<String, PolicyAttributes>,
        version: u64,
    ) {
        let mut by_key = HashMap::with_capacity(mappings.len());
        for mapping in mappings {
            if !mapping.enabled || mapping.policy_name.is_empty() {
                continue;
            }
            by_key.insert(mapping.key(), mapping.policy_name.clone());
        }

        let admitted = by_key.len();
        let next = Arc::new(ResolverSnapshot {
            version: Some(version),
            by_key,
            attributes,
        });

        *self.snapshot.write() = Arc::clone(&next);

        TraceEvent::PolicyRefreshed {
            version,
            mappings: admitted,
        }
        .emit();

        if let Some(store) = self.store.upgrade() {
            if let Err(e) = store.save_policy(&next.by_key, &next.attributes, version) {
                tracing::warn!(error = %e, "failed to persist policy snapshot");
            }
        }
    }

    /// Seed the in-memory snapshot from already-canonical keys without
    /// writing back to the store.  Used when priming from local state at
    /// startup.
    pub fn prime(
        &self,
        by_key: HashMap<String, String>,
        attributes: HashMap<String, PolicyAttributes>,
        version: u64,
    ) {
        let next = Arc::new(ResolverSnapshot {
            version: Some(version),
            by_key,
            attributes,
        });
        *self.snapshot.write() = next;
    }

    /// Replace the in-memory snapshot with whatever the store holds.
    pub fn reload_from_storage(&self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        match store.load_policy() {
            Some((mappings, attributes, version)) => {
                tracing::info!(version, mappings = mappings.len(), "policy primed from storage");
                self.prime(mappings, attributes, version);
            }
            None => {
                *self.snapshot.write() = Arc::new(ResolverSnapshot::default());
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
