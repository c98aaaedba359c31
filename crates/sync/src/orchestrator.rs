//! The sync orchestrator.
//!
//! A small state machine over the persistent store, the policy resolver,
//! the engine handle, and the Hub: bootstrap once (schema gate → local load
//! → identity resolution → schema publication), then a periodic
//! single-flight loop that checks for mapping changes, pulls version-gated
//! snapshots, and recovers from identity loss (404 → re-register, 200 with
//! `reregistered` → adopt the replacement tenant).
//!
//! Locking discipline: the rebuild lock and the identity lock are
//! synchronous and never held across an HTTP call; the periodic tick is
//! coalesced through a `try_lock` so overlapping invocations fold into one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use dadp_domain::config::{HubConfig, SyncConfig};
use dadp_domain::error::Result;
use dadp_domain::model::{
    EndpointRouting, InstanceIdentity, PolicyAttributes, PolicyMapping, PolicySnapshot,
    SchemaEntry, SchemaStatus,
};
use dadp_domain::trace::TraceEvent;
use dadp_engine::{CryptoEngine, EngineHandle, TenantHandle};
use dadp_hub::{CheckOutcome, HubApi, PullOutcome};
use dadp_policy::PolicyResolver;
use dadp_store::PersistentStore;

use crate::gate::SchemaGate;

/// Builds a fresh Engine client for a crypto base URL.  The orchestrator
/// rebuilds (never mutates) the client on identity or endpoint change.
pub type EngineFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn CryptoEngine>> + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SyncOrchestrator {
    hub_cfg: HubConfig,
    sync_cfg: SyncConfig,
    store: Arc<PersistentStore>,
    resolver: Arc<PolicyResolver>,
    hub: Arc<dyn HubApi>,
    engine: EngineHandle,
    tenant_handle: TenantHandle,
    engine_factory: EngineFactory,
    gate: Arc<SchemaGate>,
    started: AtomicBool,
    identity: RwLock<InstanceIdentity>,
    tick_lock: tokio::sync::Mutex<()>,
    rebuild_lock: Mutex<()>,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hub_cfg: HubConfig,
        sync_cfg: SyncConfig,
        store: Arc<PersistentStore>,
        resolver: Arc<PolicyResolver>,
        hub: Arc<dyn HubApi>,
        engine: EngineHandle,
        tenant_handle: TenantHandle,
        engine_factory: EngineFactory,
        gate: Arc<SchemaGate>,
    ) -> Self {
        let identity = InstanceIdentity::new(hub_cfg.base_url.clone(), hub_cfg.alias.clone());
        Self {
            hub_cfg,
            sync_cfg,
            store,
            resolver,
            hub,
            engine,
            tenant_handle,
            engine_factory,
            gate,
            started: AtomicBool::new(false),
            identity: RwLock::new(identity),
            tick_lock: tokio::sync::Mutex::new(()),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// The tenant identifier currently in effect, if any.
    pub fn tenant(&self) -> Option<String> {
        self.identity.read().tenant().map(str::to_owned)
    }

    /// Spawn the bootstrap-then-loop task.  The started flag is
    /// compare-and-set: the second and later calls are no-ops.
    pub fn start(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("sync orchestrator already started");
            return None;
        }
        let this = Arc::clone(self);
        Some(tokio::spawn(async move { this.run(shutdown).await }))
    }

    async fn run(&self, shutdown: CancellationToken) {
        tokio::select! {
            result = self.bootstrap() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "bootstrap incomplete; periodic loop will recover");
                }
            }
            _ = shutdown.cancelled() => return,
        }

        let mut interval = tokio::time::interval(Duration::from_secs(self.sync_cfg.interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately; bootstrap
        // already covered it.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown.cancelled() => {
                    tracing::info!("sync loop shutting down");
                    return;
                }
            }
        }
    }

    // ── bootstrap ────────────────────────────────────────────────────

    /// The one-time bootstrap pass: schema gate, local load, identity
    /// resolution, schema publication.
    pub async fn bootstrap(&self) -> Result<()> {
        let fresh = self
            .gate
            .wait(Duration::from_secs(self.sync_cfg.schema_gate_timeout_secs))
            .await;

        let had_prior_schemas = !self.store.load_schemas().is_empty();

        // Prior identity is only ours if the alias matches; a changed alias
        // means this deployment is someone new to the Hub.
        if let Some(saved) = self.store.load_config() {
            if saved.alias == self.hub_cfg.alias {
                if let Some(hub_id) = saved.tenant() {
                    self.tenant_handle.bind(hub_id.to_owned());
                }
                self.identity.write().hub_id = saved.hub_id;
            } else {
                tracing::info!(
                    saved_alias = %saved.alias,
                    alias = %self.hub_cfg.alias,
                    "stored identity belongs to a different alias; re-registering"
                );
            }
        }

        self.resolver.reload_from_storage();

        if let Some(routing) = self.store.load_endpoints() {
            self.adopt_endpoint(&routing, false);
        }

        if self.tenant().is_none() {
            self.register().await?;
        }

        self.publish_schemas(&fresh, had_prior_schemas).await;
        Ok(())
    }

    async fn register(&self) -> Result<()> {
        match self
            .hub
            .register_instance(&self.hub_cfg.alias, self.hub_cfg.shape)
            .await
        {
            Ok(hub_id) => {
                TraceEvent::InstanceRegistered {
                    hub_id: hub_id.clone(),
                    alias: self.hub_cfg.alias.clone(),
                }
                .emit();
                self.set_tenant(hub_id);
                Ok(())
            }
            Err(e) if self.hub_cfg.fail_open => {
                tracing::warn!(
                    error = %e,
                    "registration failed; continuing without a tenant (fail-open)"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Persist the issued identity and rebind the data-plane tenant.
    fn set_tenant(&self, hub_id: String) {
        self.tenant_handle.bind(hub_id.clone());
        let identity = {
            let mut id = self.identity.write();
            id.hub_id = Some(hub_id);
            id.fail_open = Some(self.hub_cfg.fail_open);
            id.clone()
        };
        if let Err(e) = self.store.save_config(&identity) {
            tracing::warn!(error = %e, "failed to persist instance identity");
        }
    }

    /// Merge the fresh catalog and push what the Hub has not acknowledged
    /// yet.  CREATED entries transition to REGISTERED only on acknowledged
    /// acceptance; already-REGISTERED entries are never re-pushed (the Hub
    /// holds them under the alias-keyed identity).
    async fn publish_schemas(&self, fresh: &[SchemaEntry], had_prior_schemas: bool) {
        if !fresh.is_empty() {
            let merged = self.store.compare_and_update(fresh);
            if merged > 0 {
                tracing::info!(merged, "schema catalog updated from local enumeration");
            }
        }

        let Some(hub_id) = self.tenant() else {
            tracing::debug!("no tenant yet; schema publication deferred");
            return;
        };

        let created = self.store.get_created();
        let to_push = if !created.is_empty() {
            created
        } else if !had_prior_schemas {
            // First boot with nothing new: publish the full set once.
            self.store.load_schemas()
        } else {
            Vec::new()
        };
        if to_push.is_empty() {
            return;
        }

        match self
            .hub
            .sync_schemas(&hub_id, &self.hub_cfg.alias, &to_push)
            .await
        {
            Ok(true) => {
                let keys: Vec<String> = to_push.iter().map(SchemaEntry::key).collect();
                self.store.update_status(&keys, SchemaStatus::Registered);
                TraceEvent::SchemasPublished {
                    count: to_push.len(),
                }
                .emit();
            }
            Ok(false) => {
                tracing::warn!("schema publication not acknowledged; entries stay CREATED")
            }
            Err(e) => tracing::warn!(error = %e, "schema publication failed; retrying later"),
        }
    }

    // ── periodic loop ────────────────────────────────────────────────

    /// One periodic pass.  Single-flight: an invocation overlapping a
    /// running one coalesces into it.
    pub async fn tick(&self) {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            return;
        };
        let Some(hub_id) = self.tenant() else {
            tracing::debug!("no tenant; skipping mapping check");
            return;
        };
        let version = self.resolver.current_version().unwrap_or(0);

        match self.hub.check_mapping_change(&hub_id, version).await {
            Ok(CheckOutcome::Unchanged) => {}
            Ok(CheckOutcome::ChangeAvailable) => self.pull_snapshot(&hub_id).await,
            Ok(CheckOutcome::Reregistered { hub_id: new_id }) => {
                TraceEvent::Reregistered {
                    old_hub_id: hub_id.clone(),
                    new_hub_id: new_id.clone(),
                }
                .emit();
                self.set_tenant(new_id.clone());
                self.rebuild_engine();
                self.publish_schemas(&self.gate.peek(), true).await;
                self.pull_snapshot(&new_id).await;
            }
            Ok(CheckOutcome::UnknownTenant) => {
                if let Err(e) = self.reregister_and_publish().await {
                    tracing::warn!(error = %e, "re-registration failed; retrying next tick");
                }
            }
            Err(e) => tracing::warn!(error = %e, "mapping check failed; retrying next tick"),
        }
    }

    /// Full Register → Publish recovery after the Hub forgot this tenant.
    /// The next snapshot pull proceeds with the replacement identity on the
    /// following tick.
    async fn reregister_and_publish(&self) -> Result<()> {
        let old = self.tenant();
        let new_id = self
            .hub
            .register_instance(&self.hub_cfg.alias, self.hub_cfg.shape)
            .await?;

        match old {
            Some(old) => TraceEvent::Reregistered {
                old_hub_id: old,
                new_hub_id: new_id.clone(),
            }
            .emit(),
            None => TraceEvent::InstanceRegistered {
                hub_id: new_id.clone(),
                alias: self.hub_cfg.alias.clone(),
            }
            .emit(),
        }

        self.set_tenant(new_id);
        self.rebuild_engine();
        self.publish_schemas(&self.gate.peek(), true).await;
        Ok(())
    }

    async fn pull_snapshot(&self, hub_id: &str) {
        let version = self.resolver.current_version().unwrap_or(0);
        match self
            .hub
            .pull_policies(hub_id, &self.hub_cfg.alias, version)
            .await
        {
            Ok(PullOutcome::NotModified) => {}
            Ok(PullOutcome::Snapshot { snapshot, endpoint }) => {
                self.adopt_snapshot(snapshot, endpoint)
            }
            Ok(PullOutcome::UnknownTenant) => {
                if let Err(e) = self.reregister_and_publish().await {
                    tracing::warn!(error = %e, "re-registration failed; retrying next tick");
                }
            }
            Err(e) => tracing::warn!(error = %e, "snapshot pull failed; retrying next tick"),
        }
    }

    /// Admit a pulled snapshot: filter disabled mappings, derive first-seen
    /// attributes per policy, refresh the resolver atomically, backfill
    /// stored schema policy names, and adopt the endpoint block when it
    /// passes admission.  An inadmissible endpoint rejects the block only —
    /// mappings and version still apply.
    fn adopt_snapshot(&self, snapshot: PolicySnapshot, endpoint: Option<EndpointRouting>) {
        let enabled: Vec<PolicyMapping> = snapshot
            .mappings
            .into_iter()
            .filter(|m| m.enabled && !m.policy_name.is_empty())
            .collect();

        let mut attributes: HashMap<String, PolicyAttributes> = snapshot.attributes;
        for mapping in &enabled {
            attributes
                .entry(mapping.policy_name.clone())
                .or_insert_with(|| PolicyAttributes {
                    use_iv: mapping.use_iv.unwrap_or(true),
                    use_plain: mapping.use_plain.unwrap_or(false),
                });
        }

        self.resolver.refresh(&enabled, attributes, snapshot.version);

        let by_key: HashMap<String, String> = enabled
            .iter()
            .map(|m| (m.schema_key(), m.policy_name.clone()))
            .collect();
        self.store.update_policy_names(&by_key);

        if let Some(routing) = endpoint {
            self.adopt_endpoint(&routing, true);
        }
    }

    /// Seed or swap the Engine client for a routing entry.  Held locks are
    /// synchronous only; the factory does not perform I/O beyond reading a
    /// CA bundle.
    fn adopt_endpoint(&self, routing: &EndpointRouting, persist: bool) {
        if !routing.admissible() {
            tracing::warn!(
                url = %routing.crypto_url,
                "crypto endpoint points at the Hub control plane; rejected"
            );
            TraceEvent::EndpointRejected {
                crypto_url: routing.crypto_url.clone(),
            }
            .emit();
            return;
        }

        let _g = self.rebuild_lock.lock();
        match (self.engine_factory)(&routing.crypto_url) {
            Ok(engine) => {
                self.engine.replace(engine);
                TraceEvent::EndpointAdopted {
                    crypto_url: routing.crypto_url.clone(),
                    version: routing.version,
                }
                .emit();
                if persist {
                    if let Err(e) = self.store.save_endpoints(routing) {
                        tracing::warn!(error = %e, "failed to persist endpoint routing");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to build engine client; keeping previous"),
        }
    }

    /// Rebuild the Engine client from the persisted routing after an
    /// identity change.
    fn rebuild_engine(&self) {
        if let Some(routing) = self.store.load_endpoints() {
            self.adopt_endpoint(&routing, false);
        }
    }
}
