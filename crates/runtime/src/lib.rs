//! `dadp-runtime` — the composition root.
//!
//! Wires every subsystem into a running client: config validation, the
//! persistent store, the policy resolver, the Hub and Engine clients, the
//! descriptor registry, the interceptor, and the sync orchestrator with its
//! background loop.  Adapter glue (the AOP aspect or the driver wrapper)
//! holds a [`Runtime`] and talks to [`Runtime::interceptor`]; everything
//! else runs behind it.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use dadp_domain::config::{Config, ConfigSeverity};
use dadp_domain::error::{Error, Result};
use dadp_engine::{CryptoClientOptions, CryptoEngine, EngineHandle, RestCryptoClient, TenantHandle};
use dadp_hub::{HubApi, HubClientOptions, RestHubClient};
use dadp_intercept::{DescriptorRegistry, Interceptor};
use dadp_policy::PolicyResolver;
use dadp_store::PersistentStore;
use dadp_sync::{EngineFactory, SchemaGate, SyncOrchestrator};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fully-wired client runtime.
pub struct Runtime {
    store: Arc<PersistentStore>,
    resolver: Arc<PolicyResolver>,
    registry: Arc<DescriptorRegistry>,
    engine: EngineHandle,
    tenant: TenantHandle,
    interceptor: Arc<Interceptor>,
    orchestrator: Arc<SyncOrchestrator>,
    gate: Arc<SchemaGate>,
    shutdown: CancellationToken,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Runtime {
    /// Validate the config, build the production REST clients and wire
    /// every subsystem.  This is the shared boot path of both deployment
    /// shapes.
    pub fn build(config: Config) -> Result<Self> {
        let hub_opts = HubClientOptions::from_config(
            &config.hub,
            &config.sync,
            config.engine.ca_cert_path.clone(),
        );
        let hub = Arc::new(RestHubClient::new(&config.hub.base_url, hub_opts)?);

        let tenant = TenantHandle::unbound();
        let mut crypto_opts = CryptoClientOptions::from(&config.engine);
        crypto_opts.tenant = tenant.clone();
        let engine_factory: EngineFactory = Arc::new(move |crypto_url: &str| {
            RestCryptoClient::new(crypto_url, crypto_opts.clone())
                .map(|client| Arc::new(client) as Arc<dyn CryptoEngine>)
        });

        Self::wire(config, hub, engine_factory, tenant)
    }

    /// Wire the runtime around externally-supplied collaborators.  Used by
    /// tests and by hosts that bring their own transport.
    pub fn with_collaborators(
        config: Config,
        hub: Arc<dyn HubApi>,
        engine_factory: EngineFactory,
    ) -> Result<Self> {
        Self::wire(config, hub, engine_factory, TenantHandle::unbound())
    }

    fn wire(
        config: Config,
        hub: Arc<dyn HubApi>,
        engine_factory: EngineFactory,
        tenant: TenantHandle,
    ) -> Result<Self> {
        let issues = config.validate();
        for issue in &issues {
            match issue.severity {
                ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
                ConfigSeverity::Error => tracing::error!("config: {issue}"),
            }
        }
        if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
            return Err(Error::Config(format!(
                "validation failed with {} error(s)",
                issues
                    .iter()
                    .filter(|i| i.severity == ConfigSeverity::Error)
                    .count()
            )));
        }

        let store = Arc::new(PersistentStore::open(
            config.hub.shape,
            config.state_dir.clone(),
        ));

        let resolver = Arc::new(PolicyResolver::new(&store));
        let registry = Arc::new(DescriptorRegistry::new());
        let gate = Arc::new(SchemaGate::new());

        let engine = EngineHandle::empty();
        if let Some(url) = &config.engine.crypto_url {
            // Static override; endpoint discovery replaces it when the Hub
            // says otherwise.
            engine.replace(engine_factory(url)?);
            tracing::info!(url = %url, "engine client seeded from static configuration");
        }

        let interceptor = Arc::new(Interceptor::new(
            resolver.clone(),
            engine.clone(),
            tenant.clone(),
            registry.clone(),
            &config.hub,
            config.batch,
            config.intercept,
        ));

        let orchestrator = Arc::new(SyncOrchestrator::new(
            config.hub.clone(),
            config.sync,
            store.clone(),
            resolver.clone(),
            hub,
            engine.clone(),
            tenant.clone(),
            engine_factory,
            gate.clone(),
        ));

        tracing::info!(
            alias = %config.hub.alias,
            shape = config.hub.shape.as_str(),
            durable = store.is_durable(),
            "runtime wired"
        );

        Ok(Self {
            store,
            resolver,
            registry,
            engine,
            tenant,
            interceptor,
            orchestrator,
            gate,
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    // ── accessors ────────────────────────────────────────────────────

    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<PolicyResolver> {
        &self.resolver
    }

    /// Register entity descriptors here, then call
    /// [`signal_schema_ready`](Self::signal_schema_ready).
    pub fn registry(&self) -> &Arc<DescriptorRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// The data-plane tenant identity, bound by the orchestrator.
    pub fn tenant(&self) -> &TenantHandle {
        &self.tenant
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Tell bootstrap that every entity descriptor is registered: the
    /// locally-known columns are collected from the registry and handed to
    /// the schema gate.
    pub fn signal_schema_ready(&self) {
        let rows = self.registry.schema_rows();
        tracing::info!(columns = rows.len(), "local schema enumeration complete");
        self.gate.signal(rows);
    }

    /// Start the background sync task.  Safe to call once; later calls are
    /// no-ops.
    pub fn start(&self) {
        if let Some(handle) = self.orchestrator.start(self.shutdown.child_token()) {
            *self.task.lock() = Some(handle);
        }
    }

    /// Cancel the background task and wait for it to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tracing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Install a default `tracing` subscriber honoring `RUST_LOG`, for hosts
/// that have not set one up themselves.  Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
