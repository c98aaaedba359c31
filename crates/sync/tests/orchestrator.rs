//! Integration tests for bootstrap and the periodic loop, driven against a
//! scriptable in-process Hub.  All tests are pure and deterministic — no
//! sockets, no sleeps beyond the gate-timeout bound under test.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use dadp_domain::config::{HubConfig, SyncConfig};
use dadp_domain::error::{Error, Result};
use dadp_domain::model::{
    EndpointRouting, InstanceIdentity, MaskDirective, PolicyMapping, PolicySnapshot, SchemaEntry,
    SchemaStatus, Shape,
};
use dadp_engine::{
    BatchDecryptItem, BatchEncryptItem, CryptoEngine, DecryptOutcome, EngineHandle, TenantHandle,
};
use dadp_hub::{CheckOutcome, HubApi, PullOutcome};
use dadp_policy::PolicyResolver;
use dadp_store::PersistentStore;
use dadp_sync::{EngineFactory, SchemaGate, SyncOrchestrator};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fakes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct FakeHub {
    /// Hub ids issued per registration, in order.  Exhausted → Hub error.
    register_ids: Mutex<VecDeque<String>>,
    check_queue: Mutex<VecDeque<Result<CheckOutcome>>>,
    pull_queue: Mutex<VecDeque<Result<PullOutcome>>>,
    /// Keys pushed per schema-sync call.
    pushed: Mutex<Vec<Vec<String>>>,
    nack_schemas: bool,
    register_calls: AtomicUsize,
    pull_calls: AtomicUsize,
}

impl FakeHub {
    fn issuing(ids: &[&str]) -> Self {
        Self {
            register_ids: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }

    fn queue_check(&self, outcome: Result<CheckOutcome>) {
        self.check_queue.lock().push_back(outcome);
    }

    fn queue_pull(&self, outcome: Result<PullOutcome>) {
        self.pull_queue.lock().push_back(outcome);
    }

    fn pushed_keys(&self) -> Vec<Vec<String>> {
        self.pushed.lock().clone()
    }
}

#[async_trait]
impl HubApi for FakeHub {
    async fn register_instance(&self, _alias: &str, _shape: Shape) -> Result<String> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.register_ids
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Hub("registration unavailable".into()))
    }

    async fn check_mapping_change(
        &self,
        _hub_id: &str,
        _current_version: u64,
    ) -> Result<CheckOutcome> {
        self.check_queue
            .lock()
            .pop_front()
            .unwrap_or(Ok(CheckOutcome::Unchanged))
    }

    async fn pull_policies(
        &self,
        _hub_id: &str,
        _alias: &str,
        _current_version: u64,
    ) -> Result<PullOutcome> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        self.pull_queue
            .lock()
            .pop_front()
            .unwrap_or(Ok(PullOutcome::NotModified))
    }

    async fn sync_schemas(
        &self,
        _hub_id: &str,
        _alias: &str,
        entries: &[SchemaEntry],
    ) -> Result<bool> {
        self.pushed
            .lock()
            .push(entries.iter().map(SchemaEntry::key).collect());
        Ok(!self.nack_schemas)
    }
}

struct NullEngine;

#[async_trait]
impl CryptoEngine for NullEngine {
    async fn encrypt(&self, _: &str, _: Option<&str>, _: bool) -> Result<String> {
        Err(Error::engine_connection("null engine"))
    }
    async fn decrypt(
        &self,
        _: &str,
        _: Option<&str>,
        _: Option<&MaskDirective>,
    ) -> Result<DecryptOutcome> {
        Err(Error::engine_connection("null engine"))
    }
    async fn encrypt_batch(&self, _: &[BatchEncryptItem]) -> Result<Vec<Option<String>>> {
        Err(Error::engine_connection("null engine"))
    }
    async fn decrypt_batch(&self, _: &[BatchDecryptItem]) -> Result<Vec<DecryptOutcome>> {
        Err(Error::engine_connection("null engine"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rig
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Rig {
    _dir: tempfile::TempDir,
    store: Arc<PersistentStore>,
    resolver: Arc<PolicyResolver>,
    hub: Arc<FakeHub>,
    engine: EngineHandle,
    tenant: TenantHandle,
    gate: Arc<SchemaGate>,
    factory_calls: Arc<AtomicUsize>,
    orch: Arc<SyncOrchestrator>,
}

fn hub_cfg() -> HubConfig {
    HubConfig {
        base_url: "https://hub.test".into(),
        alias: "orders-svc".into(),
        ..HubConfig::default()
    }
}

fn rig_with(hub: FakeHub, hub_cfg: HubConfig) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(PersistentStore::open(
        hub_cfg.shape,
        Some(dir.path().to_path_buf()),
    ));
    let resolver = Arc::new(PolicyResolver::new(&store));
    let hub = Arc::new(hub);
    let engine = EngineHandle::empty();
    let gate = Arc::new(SchemaGate::new());
    let factory_calls = Arc::new(AtomicUsize::new(0));
    let factory: EngineFactory = {
        let calls = factory_calls.clone();
        Arc::new(move |_url| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullEngine) as Arc<dyn CryptoEngine>)
        })
    };
    let sync_cfg = SyncConfig {
        interval_secs: 1,
        schema_gate_timeout_secs: 0,
        http_timeout_ms: 5000,
    };
    let tenant = TenantHandle::unbound();
    let orch = Arc::new(SyncOrchestrator::new(
        hub_cfg,
        sync_cfg,
        store.clone(),
        resolver.clone(),
        hub.clone() as Arc<dyn HubApi>,
        engine.clone(),
        tenant.clone(),
        factory,
        gate.clone(),
    ));
    Rig {
        _dir: dir,
        store,
        resolver,
        hub,
        engine,
        tenant,
        gate,
        factory_calls,
        orch,
    }
}

fn rig(hub: FakeHub) -> Rig {
    rig_with(hub, hub_cfg())
}

fn email_entry() -> SchemaEntry {
    SchemaEntry::created("public", "users", "email")
}

fn email_mapping(policy: &str) -> PolicyMapping {
    PolicyMapping {
        datasource_id: None,
        schema_name: "public".into(),
        table_name: "users".into(),
        column_name: "email".into(),
        policy_name: policy.into(),
        enabled: true,
        use_iv: None,
        use_plain: None,
    }
}

fn snapshot(version: u64, mappings: Vec<PolicyMapping>, endpoint: Option<EndpointRouting>) -> PullOutcome {
    PullOutcome::Snapshot {
        snapshot: PolicySnapshot {
            version,
            mappings,
            attributes: Default::default(),
            updated_at: chrono::Utc::now(),
        },
        endpoint,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bootstrap
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn first_boot_registers_and_publishes_schemas() {
    let r = rig(FakeHub::issuing(&["H1"]));
    r.gate.signal(vec![email_entry()]);

    r.orch.bootstrap().await.unwrap();

    // Identity persisted and the data-plane tenant bound.
    let saved = r.store.load_config().expect("identity saved");
    assert_eq!(saved.tenant(), Some("H1"));
    assert_eq!(saved.alias, "orders-svc");
    assert_eq!(r.tenant.current().as_deref(), Some("H1"));

    // Schema pushed and acknowledged.
    assert_eq!(r.hub.pushed_keys(), vec![vec!["public.users.email".to_string()]]);
    let schemas = r.store.load_schemas();
    assert_eq!(schemas.len(), 1);
    assert_eq!(schemas[0].status, SchemaStatus::Registered);

    // No policy yet.
    assert_eq!(r.resolver.current_version(), None);
}

#[tokio::test]
async fn fail_open_bootstrap_survives_hub_outage() {
    let r = rig(FakeHub::default()); // no ids to issue: registration errors
    r.gate.signal(vec![email_entry()]);

    r.orch.bootstrap().await.unwrap();

    assert_eq!(r.orch.tenant(), None);
    // Nothing pushed without a tenant; entries wait in CREATED.
    assert!(r.hub.pushed_keys().is_empty());
    assert_eq!(r.store.get_created().len(), 1);
}

#[tokio::test]
async fn fail_closed_bootstrap_surfaces_the_error() {
    let mut cfg = hub_cfg();
    cfg.fail_open = false;
    let r = rig_with(FakeHub::default(), cfg);
    r.gate.signal(vec![email_entry()]);

    assert!(r.orch.bootstrap().await.is_err());
}

#[tokio::test]
async fn saved_identity_is_reused_without_registering() {
    let r = rig(FakeHub::issuing(&["H-should-not-be-used"]));
    let mut identity = InstanceIdentity::new("https://hub.test", "orders-svc");
    identity.hub_id = Some("H0".into());
    r.store.save_config(&identity).unwrap();

    r.gate.signal(vec![]);
    r.orch.bootstrap().await.unwrap();

    assert_eq!(r.orch.tenant(), Some("H0".into()));
    assert_eq!(r.tenant.current().as_deref(), Some("H0"));
    assert_eq!(r.hub.register_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn identity_of_a_different_alias_is_not_adopted() {
    let r = rig(FakeHub::issuing(&["H1"]));
    let mut identity = InstanceIdentity::new("https://hub.test", "someone-else");
    identity.hub_id = Some("H0".into());
    r.store.save_config(&identity).unwrap();

    r.gate.signal(vec![]);
    r.orch.bootstrap().await.unwrap();

    assert_eq!(r.orch.tenant(), Some("H1".into()));
    assert_eq!(r.hub.register_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unacknowledged_publication_keeps_entries_created() {
    let r = rig(FakeHub {
        register_ids: Mutex::new(VecDeque::from(["H1".to_string()])),
        nack_schemas: true,
        ..FakeHub::default()
    });
    r.gate.signal(vec![email_entry()]);

    r.orch.bootstrap().await.unwrap();

    assert_eq!(r.store.get_created().len(), 1);
}

#[tokio::test]
async fn persisted_endpoints_seed_the_engine_at_bootstrap() {
    let r = rig(FakeHub::issuing(&["H1"]));
    r.store
        .save_endpoints(&EndpointRouting {
            crypto_url: "https://crypto.test".into(),
            hub_id: "H1".into(),
            version: 1,
            stats_url: None,
        })
        .unwrap();

    r.gate.signal(vec![]);
    r.orch.bootstrap().await.unwrap();

    assert_eq!(r.factory_calls.load(Ordering::SeqCst), 1);
    assert!(r.engine.current().is_some());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Periodic loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn booted_rig() -> Rig {
    let r = rig(FakeHub::issuing(&["H1"]));
    r.gate.signal(vec![email_entry()]);
    r.orch.bootstrap().await.unwrap();
    r
}

#[tokio::test]
async fn unchanged_check_is_a_noop() {
    let r = booted_rig().await;
    r.hub.queue_check(Ok(CheckOutcome::Unchanged));

    r.orch.tick().await;

    assert_eq!(r.resolver.current_version(), None);
    assert_eq!(r.hub.pull_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn change_available_pulls_and_adopts_the_snapshot() {
    let r = booted_rig().await;
    r.hub.queue_check(Ok(CheckOutcome::ChangeAvailable));
    r.hub.queue_pull(Ok(snapshot(7, vec![email_mapping("p1")], None)));

    r.orch.tick().await;

    assert_eq!(r.resolver.current_version(), Some(7));
    assert_eq!(
        r.resolver.resolve(None, Some("public"), "users", "email"),
        Some("p1".into())
    );

    // Persisted alongside.
    let (mappings, _attrs, version) = r.store.load_policy().expect("policy saved");
    assert_eq!(version, 7);
    assert_eq!(
        mappings.get("public.users.email").map(String::as_str),
        Some("p1")
    );

    // Best-effort policy-name backfill onto the stored schema entry.
    assert_eq!(
        r.store.load_schemas()[0].policy_name.as_deref(),
        Some("p1")
    );
}

#[tokio::test]
async fn disabled_mappings_are_dropped_from_the_snapshot() {
    let r = booted_rig().await;
    let mut disabled = email_mapping("p1");
    disabled.enabled = false;
    r.hub.queue_check(Ok(CheckOutcome::ChangeAvailable));
    r.hub.queue_pull(Ok(snapshot(8, vec![disabled], None)));

    r.orch.tick().await;

    assert_eq!(r.resolver.current_version(), Some(8));
    assert_eq!(r.resolver.resolve(None, Some("public"), "users", "email"), None);
}

#[tokio::test]
async fn first_seen_attributes_win_per_policy() {
    let r = booted_rig().await;
    let mut first = email_mapping("p1");
    first.use_iv = Some(false);
    first.use_plain = Some(true);
    let mut second = PolicyMapping {
        column_name: "ssn".into(),
        ..email_mapping("p1")
    };
    second.use_iv = Some(true);
    second.use_plain = Some(false);

    r.hub.queue_check(Ok(CheckOutcome::ChangeAvailable));
    r.hub.queue_pull(Ok(snapshot(9, vec![first, second], None)));

    r.orch.tick().await;

    let attrs = r.resolver.attributes("p1");
    assert!(!attrs.use_iv);
    assert!(attrs.use_plain);
}

#[tokio::test]
async fn not_found_reregisters_without_repushing_registered_schemas() {
    let r = rig(FakeHub::issuing(&["H_new"]));
    // A previous life: registered identity and an acknowledged schema.
    let mut identity = InstanceIdentity::new("https://hub.test", "orders-svc");
    identity.hub_id = Some("H_old".into());
    r.store.save_config(&identity).unwrap();
    r.store.compare_and_update(&[email_entry()]);
    r.store
        .update_status(&["public.users.email".to_string()], SchemaStatus::Registered);

    r.gate.signal(vec![email_entry()]);
    r.orch.bootstrap().await.unwrap();
    assert_eq!(r.orch.tenant(), Some("H_old".into()));
    assert!(r.hub.pushed_keys().is_empty());

    r.hub.queue_check(Ok(CheckOutcome::UnknownTenant));
    r.orch.tick().await;

    // New identity persisted; REGISTERED entries stay put and are not
    // re-pushed — the Hub holds them under the alias.
    assert_eq!(
        r.store.load_config().unwrap().tenant(),
        Some("H_new")
    );
    assert_eq!(r.store.load_schemas()[0].status, SchemaStatus::Registered);
    assert!(r.hub.pushed_keys().is_empty());
    // The snapshot pull waits for the next tick.
    assert_eq!(r.hub.pull_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reregistered_check_adopts_the_new_tenant_and_pulls() {
    let r = booted_rig().await;
    r.hub
        .queue_check(Ok(CheckOutcome::Reregistered { hub_id: "H2".into() }));
    r.hub.queue_pull(Ok(snapshot(3, vec![email_mapping("p1")], None)));

    r.orch.tick().await;

    assert_eq!(r.orch.tenant(), Some("H2".into()));
    assert_eq!(r.tenant.current().as_deref(), Some("H2"));
    assert_eq!(r.store.load_config().unwrap().tenant(), Some("H2"));
    assert_eq!(r.hub.pull_calls.load(Ordering::SeqCst), 1);
    assert_eq!(r.resolver.current_version(), Some(3));
}

#[tokio::test]
async fn transient_check_failure_waits_for_the_next_tick() {
    let r = booted_rig().await;
    r.hub.queue_check(Err(Error::Hub("503".into())));

    r.orch.tick().await;

    assert_eq!(r.resolver.current_version(), None);
    assert_eq!(r.orch.tenant(), Some("H1".into()));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Endpoint adoption
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn snapshot_endpoint_is_adopted_and_persisted() {
    let r = booted_rig().await;
    let routing = EndpointRouting {
        crypto_url: "https://crypto.test".into(),
        hub_id: "H1".into(),
        version: 7,
        stats_url: None,
    };
    r.hub.queue_check(Ok(CheckOutcome::ChangeAvailable));
    r.hub
        .queue_pull(Ok(snapshot(7, vec![email_mapping("p1")], Some(routing))));

    r.orch.tick().await;

    assert_eq!(r.factory_calls.load(Ordering::SeqCst), 1);
    assert!(r.engine.current().is_some());
    assert_eq!(
        r.store.load_endpoints().unwrap().crypto_url,
        "https://crypto.test"
    );
}

#[tokio::test]
async fn hub_control_endpoint_is_rejected_but_mappings_still_apply() {
    let r = booted_rig().await;
    let routing = EndpointRouting {
        crypto_url: "https://hub.test/hub/api/v1/crypto".into(),
        hub_id: "H1".into(),
        version: 7,
        stats_url: None,
    };
    r.hub.queue_check(Ok(CheckOutcome::ChangeAvailable));
    r.hub
        .queue_pull(Ok(snapshot(7, vec![email_mapping("p1")], Some(routing))));

    r.orch.tick().await;

    assert_eq!(r.factory_calls.load(Ordering::SeqCst), 0);
    assert!(r.engine.current().is_none());
    assert!(r.store.load_endpoints().is_none());
    // The rejection scoped to the endpoint block only.
    assert_eq!(r.resolver.current_version(), Some(7));
    assert_eq!(
        r.resolver.resolve(None, Some("public"), "users", "email"),
        Some("p1".into())
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn start_runs_at_most_once_and_observes_shutdown() {
    let r = rig(FakeHub::issuing(&["H1"]));
    r.gate.signal(vec![]);

    let shutdown = tokio_util::sync::CancellationToken::new();
    let handle = r.orch.start(shutdown.clone()).expect("first start runs");
    assert!(r.orch.start(shutdown.clone()).is_none(), "second start is a no-op");

    shutdown.cancel();
    handle.await.unwrap();
}
