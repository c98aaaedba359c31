//! `dadp-store` — the durable local store.
//!
//! A per-deployment directory (`~/.dadp-<shape>/` unless overridden) holding
//! four JSON documents: the instance identity, the policy mappings with
//! their version, the crypto endpoint routing table, and the collected
//! schema catalog with per-entry lifecycle state.
//!
//! Every document is written atomically (temp file + rename) and guarded by
//! its own mutex.  A document that fails to parse is treated as empty and
//! the stale file is left in place for human inspection.  When the state
//! directory cannot be created the store degrades to in-memory-only: loads
//! return empty, saves no-op, and a single warning is emitted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use dadp_domain::error::{Error, Result};
use dadp_domain::model::{
    EndpointRouting, InstanceIdentity, PolicyAttributes, SchemaEntry, SchemaStatus, Shape,
};
use dadp_domain::trace::TraceEvent;

const POLICY_FILE: &str = "policy-mappings.json";
const ENDPOINTS_FILE: &str = "crypto-endpoints.json";
const SCHEMAS_FILE: &str = "schemas.json";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Document layouts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `policy-mappings.json`.  BTreeMaps keep the serialized key order stable
/// across saves.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PolicyDocument {
    version: u64,
    #[serde(default)]
    mappings: BTreeMap<String, String>,
    #[serde(default)]
    attributes: BTreeMap<String, PolicyAttributes>,
}

/// `crypto-endpoints.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EndpointsDocument {
    #[serde(flatten)]
    routing: EndpointRouting,
    #[serde(rename = "savedAt")]
    saved_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Durable local store for control-plane state.
///
/// The store exclusively owns the files under its directory; all access
/// goes through it.
pub struct PersistentStore {
    root: Option<PathBuf>,
    shape: Shape,
    config_lock: Mutex<()>,
    policy_lock: Mutex<()>,
    endpoints_lock: Mutex<()>,
    schemas_lock: Mutex<()>,
}

impl PersistentStore {
    /// Open (or create) the state directory for the given shape.
    ///
    /// Directory creation failure is not fatal: the store comes up in
    /// in-memory-only mode.
    pub fn open(shape: Shape, state_dir: Option<PathBuf>) -> Self {
        let dir = state_dir.or_else(|| dirs::home_dir().map(|h| h.join(shape.state_dir_name())));
        let root = match dir {
            Some(d) => match std::fs::create_dir_all(&d) {
                Ok(()) => Some(d),
                Err(e) => {
                    tracing::warn!(
                        path = %d.display(),
                        error = %e,
                        "state directory unavailable; continuing in memory only"
                    );
                    TraceEvent::StoreDegraded {
                        path: d.display().to_string(),
                    }
                    .emit();
                    None
                }
            },
            None => {
                tracing::warn!("no home directory; continuing in memory only");
                TraceEvent::StoreDegraded { path: String::new() }.emit();
                None
            }
        };

        if let Some(root) = &root {
            tracing::info!(path = %root.display(), shape = shape.as_str(), "persistent store ready");
        }

        Self {
            root,
            shape,
            config_lock: Mutex::new(()),
            policy_lock: Mutex::new(()),
            endpoints_lock: Mutex::new(()),
            schemas_lock: Mutex::new(()),
        }
    }

    /// Whether state survives a restart.
    pub fn is_durable(&self) -> bool {
        self.root.is_some()
    }

    // ── instance identity ────────────────────────────────────────────

    pub fn load_config(&self) -> Option<InstanceIdentity> {
        let _g = self.config_lock.lock();
        self.read_doc(self.shape.config_file_name())
    }

    pub fn save_config(&self, identity: &InstanceIdentity) -> Result<()> {
        let _g = self.config_lock.lock();
        self.write_doc(self.shape.config_file_name(), identity)
    }

    // ── policy mappings ──────────────────────────────────────────────

    /// Returns `(mappings by canonical key, attributes, version)`.
    #[allow(clippy::type_complexity)]
    pub fn load_policy(
        &self,
    ) -> Option<(HashMap<String, String>, HashMap<String, PolicyAttributes>, u64)> {
        let _g = self.policy_lock.lock();
        let doc: PolicyDocument = self.read_doc(POLICY_FILE)?;
        Some((
            doc.mappings.into_iter().collect(),
            doc.attributes.into_iter().collect(),
            doc.version,
        ))
    }

    pub fn save_policy(
        &self,
        mappings: &HashMap<String, String>,
        attributes: &HashMap<String, PolicyAttributes>,
        version: u64,
    ) -> Result<()> {
        let _g = self.policy_lock.lock();
        let doc = PolicyDocument {
            version,
            mappings: mappings.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            attributes: attributes.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        };
        self.write_doc(POLICY_FILE, &doc)
    }

    // ── endpoint routing ─────────────────────────────────────────────

    pub fn load_endpoints(&self) -> Option<EndpointRouting> {
        let _g = self.endpoints_lock.lock();
        let doc: EndpointsDocument = self.read_doc(ENDPOINTS_FILE)?;
        Some(doc.routing)
    }

    pub fn save_endpoints(&self, routing: &EndpointRouting) -> Result<()> {
        let _g = self.endpoints_lock.lock();
        let doc = EndpointsDocument {
            routing: routing.clone(),
            saved_at: Utc::now(),
        };
        self.write_doc(ENDPOINTS_FILE, &doc)
    }

    // ── schema catalog ───────────────────────────────────────────────

    pub fn load_schemas(&self) -> Vec<SchemaEntry> {
        let _g = self.schemas_lock.lock();
        self.read_doc(SCHEMAS_FILE).unwrap_or_default()
    }

    /// Entries still awaiting Hub acknowledgement.
    pub fn get_created(&self) -> Vec<SchemaEntry> {
        self.load_schemas()
            .into_iter()
            .filter(|e| e.status == SchemaStatus::Created)
            .collect()
    }

    /// Merge a freshly-collected catalog into storage.
    ///
    /// Union by key: entries only in `fresh` are inserted as CREATED;
    /// entries present in both keep their stored status and policy name but
    /// pick up any missing descriptive fields from `fresh`; entries only in
    /// storage are kept untouched.  Returns the count of inserted plus
    /// materially-modified entries.
    pub fn compare_and_update(&self, fresh: &[SchemaEntry]) -> usize {
        let _g = self.schemas_lock.lock();
        let mut stored: Vec<SchemaEntry> = self.read_doc(SCHEMAS_FILE).unwrap_or_default();
        let index: HashMap<String, usize> = stored
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key(), i))
            .collect();

        let mut changed = 0usize;
        for incoming in fresh {
            match index.get(&incoming.key()) {
                None => {
                    let mut entry = incoming.clone();
                    entry.status = SchemaStatus::Created;
                    stored.push(entry);
                    changed += 1;
                }
                Some(&i) => {
                    if adopt_descriptive_fields(&mut stored[i], incoming) {
                        changed += 1;
                    }
                }
            }
        }

        if changed > 0 {
            self.persist_schemas(&stored);
        }
        changed
    }

    /// Advance the status of the entries with the given keys.  Transitions
    /// only move forward; a REGISTERED entry never regresses.  Returns the
    /// number of entries actually updated.
    pub fn update_status(&self, keys: &[String], status: SchemaStatus) -> usize {
        let _g = self.schemas_lock.lock();
        let mut stored: Vec<SchemaEntry> = self.read_doc(SCHEMAS_FILE).unwrap_or_default();
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();

        let mut updated = 0usize;
        for entry in &mut stored {
            if !wanted.contains(entry.key().as_str()) {
                continue;
            }
            let advances = entry.status == SchemaStatus::Created && status == SchemaStatus::Registered;
            if advances {
                entry.status = status;
                updated += 1;
            }
        }

        if updated > 0 {
            self.persist_schemas(&stored);
        }
        updated
    }

    /// Best-effort backfill of policy names onto stored entries, keyed by
    /// the catalog key.  Returns the number of entries updated.
    pub fn update_policy_names(&self, by_key: &HashMap<String, String>) -> usize {
        let _g = self.schemas_lock.lock();
        let mut stored: Vec<SchemaEntry> = self.read_doc(SCHEMAS_FILE).unwrap_or_default();

        let mut updated = 0usize;
        for entry in &mut stored {
            if let Some(policy) = by_key.get(&entry.key()) {
                if entry.policy_name.as_deref() != Some(policy.as_str()) {
                    entry.policy_name = Some(policy.clone());
                    updated += 1;
                }
            }
        }

        if updated > 0 {
            self.persist_schemas(&stored);
        }
        updated
    }

    fn persist_schemas(&self, entries: &[SchemaEntry]) {
        if let Err(e) = self.write_doc(SCHEMAS_FILE, &entries) {
            tracing::warn!(error = %e, "failed to persist schema catalog");
        }
    }

    // ── document I/O ─────────────────────────────────────────────────

    fn read_doc<T: DeserializeOwned>(&self, file: &str) -> Option<T> {
        let root = self.root.as_ref()?;
        let path = root.join(file);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read document");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                // Stale file stays on disk for inspection.
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "document failed to parse; treating as empty"
                );
                None
            }
        }
    }

    fn write_doc<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let Some(root) = self.root.as_ref() else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(value)?;
        let mut tmp = tempfile::NamedTempFile::new_in(root)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(root.join(file))
            .map_err(|e| Error::Persistence(format!("renaming {file}: {e}")))?;
        Ok(())
    }
}

/// Copy descriptive fields the stored entry is missing.  Status and policy
/// name are never taken from `fresh`.
fn adopt_descriptive_fields(stored: &mut SchemaEntry, fresh: &SchemaEntry) -> bool {
    let mut touched = false;

    macro_rules! adopt {
        ($field:ident) => {
            if stored.$field.is_none() && fresh.$field.is_some() {
                stored.$field = fresh.$field.clone();
                touched = true;
            }
        };
    }

    adopt!(datasource_id);
    adopt!(db_vendor);
    adopt!(database_name);
    adopt!(column_type);
    adopt!(is_nullable);
    adopt!(column_default);

    touched
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
