//! `dadp-sync` — bootstrap and synchronization.
//!
//! The long-lived coordinator between the local state (store, resolver,
//! engine handle) and the Hub: instance registration, schema discovery and
//! publication, version-gated policy snapshot pulls, endpoint discovery,
//! and re-registration on identity loss.  Everything it learns is persisted
//! through the store, so a Hub outage at startup degrades to the last
//! known-good state instead of a dead client.

pub mod gate;
pub mod orchestrator;

pub use gate::SchemaGate;
pub use orchestrator::{EngineFactory, SyncOrchestrator};
