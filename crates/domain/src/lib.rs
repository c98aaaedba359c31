//! `dadp-domain` — shared types for the DADP field-encryption client.
//!
//! Everything the other crates agree on lives here: the error enum, the
//! configuration tree, the control-plane data model (identity, policy
//! mappings, endpoint routing, schema catalog entries), identifier
//! normalization rules, ciphertext envelope recognition, and the structured
//! trace events emitted across the workspace.

pub mod config;
pub mod envelope;
pub mod error;
pub mod ident;
pub mod model;
pub mod trace;

pub use config::{BatchConfig, Config, ConfigIssue, ConfigSeverity, EngineConfig, HubConfig, InterceptConfig, SyncConfig};
pub use error::{EngineErrorKind, Error, Result};
pub use model::{
    EndpointRouting, InstanceIdentity, MaskDirective, PolicyAttributes, PolicyMapping,
    PolicySnapshot, SchemaEntry, SchemaStatus, Shape,
};
