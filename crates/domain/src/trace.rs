use serde::Serialize;

/// Structured trace events emitted across all dadp-client crates.
///
/// Emission is best-effort: a serialization failure degrades to an empty
/// payload, never to a panic on the hot path.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    HubCall {
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
    EngineCall {
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
    InstanceRegistered {
        hub_id: String,
        alias: String,
    },
    Reregistered {
        old_hub_id: String,
        new_hub_id: String,
    },
    PolicyRefreshed {
        version: u64,
        mappings: usize,
    },
    SchemasPublished {
        count: usize,
    },
    EndpointAdopted {
        crypto_url: String,
        version: u64,
    },
    EndpointRejected {
        crypto_url: String,
    },
    FallbackToOriginal {
        reason: String,
    },
    StoreDegraded {
        path: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "dadp_event");
    }
}
