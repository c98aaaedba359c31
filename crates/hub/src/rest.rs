//! REST implementation of [`HubApi`].
//!
//! Wraps a `reqwest::Client` with the standard header decoration
//! (`X-Tenant` when a tenant exists, `X-Current-Version`, a per-request
//! trace id) and automatic retry + exponential back-off on transient
//! (5xx / timeout) failures.  4xx and 304 are outcomes, not failures, and
//! pass straight through to interpretation.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use uuid::Uuid;

use dadp_domain::config::{HubConfig, SyncConfig};
use dadp_domain::error::{Error, Result};
use dadp_domain::model::{SchemaEntry, Shape};
use dadp_domain::trace::TraceEvent;

use crate::types::{
    interpret_ack, interpret_check, interpret_pull, interpret_register, RegisterRequest,
    SchemaSyncRequest, SchemaSyncRow,
};
use crate::{CheckOutcome, HubApi, PullOutcome};

/// Base path of the Hub control-plane API.
const HUB_API_BASE: &str = "/hub/api/v1";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Construction options for [`RestHubClient`].
#[derive(Debug, Clone)]
pub struct HubClientOptions {
    pub timeout_ms: u64,
    pub max_retries: u32,
    /// When set, the trust store contains only this PEM bundle.
    pub ca_cert_path: Option<PathBuf>,
}

impl Default for HubClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            max_retries: 2,
            ca_cert_path: None,
        }
    }
}

impl HubClientOptions {
    pub fn from_config(hub: &HubConfig, sync: &SyncConfig, ca_cert_path: Option<PathBuf>) -> Self {
        Self {
            timeout_ms: sync.http_timeout_ms,
            max_retries: hub.max_retries,
            ca_cert_path,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// REST client for the Hub control plane.
///
/// Created once per process and reused; the tenant identifier travels per
/// call, so an identity change never requires a rebuild of this client.
#[derive(Debug, Clone)]
pub struct RestHubClient {
    http: Client,
    base_url: String,
    max_retries: u32,
}

impl RestHubClient {
    pub fn new(base_url: &str, opts: HubClientOptions) -> Result<Self> {
        let mut builder = Client::builder().timeout(Duration::from_millis(opts.timeout_ms));
        if let Some(path) = &opts.ca_cert_path {
            let pem = std::fs::read(path)
                .map_err(|e| Error::Config(format!("reading CA bundle {}: {e}", path.display())))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::Config(format!("parsing CA bundle {}: {e}", path.display())))?;
            builder = builder
                .use_rustls_tls()
                .tls_built_in_root_certs(false)
                .add_root_certificate(cert);
        }
        let http = builder.build().map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            max_retries: opts.max_retries,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{HUB_API_BASE}{endpoint}", self.base_url)
    }

    /// Decorate a request with the control-plane headers.  The tenant
    /// header is only attached once a hub identity exists.
    fn decorate(rb: RequestBuilder, hub_id: &str, current_version: Option<u64>) -> RequestBuilder {
        let mut rb = rb.header("X-Trace-Id", Uuid::new_v4().to_string());
        if !hub_id.is_empty() {
            rb = rb.header("X-Tenant", hub_id);
        }
        if let Some(version) = current_version {
            rb = rb.header("X-Current-Version", version.to_string());
        }
        rb
    }

    /// Execute with retry + exponential back-off on 5xx and transport
    /// faults.  Returns the final `(status, body)` pair for interpretation.
    async fn execute(
        &self,
        endpoint: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<(u16, String)> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let start = Instant::now();
            let result = build_request().send().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    TraceEvent::HubCall {
                        endpoint: endpoint.to_owned(),
                        status,
                        duration_ms,
                    }
                    .emit();

                    let body = resp.text().await.unwrap_or_default();
                    if (500..600).contains(&status) && attempt < self.max_retries {
                        last_err = Some(Error::Hub(format!("{endpoint} returned {status}")));
                        continue;
                    }
                    return Ok((status, body));
                }
                Err(e) => {
                    TraceEvent::HubCall {
                        endpoint: endpoint.to_owned(),
                        status: 0,
                        duration_ms,
                    }
                    .emit();
                    last_err = Some(if e.is_timeout() {
                        Error::Timeout(e.to_string())
                    } else {
                        Error::Hub(e.to_string())
                    });
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Hub(format!("{endpoint}: retries exhausted"))))
    }
}

#[async_trait]
impl HubApi for RestHubClient {
    async fn register_instance(&self, alias: &str, shape: Shape) -> Result<String> {
        let url = self.url("/instances/register");
        let req = RegisterRequest {
            instance_id: alias,
            shape: shape.as_str(),
        };
        let (status, body) = self
            .execute("POST /instances/register", || {
                Self::decorate(self.http.post(&url).json(&req), "", None)
            })
            .await?;
        interpret_register(status, &body)
    }

    async fn check_mapping_change(
        &self,
        hub_id: &str,
        current_version: u64,
    ) -> Result<CheckOutcome> {
        let url = self.url("/mappings/check");
        let (status, body) = self
            .execute("GET /mappings/check", || {
                Self::decorate(self.http.get(&url), hub_id, Some(current_version))
            })
            .await?;
        interpret_check(status, &body)
    }

    async fn pull_policies(
        &self,
        hub_id: &str,
        alias: &str,
        current_version: u64,
    ) -> Result<PullOutcome> {
        let url = self.url("/policies");
        let (status, body) = self
            .execute("GET /policies", || {
                Self::decorate(
                    self.http
                        .get(&url)
                        .query(&[("instanceId", alias), ("alias", alias)]),
                    hub_id,
                    Some(current_version),
                )
            })
            .await?;
        interpret_pull(status, &body)
    }

    async fn sync_schemas(
        &self,
        hub_id: &str,
        alias: &str,
        entries: &[SchemaEntry],
    ) -> Result<bool> {
        let url = self.url("/schema/sync");
        let req = SchemaSyncRequest {
            instance_id: alias,
            schemas: entries.iter().map(SchemaSyncRow::from).collect(),
        };
        let (status, body) = self
            .execute("POST /schema/sync", || {
                Self::decorate(self.http.post(&url).json(&req), hub_id, None)
            })
            .await?;
        interpret_ack(status, &body)
    }
}
