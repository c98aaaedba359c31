//! REST implementation of [`CryptoEngine`].
//!
//! Wraps a `reqwest::Client` and translates every trait method into the
//! corresponding HTTP call against the Engine data plane.  Retries are off
//! by default on this path: the interception layer's fail-open / fallback
//! semantics decide what happens on a fault, not the transport.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use uuid::Uuid;

use dadp_domain::config::EngineConfig;
use dadp_domain::error::{Error, Result};
use dadp_domain::model::{is_hub_control_url, MaskDirective};
use dadp_domain::trace::TraceEvent;

use crate::types::{
    parse_decrypt_batch_body, parse_decrypt_body, parse_encrypt_batch_body, parse_encrypt_body,
    BatchRequest, DecryptBatchItemWire, DecryptRequest, EncryptBatchItemWire, EncryptRequest,
};
use crate::{BatchDecryptItem, BatchEncryptItem, CryptoEngine, DecryptOutcome, TenantHandle};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Construction options for [`RestCryptoClient`].
#[derive(Debug, Clone)]
pub struct CryptoClientOptions {
    pub api_base_path: String,
    /// When set, the trust store contains only this PEM bundle.
    pub ca_cert_path: Option<PathBuf>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    /// Tenant identity carried as `X-Tenant` on every data-plane request
    /// while bound.
    pub tenant: TenantHandle,
}

impl Default for CryptoClientOptions {
    fn default() -> Self {
        Self {
            api_base_path: "/api/v1/crypto".into(),
            ca_cert_path: None,
            timeout_ms: 5000,
            max_retries: 0,
            tenant: TenantHandle::unbound(),
        }
    }
}

impl From<&EngineConfig> for CryptoClientOptions {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            api_base_path: cfg.api_base_path.clone(),
            ca_cert_path: cfg.ca_cert_path.clone(),
            timeout_ms: cfg.timeout_ms,
            max_retries: cfg.max_retries,
            tenant: TenantHandle::unbound(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// REST client for the Engine data plane.
///
/// Created by the sync orchestrator whenever endpoint routing or identity
/// changes, and reused via [`EngineHandle`](crate::EngineHandle) until the
/// next swap.  The underlying `reqwest::Client` maintains a connection
/// pool.
#[derive(Debug, Clone)]
pub struct RestCryptoClient {
    http: Client,
    base_url: String,
    api_base_path: String,
    max_retries: u32,
    tenant: TenantHandle,
}

impl RestCryptoClient {
    /// Build a new client for the given crypto base URL.
    ///
    /// Fails at construction when the resulting API base path contains the
    /// Hub control segment: the data plane must never point back at the
    /// Hub's direct-encrypt path.
    pub fn new(base_url: &str, opts: CryptoClientOptions) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_owned();
        if is_hub_control_url(&base_url) || is_hub_control_url(&opts.api_base_path) {
            return Err(Error::Config(format!(
                "crypto base path must not contain the Hub control segment: {base_url}{}",
                opts.api_base_path
            )));
        }

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
            base_url,
            api_base_path: opts.api_base_path,
            max_retries: opts.max_retries,
            tenant: opts.tenant,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}{endpoint}", self.base_url, self.api_base_path)
    }

    /// Execute a request; retry on transport faults and 5xx when retries
    /// are configured.  Returns the final `(status, body)` pair — decrypt
    /// interpretation needs the body whatever the status, so classification
    /// happens in the parsers.
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
            let mut rb = build_request().header("X-Trace-Id", Uuid::new_v4().to_string());
            if let Some(tenant) = self.tenant.current() {
                rb = rb.header("X-Tenant", tenant);
            }
            let result = rb.send().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    TraceEvent::EngineCall {
                        endpoint: endpoint.to_owned(),
                        status,
                        duration_ms,
                    }
                    .emit();

                    let body = resp.text().await.unwrap_or_default();
                    if (500..600).contains(&status) && attempt < self.max_retries {
                        last_err = Some(Error::engine_connection(format!(
                            "{endpoint} returned {status}"
                        )));
                        continue;
                    }
                    return Ok((status, body));
                }
                Err(e) => {
                    TraceEvent::EngineCall {
                        endpoint: endpoint.to_owned(),
                        status: 0,
                        duration_ms,
                    }
                    .emit();
                    last_err = Some(from_reqwest(e));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::engine_connection(format!("{endpoint}: retries exhausted"))))
    }
}

#[async_trait]
impl CryptoEngine for RestCryptoClient {
    async fn encrypt(
        &self,
        data: &str,
        policy_name: Option<&str>,
        for_search: bool,
    ) -> Result<String> {
        let url = self.url("/encrypt");
        let req = EncryptRequest {
            data,
            policy_name,
            for_search,
        };
        let (status, body) = self
            .execute("POST /encrypt", || self.http.post(&url).json(&req))
            .await?;
        parse_encrypt_body(status, &body)
    }

    async fn decrypt(
        &self,
        data: &str,
        policy_name: Option<&str>,
        mask: Option<&MaskDirective>,
    ) -> Result<DecryptOutcome> {
        let url = self.url("/decrypt");
        let req = DecryptRequest {
            encrypted_data: data,
            policy_name,
            mask_policy_name: mask.and_then(|m| m.policy_name.as_deref()),
            mask_policy_uid: mask.and_then(|m| m.policy_uid.as_deref()),
        };
        let (status, body) = self
            .execute("POST /decrypt", || self.http.post(&url).json(&req))
            .await?;
        parse_decrypt_body(status, &body)
    }

    async fn encrypt_batch(&self, items: &[BatchEncryptItem]) -> Result<Vec<Option<String>>> {
        let url = self.url("/encrypt/batch");
        let req = BatchRequest {
            items: items
                .iter()
                .map(|item| EncryptBatchItemWire {
                    data: &item.data,
                    policy_name: item.policy_name.as_deref(),
                })
                .collect(),
        };
        let (status, body) = self
            .execute("POST /encrypt/batch", || self.http.post(&url).json(&req))
            .await?;
        parse_encrypt_batch_body(status, &body, items.len())
    }

    async fn decrypt_batch(&self, items: &[BatchDecryptItem]) -> Result<Vec<DecryptOutcome>> {
        let url = self.url("/decrypt/batch");
        let req = BatchRequest {
            items: items
                .iter()
                .map(|item| DecryptBatchItemWire {
                    data: &item.data,
                    mask_policy_name: item.mask.as_ref().and_then(|m| m.policy_name.as_deref()),
                    mask_policy_uid: item.mask.as_ref().and_then(|m| m.policy_uid.as_deref()),
                })
                .collect(),
        };
        let (status, body) = self
            .execute("POST /decrypt/batch", || self.http.post(&url).json(&req))
            .await?;
        parse_decrypt_batch_body(status, &body, items.len())
    }
}

/// Convert a `reqwest::Error` into a domain error.  Timeouts keep their own
/// variant so callers can distinguish deadline misses from refusals.
fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_rejects_hub_control_paths() {
        let err = RestCryptoClient::new(
            "https://hub.example.com/hub/api/v1",
            CryptoClientOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = RestCryptoClient::new(
            "https://crypto.example.com",
            CryptoClientOptions {
                api_base_path: "/hub/api/v1/crypto".into(),
                ..CryptoClientOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn construction_accepts_data_plane_urls() {
        let client = RestCryptoClient::new(
            "https://crypto.example.com/",
            CryptoClientOptions::default(),
        )
        .unwrap();
        assert_eq!(
            client.url("/encrypt"),
            "https://crypto.example.com/api/v1/crypto/encrypt"
        );
    }

    #[test]
    fn missing_ca_bundle_fails_at_init() {
        let err = RestCryptoClient::new(
            "https://crypto.example.com",
            CryptoClientOptions {
                ca_cert_path: Some(PathBuf::from("/nonexistent/ca.pem")),
                ..CryptoClientOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
