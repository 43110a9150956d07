//! Thin clients for the hosted Supabase services: PostgREST for the catalog
//! table, the Storage API for the asset bucket. Both share one config and
//! authenticate with the service-role key.

pub mod rest;
pub mod storage;

use anyhow::{anyhow, Context, Result};
use reqwest::header;

use crate::util::env as env_util;

const USER_AGENT: &str = concat!("catmaint/", env!("CARGO_PKG_VERSION"));

/// Connection settings shared by the REST and Storage clients.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project base URL, e.g. `https://proj.supabase.co` (no trailing slash).
    pub base_url: String,
    pub service_key: String,
    pub timeout_secs: u64,
}

impl SupabaseConfig {
    /// Resolves the config from the environment; missing credentials are a
    /// fatal startup error, before any work is performed.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: env_util::supabase_url()?,
            service_key: env_util::supabase_service_key()?,
            timeout_secs: env_util::env_parse("SUPABASE_HTTP_TIMEOUT", 30u64),
        })
    }
}

fn auth_headers(service_key: &str) -> Result<header::HeaderMap> {
    let mut headers = header::HeaderMap::new();
    let mut bearer = header::HeaderValue::from_str(&format!("Bearer {service_key}"))
        .context("service key is not a valid header value")?;
    bearer.set_sensitive(true);
    let mut apikey = header::HeaderValue::from_str(service_key)
        .context("service key is not a valid header value")?;
    apikey.set_sensitive(true);
    headers.insert(header::AUTHORIZATION, bearer);
    headers.insert("apikey", apikey);
    Ok(headers)
}

fn build_client(cfg: &SupabaseConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
        .default_headers(auth_headers(&cfg.service_key)?)
        .build()
        .context("building Supabase HTTP client")
}

/// Converts a non-2xx response into an error carrying the body, which is
/// where PostgREST and Storage put their diagnostics.
async fn require_success(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(anyhow!("{what} failed: {status}: {body}"))
}
