//! PostgREST client for the product catalog table.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::{json, Value};
use tracing::debug;

use super::{build_client, require_success, SupabaseConfig};
use crate::cleanup::{Catalog, ProductRow, SweepFilter};

const TABLE: &str = "pending_products";
/// PostgREST `like` pattern for generated model URLs (`*` is the wildcard).
const MODEL_URL_PATTERN: &str = "like.*3d-models*";

pub struct CatalogClient {
    http: Client,
    base_url: String,
}

impl CatalogClient {
    pub fn new(cfg: &SupabaseConfig) -> Result<Self> {
        Ok(Self {
            http: build_client(cfg)?,
            base_url: cfg.base_url.clone(),
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, TABLE)
    }
}

fn filter_params(filter: &SweepFilter) -> Vec<(String, String)> {
    let mut params = vec![
        ("glb_url".to_string(), "not.is.null".to_string()),
        ("glb_url".to_string(), MODEL_URL_PATTERN.to_string()),
    ];
    if let Some(from) = filter.updated_from {
        params.push(("updated_at".to_string(), format!("gte.{}", from.to_rfc3339())));
    }
    if let Some(until) = filter.updated_until {
        params.push(("updated_at".to_string(), format!("lt.{}", until.to_rfc3339())));
    }
    params
}

/// Renders an id for PostgREST's `in.(...)` filter. Bigint and uuid keys are
/// both passed unquoted.
fn id_literal(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `Content-Range: 0-24/3573` (or `*/0` when nothing matches) → total.
fn parse_content_range_total(raw: &str) -> Result<u64> {
    raw.rsplit('/')
        .next()
        .unwrap_or_default()
        .parse::<u64>()
        .map_err(|_| anyhow!("unparseable Content-Range '{raw}'"))
}

#[async_trait]
impl Catalog for CatalogClient {
    async fn fetch_page(&self, filter: &SweepFilter, limit: usize) -> Result<Vec<ProductRow>> {
        let mut params = filter_params(filter);
        params.push(("select".to_string(), "id,item_code,glb_url".to_string()));
        params.push(("limit".to_string(), limit.to_string()));

        let resp = self
            .http
            .get(self.table_url())
            .query(&params)
            .send()
            .await
            .context("catalog select request")?;
        let resp = require_success(resp, "catalog select").await?;
        let rows: Vec<ProductRow> = resp.json().await.context("decoding catalog rows")?;
        debug!(rows = rows.len(), "catalog: page fetched");
        Ok(rows)
    }

    async fn count_matching(&self, filter: &SweepFilter) -> Result<u64> {
        let mut params = filter_params(filter);
        params.push(("select".to_string(), "id".to_string()));
        params.push(("limit".to_string(), "1".to_string()));

        let resp = self
            .http
            .get(self.table_url())
            .query(&params)
            .header("Prefer", "count=exact")
            .send()
            .await
            .context("catalog count request")?;
        let resp = require_success(resp, "catalog count").await?;
        let range = resp
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| anyhow!("catalog count response missing Content-Range"))?;
        parse_content_range_total(range)
    }

    async fn clear_model_urls(&self, ids: &[Value]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let id_list = ids.iter().map(id_literal).collect::<Vec<_>>().join(",");

        let resp = self
            .http
            .patch(self.table_url())
            .query(&[("id", format!("in.({id_list})"))])
            .header("Prefer", "return=representation")
            .json(&json!({ "glb_url": null }))
            .send()
            .await
            .context("catalog update request")?;
        let resp = require_success(resp, "catalog update").await?;
        let rows: Vec<Value> = resp.json().await.context("decoding update response")?;
        debug!(modified = rows.len(), submitted = ids.len(), "catalog: urls cleared");
        Ok(rows.len() as u64)
    }
}
