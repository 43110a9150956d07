//! Storage API client for bulk object deletion.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{build_client, require_success, SupabaseConfig};
use crate::cleanup::ModelStore;

/// Bucket holding the generated product assets.
pub const MODEL_BUCKET: &str = "product-files";

pub struct StorageClient {
    http: Client,
    base_url: String,
    bucket: String,
}

impl StorageClient {
    pub fn new(cfg: &SupabaseConfig, bucket: &str) -> Result<Self> {
        Ok(Self {
            http: build_client(cfg)?,
            base_url: cfg.base_url.clone(),
            bucket: bucket.to_string(),
        })
    }

    fn bucket_url(&self) -> String {
        format!("{}/storage/v1/object/{}", self.base_url, self.bucket)
    }
}

#[async_trait]
impl ModelStore for StorageClient {
    async fn remove(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let resp = self
            .http
            .delete(self.bucket_url())
            .json(&json!({ "prefixes": keys }))
            .send()
            .await
            .context("storage delete request")?;
        let resp = require_success(resp, "storage delete").await?;

        // The API echoes the removed objects; fall back to the submitted
        // count when the body is not the expected array.
        let removed = match resp.json::<Value>().await {
            Ok(Value::Array(items)) => items.len(),
            _ => keys.len(),
        };
        debug!(submitted = keys.len(), removed, bucket = %self.bucket, "storage: sub-batch removed");
        Ok(removed)
    }
}
