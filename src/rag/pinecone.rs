use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

use super::config::VectorIndexConfig;
use super::index::VectorIndex;
use super::types::{MetadataFilter, VectorMatch, VectorRecord};

const API_VERSION: &str = "2024-07";

/// Minimal HTTP client for Pinecone's REST surface.
pub struct PineconeClient {
    http: reqwest::Client,
    config: VectorIndexConfig,
    host: String,
}

impl PineconeClient {
    /// Resolve the data-plane host, creating the index when it does not exist yet.
    pub async fn connect(config: VectorIndexConfig, dimension: usize) -> anyhow::Result<Self> {
        let timeout = Duration::from_millis(config.http_timeout_ms.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Pinecone HTTP client")?;

        let mut client = Self {
            http,
            config,
            host: String::new(),
        };

        client.host = match client.config.index_host.clone() {
            Some(host) => host,
            None => client.resolve_host(dimension).await?,
        };
        info!(index = %client.config.index_name, host = %client.host, "Pinecone index ready");

        Ok(client)
    }

    fn data_endpoint(&self, path: &str) -> String {
        let host = self.host.trim_end_matches('/');
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };
        format!("{base}/{}", path.trim_start_matches('/'))
    }

    fn control_endpoint(&self, path: &str) -> String {
        let base = self.config.control_plane_url.trim_end_matches('/');
        format!("{base}/{}", path.trim_start_matches('/'))
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Api-Key", &self.config.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn resolve_host(&self, dimension: usize) -> anyhow::Result<String> {
        let url = self.control_endpoint(&format!("indexes/{}", self.config.index_name));
        let response = self
            .apply_auth(self.http.get(url))
            .send()
            .await
            .context("Pinecone describe_index request failed")?;

        let description = if response.status() == StatusCode::NOT_FOUND {
            self.create_index(dimension).await?
        } else {
            response
                .error_for_status()
                .context("Pinecone describe_index returned error status")?
                .json::<IndexDescription>()
                .await
                .context("Failed to deserialize Pinecone index description")?
        };

        description
            .host
            .filter(|host| !host.is_empty())
            .ok_or_else(|| anyhow!("Pinecone index '{}' has no host yet", self.config.index_name))
    }

    async fn create_index(&self, dimension: usize) -> anyhow::Result<IndexDescription> {
        info!(index = %self.config.index_name, dimension, "Creating Pinecone index");
        let payload = json!({
            "name": self.config.index_name,
            "dimension": dimension,
            "metric": "cosine",
            "spec": {
                "serverless": {
                    "cloud": "aws",
                    "region": self.config.region,
                }
            }
        });

        self.apply_auth(self.http.post(self.control_endpoint("indexes")))
            .json(&payload)
            .send()
            .await
            .context("Pinecone create_index request failed")?
            .error_for_status()
            .context("Pinecone create_index returned error status")?
            .json::<IndexDescription>()
            .await
            .context("Failed to deserialize Pinecone create_index response")
    }

    async fn post_data<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        payload: &T,
    ) -> anyhow::Result<R> {
        let response = self
            .apply_auth(self.http.post(self.data_endpoint(path)))
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Pinecone '{path}' request failed"))?
            .error_for_status()
            .with_context(|| format!("Pinecone '{path}' returned error status"))?;

        response
            .json::<R>()
            .await
            .with_context(|| format!("Failed to deserialize Pinecone '{path}' response"))
    }

    /// Vector counts per namespace; handy as a connectivity smoke test.
    pub async fn describe_index_stats(&self) -> anyhow::Result<IndexStats> {
        self.post_data("describe_index_stats", &json!({})).await
    }
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    #[serde(default)]
    host: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default)]
    pub total_vector_count: u64,
    #[serde(default)]
    pub namespaces: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    namespace: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

/// Translate an equality filter into Pinecone's `$eq` operator syntax.
fn filter_expression(filter: &MetadataFilter) -> Option<Value> {
    if filter.is_empty() {
        return None;
    }

    let clauses: Map<String, Value> = filter
        .0
        .iter()
        .map(|(key, value)| (key.clone(), json!({ "$eq": value })))
        .collect();
    Some(Value::Object(clauses))
}

#[async_trait]
impl VectorIndex for PineconeClient {
    #[instrument(level = "debug", skip(self, records), fields(count = records.len()))]
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> anyhow::Result<()> {
        let payload = UpsertRequest {
            vectors: &records,
            namespace,
        };
        let _: Value = self.post_data("vectors/upsert", &payload).await?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self, vector, filter))]
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> anyhow::Result<Vec<VectorMatch>> {
        let payload = QueryRequest {
            namespace,
            vector,
            top_k,
            include_metadata: true,
            filter: filter.and_then(filter_expression),
        };
        let response: QueryResponse = self.post_data("query", &payload).await?;
        Ok(response.matches)
    }
}
