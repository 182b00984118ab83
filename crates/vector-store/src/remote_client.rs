use crate::error::{Result, VectorStoreError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Data-plane endpoint of the managed index, e.g. `https://finance-assistant-abc.svc.pinecone.io`.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Sent as the namespace so several indexes can share one service.
    pub index_name: String,
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            index_name: "finance-assistant".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMatch {
    pub id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteIndexStats {
    #[serde(default)]
    pub dimension: usize,
    #[serde(default)]
    pub total_vector_count: u64,
}

/// Client for an external managed vector service.
///
/// Every transport or service failure must surface as [`VectorStoreError::BackendUnavailable`].
#[async_trait]
pub trait RemoteVectorClient: Send + Sync {
    async fn upsert(&self, records: Vec<RemoteRecord>) -> Result<()>;

    /// Best matches for `vector`, in any order.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<RemoteMatch>>;

    async fn describe(&self) -> Result<RemoteIndexStats>;
}

/// HTTP client for a Pinecone-style data plane.
pub struct HttpVectorClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    namespace: String,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [RemoteRecord],
    namespace: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    namespace: &'a str,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<RemoteMatch>,
}

fn unavailable(action: &str, err: impl std::fmt::Display) -> VectorStoreError {
    VectorStoreError::BackendUnavailable(format!("{action}: {err}"))
}

impl HttpVectorClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                VectorStoreError::Other(
                    "Remote backend selected but remote.base_url (FINRAG_REMOTE_URL) is not set"
                        .to_string(),
                )
            })?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|e| VectorStoreError::Other(format!("HTTP client init failed: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            namespace: config.index_name.clone(),
        })
    }

    async fn post<B: Serialize + Sync>(
        &self,
        action: &str,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Api-Key", key);
        }
        let response = request.send().await.map_err(|e| unavailable(action, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::BackendUnavailable(format!(
                "{action}: HTTP {status}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteVectorClient for HttpVectorClient {
    async fn upsert(&self, records: Vec<RemoteRecord>) -> Result<()> {
        let body = UpsertRequest {
            vectors: &records,
            namespace: &self.namespace,
        };
        self.post("upsert", "vectors/upsert", &body).await?;
        log::debug!("Upserted {} vectors to {}", records.len(), self.base_url);
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<RemoteMatch>> {
        let body = QueryRequest {
            vector,
            top_k,
            include_metadata: false,
            include_values: false,
            namespace: &self.namespace,
        };
        let response = self.post("query", "query", &body).await?;
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| unavailable("query response", e))?;
        Ok(parsed.matches)
    }

    async fn describe(&self) -> Result<RemoteIndexStats> {
        let response = self
            .post("describe_index_stats", "describe_index_stats", &serde_json::json!({}))
            .await?;
        response
            .json()
            .await
            .map_err(|e| unavailable("describe_index_stats response", e))
    }
}
