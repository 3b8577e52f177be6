//! Pinecone 벡터 인덱스 - REST 클라이언트
//!
//! 컨트롤 플레인(`/indexes`)으로 인덱스 호스트를 조회한 뒤
//! 데이터 플레인(`https://{host}/...`)으로 쓰기 / 검색 / 삭제합니다.
//! ref: https://docs.pinecone.io/reference/api/introduction

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{IndexInfo, RecordMetadata, ScoredRecord, VectorIndexService, VectorRecord};

/// 컨트롤 플레인 기본 URL
pub const PINECONE_CONTROL_URL: &str = "https://api.pinecone.io";

const API_VERSION: &str = "2024-07";

/// 서버리스 인덱스 생성 위치
const SERVERLESS_CLOUD: &str = "aws";
const SERVERLESS_REGION: &str = "us-east-1";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexDescription>,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    name: String,
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    host: Option<String>,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<WireVector<'a>>,
    namespace: &'a str,
}

#[derive(Debug, Serialize)]
struct WireVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a RecordMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<RecordMetadata>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest<'a> {
    delete_all: bool,
    namespace: &'a str,
}

// ============================================================================
// PineconeIndex
// ============================================================================

/// Pinecone 인덱스 서비스
pub struct PineconeIndex {
    api_key: String,
    control_url: String,
    client: reqwest::Client,
    /// 인덱스 이름 → 데이터 플레인 호스트
    hosts: Mutex<HashMap<String, String>>,
}

impl PineconeIndex {
    pub fn new(api_key: String, control_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            control_url: control_url.trim_end_matches('/').to_string(),
            client,
            hosts: Mutex::new(HashMap::new()),
        })
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    /// 인덱스 호스트 조회 (최초 1회만 컨트롤 플레인 호출)
    async fn host(&self, index: &str) -> Result<String> {
        let mut hosts = self.hosts.lock().await;
        if let Some(host) = hosts.get(index) {
            return Ok(host.clone());
        }

        let url = format!("{}/indexes/{}", self.control_url, index);
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .context("Failed to describe index")?;

        let status = response.status();
        if status.as_u16() == 404 {
            anyhow::bail!("Index not found: {}", index);
        }
        let description: IndexDescription = parse_json(response, "describe index").await?;

        let host = description
            .host
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Index {} has no host yet", index))?;
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            format!("https://{}", host)
        };

        tracing::debug!("Resolved Pinecone host for {}: {}", index, base);
        hosts.insert(index.to_string(), base.clone());
        Ok(base)
    }
}

/// 성공 응답 본문 파싱 / 실패 응답은 에러로
async fn parse_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation: &str,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .context("Failed to read response body")?;

    if !status.is_success() {
        anyhow::bail!("Pinecone {} failed ({}): {}", operation, status, body);
    }

    serde_json::from_str(&body)
        .with_context(|| format!("Failed to parse Pinecone {} response", operation))
}

#[async_trait]
impl VectorIndexService for PineconeIndex {
    async fn upsert(&self, index: &str, namespace: &str, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let host = self.host(index).await?;
        let request = UpsertRequest {
            vectors: records
                .iter()
                .map(|r| WireVector {
                    id: &r.id,
                    values: &r.values,
                    metadata: &r.metadata,
                })
                .collect(),
            namespace,
        };

        let response = self
            .request(reqwest::Method::POST, &format!("{}/vectors/upsert", host))
            .json(&request)
            .send()
            .await
            .context("Failed to send upsert request")?;

        let parsed: UpsertResponse = parse_json(response, "upsert").await?;
        Ok(parsed.upserted_count)
    }

    async fn query(
        &self,
        index: &str,
        namespace: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let host = self.host(index).await?;
        let request = QueryRequest {
            namespace,
            vector,
            top_k: k,
            include_metadata: true,
            include_values: false,
        };

        let response = self
            .request(reqwest::Method::POST, &format!("{}/query", host))
            .json(&request)
            .send()
            .await
            .context("Failed to send query request")?;

        let parsed: QueryResponse = parse_json(response, "query").await?;

        Ok(parsed
            .matches
            .into_iter()
            .filter_map(|m| match m.metadata {
                Some(metadata) => Some(ScoredRecord {
                    id: m.id,
                    score: m.score,
                    metadata,
                }),
                None => {
                    tracing::warn!("Skipping match {} without metadata", m.id);
                    None
                }
            })
            .collect())
    }

    async fn delete_namespace(&self, index: &str, namespace: &str) -> Result<serde_json::Value> {
        let host = self.host(index).await?;
        let response = self
            .request(reqwest::Method::POST, &format!("{}/vectors/delete", host))
            .json(&DeleteRequest {
                delete_all: true,
                namespace,
            })
            .send()
            .await
            .context("Failed to send delete request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        // 서버리스 인덱스는 없는 네임스페이스에 404를 반환
        if status.as_u16() == 404 {
            tracing::debug!("Namespace {} not found, nothing to delete", namespace);
            return Ok(serde_json::json!({}));
        }

        if !status.is_success() {
            anyhow::bail!("Pinecone delete failed ({}): {}", status, body);
        }

        if body.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }

        // 본문은 그대로 반환 (성공 판정은 호출자가 `{}` 여부로)
        Ok(serde_json::from_str(&body)
            .unwrap_or_else(|_| serde_json::Value::String(body.clone())))
    }

    async fn list_indexes(&self) -> Result<Vec<IndexInfo>> {
        let response = self
            .request(reqwest::Method::GET, &format!("{}/indexes", self.control_url))
            .send()
            .await
            .context("Failed to list indexes")?;

        let parsed: IndexList = parse_json(response, "list indexes").await?;
        Ok(parsed
            .indexes
            .into_iter()
            .map(|i| IndexInfo {
                name: i.name,
                dimension: i.dimension,
            })
            .collect())
    }

    async fn create_index(&self, name: &str, dimension: usize) -> Result<()> {
        let body = serde_json::json!({
            "name": name,
            "dimension": dimension,
            "metric": "cosine",
            "spec": {
                "serverless": {
                    "cloud": SERVERLESS_CLOUD,
                    "region": SERVERLESS_REGION
                }
            }
        });

        let response = self
            .request(reqwest::Method::POST, &format!("{}/indexes", self.control_url))
            .json(&body)
            .send()
            .await
            .context("Failed to send create index request")?;

        let _: serde_json::Value = parse_json(response, "create index").await?;
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!("{}/indexes/{}", self.control_url, name),
            )
            .send()
            .await
            .context("Failed to send delete index request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Pinecone delete index failed ({}): {}", status, body);
        }

        self.hosts.lock().await.remove(name);
        Ok(())
    }

    fn name(&self) -> &str {
        "pinecone"
    }
}

// ============================================================================
// Tests
// ============================================================================
