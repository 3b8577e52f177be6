//! Store 모듈 - 네임스페이스 단위 벡터 저장소
//!
//! - VectorIndexService: 외부 벡터 인덱스 (네임스페이스별 삽입 / 검색 / 전체 삭제)
//! - NamespaceStore: 청크 임베딩 + 삽입, 네임스페이스 범위 검색기, 네임스페이스 삭제
//!
//! 구현체:
//! - Pinecone: 원격 서버리스 인덱스 (REST)
//! - LanceDB: 로컬 디렉토리 (네임스페이스 = 컬럼 필터)
//! - InMemory: 테스트 / 드라이런

mod lance;
mod memory;
mod pinecone;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tokio_util::sync::CancellationToken;

use crate::embedding::{retry_budget, EmbeddingProvider};
use crate::error::{RagError, RagResult};
use crate::notebook::{Chunk, ChunkMetadata};

pub use lance::LanceVectorIndex;
pub use memory::InMemoryIndex;
pub use pinecone::{PineconeIndex, PINECONE_CONTROL_URL};

/// 한 번에 임베딩/쓰기할 청크 수
pub const UPSERT_BATCH_SIZE: usize = 100;

/// 기본 네트워크 타임아웃
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// 인덱스 기본 네임스페이스 (Pinecone의 `""`)
pub const DEFAULT_NAMESPACE: &str = "";

// ============================================================================
// Types
// ============================================================================

/// 벡터와 함께 저장되는 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// 청크 본문
    pub text: String,
    pub source: String,
    pub cell_type: String,
    /// Pinecone은 숫자 메타데이터를 float64로 돌려줌 (`0.0`)
    #[serde(deserialize_with = "deserialize_chunk_index")]
    pub chunk_index: usize,
}

fn deserialize_chunk_index<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Int(u64),
        Float(f64),
    }

    match Number::deserialize(deserializer)? {
        Number::Int(n) => usize::try_from(n).map_err(D::Error::custom),
        Number::Float(f) if f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 => Ok(f as usize),
        Number::Float(f) => Err(D::Error::custom(format!("invalid chunk_index: {}", f))),
    }
}

impl RecordMetadata {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            text: chunk.content.clone(),
            source: chunk.metadata.source.clone(),
            cell_type: chunk.metadata.cell_type.clone(),
            chunk_index: chunk.metadata.chunk_index,
        }
    }

    pub fn into_chunk(self) -> Chunk {
        Chunk {
            content: self.text,
            metadata: ChunkMetadata {
                source: self.source,
                cell_type: self.cell_type,
                chunk_index: self.chunk_index,
            },
        }
    }
}

/// 벡터 레코드 (저장용)
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// 검색 결과 레코드
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub id: String,
    /// 유사도 스코어 (높을수록 유사)
    pub score: f32,
    pub metadata: RecordMetadata,
}

/// 검색된 청크
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// 인덱스 정보
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub dimension: Option<usize>,
}

/// 네임스페이스 삭제 결과
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// 빈 응답 (`{}`) - 삭제 완료
    Deleted { namespace: String, index: String },
    /// 그 외 모든 응답 (진단용으로 원본 보존)
    Unexpected(serde_json::Value),
}

impl DeleteOutcome {
    /// 삭제 응답 분류: 정확히 `{}`일 때만 성공
    pub fn from_response(index: &str, namespace: &str, response: serde_json::Value) -> Self {
        match &response {
            serde_json::Value::Object(map) if map.is_empty() => DeleteOutcome::Deleted {
                namespace: namespace.to_string(),
                index: index.to_string(),
            },
            _ => DeleteOutcome::Unexpected(response),
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted { .. })
    }

    /// 사용자 메시지
    pub fn message(&self) -> String {
        match self {
            DeleteOutcome::Deleted { namespace, index } => format!(
                "Namespace '{}' deleted successfully from index '{}'.",
                namespace, index
            ),
            DeleteOutcome::Unexpected(response) => format!("Unexpected response: {}", response),
        }
    }
}

// ============================================================================
// VectorIndexService Trait
// ============================================================================

/// 벡터 인덱스 서비스 트레이트 (async)
///
/// 인덱스는 여러 네임스페이스가 공유하는 최상위 컬렉션입니다.
#[async_trait]
pub trait VectorIndexService: Send + Sync {
    /// 네임스페이스에 레코드 쓰기 (네임스페이스가 없으면 암묵적으로 생성)
    async fn upsert(&self, index: &str, namespace: &str, records: &[VectorRecord]) -> Result<usize>;

    /// 네임스페이스 범위 유사도 검색 (상위 k개)
    async fn query(
        &self,
        index: &str,
        namespace: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>>;

    /// 네임스페이스의 모든 벡터 삭제 - 원본 응답 반환 (`{}` = 성공)
    async fn delete_namespace(&self, index: &str, namespace: &str) -> Result<serde_json::Value>;

    /// 인덱스 목록
    async fn list_indexes(&self) -> Result<Vec<IndexInfo>>;

    /// 인덱스 생성
    async fn create_index(&self, name: &str, dimension: usize) -> Result<()>;

    /// 인덱스 삭제
    async fn delete_index(&self, name: &str) -> Result<()>;

    /// 구현체 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Retriever
// ============================================================================

/// 네임스페이스 하나로 범위가 고정된 검색기
#[async_trait]
pub trait Retriever: Send + Sync {
    /// 질의와 가장 유사한 청크 k개
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>>;
}

/// [`NamespaceStore::retrieve`]가 반환하는 검색기
pub struct NamespaceRetriever {
    service: Arc<dyn VectorIndexService>,
    embedder: Arc<dyn EmbeddingProvider>,
    index_name: String,
    namespace: String,
    io_timeout: Duration,
    embed_timeout: Duration,
}

impl NamespaceRetriever {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }
}

#[async_trait]
impl Retriever for NamespaceRetriever {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let vector = bounded(self.embed_timeout, self.embedder.embed(query)).await?;
        let records = bounded(
            self.io_timeout,
            self.service
                .query(&self.index_name, &self.namespace, &vector, k),
        )
        .await?;

        tracing::debug!(
            "Similarity search in {} returned {} records",
            self.namespace,
            records.len()
        );

        Ok(records
            .into_iter()
            .map(|r| RetrievedChunk {
                chunk: r.metadata.into_chunk(),
                score: r.score,
            })
            .collect())
    }
}

// ============================================================================
// NamespaceStore
// ============================================================================

/// 네임스페이스 저장소
///
/// 네임스페이스 생명주기(암묵적 생성, 검색, 명시적 삭제)를 전담합니다.
///
/// 임베딩 호출은 클라이언트 내부 재시도가 끝날 수 있도록
/// `io_timeout`이 아닌 [`retry_budget`]으로 묶습니다.
#[derive(Clone)]
pub struct NamespaceStore {
    service: Arc<dyn VectorIndexService>,
    io_timeout: Duration,
    embed_timeout: Duration,
}

impl NamespaceStore {
    pub fn new(service: Arc<dyn VectorIndexService>) -> Self {
        Self::with_timeout(service, DEFAULT_IO_TIMEOUT)
    }

    pub fn with_timeout(service: Arc<dyn VectorIndexService>, io_timeout: Duration) -> Self {
        Self {
            service,
            io_timeout,
            embed_timeout: retry_budget(io_timeout),
        }
    }

    pub fn service(&self) -> &Arc<dyn VectorIndexService> {
        &self.service
    }

    /// 청크 임베딩 후 네임스페이스에 쓰기
    ///
    /// 실패하거나 취소되어도 이미 쓴 청크는 롤백하지 않습니다.
    /// 호출자는 네임스페이스가 일부만 채워졌을 수 있다고 가정해야 합니다.
    pub async fn insert(
        &self,
        chunks: &[Chunk],
        embedder: &dyn EmbeddingProvider,
        index_name: &str,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> RagResult<usize> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("Insert into {} cancelled", namespace);
                Err(RagError::insert(namespace, anyhow::anyhow!("insert cancelled")))
            }
            result = self.insert_batches(chunks, embedder, index_name, namespace) => result,
        }
    }

    /// 기본 네임스페이스에 쓰기
    pub async fn insert_default(
        &self,
        chunks: &[Chunk],
        embedder: &dyn EmbeddingProvider,
        index_name: &str,
        cancel: &CancellationToken,
    ) -> RagResult<usize> {
        self.insert(chunks, embedder, index_name, DEFAULT_NAMESPACE, cancel)
            .await
    }

    async fn insert_batches(
        &self,
        chunks: &[Chunk],
        embedder: &dyn EmbeddingProvider,
        index_name: &str,
        namespace: &str,
    ) -> RagResult<usize> {
        let mut written = 0;

        for batch in chunks.chunks(UPSERT_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();

            let embeddings = bounded(self.embed_timeout, embedder.embed_batch(&texts))
                .await
                .map_err(|e| RagError::insert(namespace, e.context("embedding failed")))?;

            if embeddings.len() != batch.len() {
                return Err(RagError::insert(
                    namespace,
                    anyhow::anyhow!(
                        "embedding count mismatch: {} chunks, {} vectors",
                        batch.len(),
                        embeddings.len()
                    ),
                ));
            }

            let records: Vec<VectorRecord> = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, values)| VectorRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    values,
                    metadata: RecordMetadata::from_chunk(chunk),
                })
                .collect();

            written += bounded(
                self.io_timeout,
                self.service.upsert(index_name, namespace, &records),
            )
            .await
            .map_err(|e| RagError::insert(namespace, e.context("vector write failed")))?;

            tracing::debug!("Wrote {}/{} chunks to {}", written, chunks.len(), namespace);
        }

        tracing::info!(
            "Inserted {} chunks into namespace {} (index {})",
            written,
            namespace,
            index_name
        );

        Ok(written)
    }

    /// 네임스페이스 범위 검색기 (내용 존재 여부는 검증하지 않음)
    pub fn retrieve(
        &self,
        embedder: Arc<dyn EmbeddingProvider>,
        index_name: &str,
        namespace: &str,
    ) -> NamespaceRetriever {
        NamespaceRetriever {
            service: Arc::clone(&self.service),
            embedder,
            index_name: index_name.to_string(),
            namespace: namespace.to_string(),
            io_timeout: self.io_timeout,
            embed_timeout: self.embed_timeout,
        }
    }

    /// 기본 네임스페이스 검색기
    pub fn retrieve_default(
        &self,
        embedder: Arc<dyn EmbeddingProvider>,
        index_name: &str,
    ) -> NamespaceRetriever {
        self.retrieve(embedder, index_name, DEFAULT_NAMESPACE)
    }

    /// 네임스페이스 삭제 (되돌릴 수 없음)
    pub async fn delete(&self, index_name: &str, namespace: &str) -> RagResult<DeleteOutcome> {
        let response = bounded(
            self.io_timeout,
            self.service.delete_namespace(index_name, namespace),
        )
        .await
        .map_err(|e| RagError::delete(namespace, e))?;

        let outcome = DeleteOutcome::from_response(index_name, namespace, response);
        match &outcome {
            DeleteOutcome::Deleted { .. } => {
                tracing::info!("Deleted namespace {} from {}", namespace, index_name)
            }
            DeleteOutcome::Unexpected(response) => tracing::warn!(
                "Unexpected delete response for {}: {}",
                namespace,
                response
            ),
        }

        Ok(outcome)
    }

    /// 인덱스 존재 여부
    pub async fn check_index(&self, index_name: &str) -> RagResult<bool> {
        let indexes = bounded(self.io_timeout, self.service.list_indexes())
            .await
            .map_err(|e| RagError::index("cannot list indexes", e))?;
        Ok(indexes.iter().any(|i| i.name == index_name))
    }

    /// 인덱스 생성
    pub async fn create_index(&self, index_name: &str, dimension: usize) -> RagResult<()> {
        bounded(
            self.io_timeout,
            self.service.create_index(index_name, dimension),
        )
        .await
        .map_err(|e| RagError::index(format!("cannot create index {}", index_name), e))?;
        tracing::info!("Created index {} (dimension {})", index_name, dimension);
        Ok(())
    }

    /// 인덱스 삭제 (없으면 false)
    pub async fn delete_index(&self, index_name: &str) -> RagResult<bool> {
        if !self.check_index(index_name).await? {
            return Ok(false);
        }

        bounded(self.io_timeout, self.service.delete_index(index_name))
            .await
            .map_err(|e| RagError::index(format!("cannot delete index {}", index_name), e))?;
        tracing::info!("Deleted index {}", index_name);
        Ok(true)
    }
}

/// 네트워크 연산에 타임아웃 적용
pub(crate) async fn bounded<T, F>(timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| anyhow::anyhow!("operation timed out after {:?}", timeout))?
}

// ============================================================================
// Tests
// ============================================================================
