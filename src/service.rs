//! NotebookRag - 수집 / 질의 / 삭제 / 인덱스 관리 진입점
//!
//! 모든 협력자는 생성 시 주입되며 전역 상태는 없습니다.
//! 어떤 연산도 패닉하지 않고 [`RagError`]를 반환합니다.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::batch::{BatchBuilder, UploadedFile};
use crate::config::{Backend, RagConfig};
use crate::embedding::{EmbeddingOptions, EmbeddingProvider, OpenAiEmbedding};
use crate::error::{RagError, RagResult};
use crate::llm::{ChatOptions, OpenAiChat};
use crate::notebook::ChunkSettings;
use crate::rag::{AnswerSettings, CancelScope, PromptTemplate, RetrievalAnswerer, DEFAULT_TOP_K};
use crate::store::{
    DeleteOutcome, LanceVectorIndex, NamespaceStore, PineconeIndex, VectorIndexService,
};

/// 수집 결과
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub namespace_id: String,
    pub chunk_count: usize,
    pub sources: Vec<String>,
}

pub struct NotebookRag {
    store: NamespaceStore,
    embedder: Arc<dyn EmbeddingProvider>,
    answerer: RetrievalAnswerer,
    batch_builder: BatchBuilder,
    index_name: String,
    top_k: usize,
    template: PromptTemplate,
}

impl NotebookRag {
    pub fn new(
        store: NamespaceStore,
        embedder: Arc<dyn EmbeddingProvider>,
        answerer: RetrievalAnswerer,
        batch_builder: BatchBuilder,
        index_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            answerer,
            batch_builder,
            index_name: index_name.into(),
            top_k: DEFAULT_TOP_K,
            template: PromptTemplate::default(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    /// 설정으로 OpenAI 클라이언트와 벡터 백엔드를 구성
    pub async fn from_config(config: &RagConfig) -> RagResult<Self> {
        let openai_key = config.require_openai_key()?.to_string();

        let embedder = OpenAiEmbedding::new(
            openai_key.clone(),
            EmbeddingOptions {
                model: config.embedding_model.clone(),
                dimension: config.embedding_dimension,
                base_url: config.openai_base_url.clone(),
                timeout: config.io_timeout,
            },
        )
        .map_err(|e| RagError::config(format!("cannot create embedding client: {:#}", e)))?;

        let chat = OpenAiChat::new(
            openai_key,
            ChatOptions {
                model: config.chat_model.clone(),
                temperature: 0.0,
                base_url: config.openai_base_url.clone(),
                timeout: config.llm_timeout,
            },
        )
        .map_err(|e| RagError::config(format!("cannot create chat client: {:#}", e)))?;

        let answerer = RetrievalAnswerer::new(
            Arc::new(chat),
            AnswerSettings {
                filter_concurrency: config.filter_concurrency,
                llm_timeout: config.llm_timeout,
            },
        );

        let batch_builder = BatchBuilder::new(ChunkSettings::with_max_length(
            config.max_chunk_length,
        ))?;

        Ok(Self::new(
            open_store(config).await?,
            Arc::new(embedder),
            answerer,
            batch_builder,
            config.index_name.clone(),
        )
        .with_top_k(config.top_k))
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn store(&self) -> &NamespaceStore {
        &self.store
    }

    pub fn answerer(&self) -> &RetrievalAnswerer {
        &self.answerer
    }

    /// 업로드 배치를 새 네임스페이스에 수집
    ///
    /// 삽입 도중 실패하거나 `cancel`되면 네임스페이스가 일부만 채워진 채 남을 수 있습니다.
    pub async fn ingest(
        &self,
        files: &[UploadedFile],
        cancel: &CancellationToken,
    ) -> RagResult<IngestReport> {
        let batch = self.batch_builder.build_batch(files, &self.index_name)?;

        if batch.chunks.is_empty() {
            tracing::warn!("Batch produced no chunks, namespace {} stays empty", batch.namespace_id);
        }

        let chunk_count = self
            .store
            .insert(
                &batch.chunks,
                self.embedder.as_ref(),
                &self.index_name,
                &batch.namespace_id,
                cancel,
            )
            .await?;

        tracing::info!(
            "Ingested {} chunks from {} notebooks into {}",
            chunk_count,
            batch.sources.len(),
            batch.namespace_id
        );

        Ok(IngestReport {
            namespace_id: batch.namespace_id,
            chunk_count,
            sources: batch.sources,
        })
    }

    /// 네임스페이스 범위 질의
    pub async fn query(
        &self,
        namespace: &str,
        question: &str,
        scope: &CancelScope,
    ) -> RagResult<String> {
        validate_question(question)?;
        let retriever = self
            .store
            .retrieve(Arc::clone(&self.embedder), &self.index_name, namespace);
        self.answerer
            .answer(question, &retriever, self.top_k, &self.template, scope)
            .await
    }

    /// 이전 대화를 포함한 질의
    pub async fn query_with_history(
        &self,
        namespace: &str,
        question: &str,
        history: &str,
        scope: &CancelScope,
    ) -> RagResult<String> {
        validate_question(question)?;
        let retriever = self
            .store
            .retrieve(Arc::clone(&self.embedder), &self.index_name, namespace);
        self.answerer
            .answer_with_history(
                question,
                history,
                &retriever,
                self.top_k,
                &PromptTemplate::conversational(),
                scope,
            )
            .await
    }

    pub async fn delete(&self, namespace: &str) -> RagResult<DeleteOutcome> {
        self.store.delete(&self.index_name, namespace).await
    }

    pub async fn check_index(&self) -> RagResult<bool> {
        self.store.check_index(&self.index_name).await
    }

    /// 임베딩 차원으로 인덱스 생성
    pub async fn create_index(&self) -> RagResult<()> {
        self.store
            .create_index(&self.index_name, self.embedder.dimension())
            .await
    }

    pub async fn delete_index(&self) -> RagResult<bool> {
        self.store.delete_index(&self.index_name).await
    }
}

/// 빈 질문은 영벡터로 임베딩되므로 검색 전에 거부
fn validate_question(question: &str) -> RagResult<()> {
    if question.trim().is_empty() {
        return Err(RagError::validation("Question must not be empty"));
    }
    Ok(())
}

/// 설정된 백엔드로 저장소 열기
pub async fn open_store(config: &RagConfig) -> RagResult<NamespaceStore> {
    let service: Arc<dyn VectorIndexService> = match config.backend {
        Backend::Pinecone => Arc::new(
            PineconeIndex::new(
                config.require_pinecone_key()?.to_string(),
                &config.pinecone_control_url,
                config.io_timeout,
            )
            .map_err(|e| RagError::config(format!("cannot create Pinecone client: {:#}", e)))?,
        ),
        Backend::Lance => Arc::new(
            LanceVectorIndex::open(&config.lance_path())
                .await
                .map_err(|e| RagError::index("cannot open LanceDB directory", e))?,
        ),
    };

    tracing::debug!("Using {} vector backend", service.name());
    Ok(NamespaceStore::with_timeout(service, config.io_timeout))
}
