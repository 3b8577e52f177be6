//! notebook-rag - Jupyter 노트북 검색 증강 질의응답
//!
//! 노트북을 셀 단위 청크로 나누어 업로드마다 새 네임스페이스에 색인하고,
//! 네임스페이스 범위로 검색한 문맥을 언어 모델에 전달해 질문에 답합니다.
//!
//! 파이프라인: notebook(청킹) → batch(네임스페이스 ID) → store(삽입/검색/삭제) → rag(답변)

pub mod batch;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod notebook;
pub mod rag;
pub mod service;
pub mod session;
pub mod store;

// Re-exports
pub use batch::{namespace_id, Batch, BatchBuilder, UploadKind, UploadedFile};
pub use config::{Backend, RagConfig};
pub use embedding::{EmbeddingProvider, OpenAiEmbedding};
pub use error::{RagError, RagResult};
pub use llm::{LanguageModel, OpenAiChat};
pub use notebook::{chunk_notebook_file, Chunk, ChunkMetadata, ChunkSettings, NotebookChunker};
pub use rag::{AnswerSettings, CancelScope, PromptTemplate, RetrievalAnswerer};
pub use service::{IngestReport, NotebookRag};
pub use session::SessionState;
pub use store::{
    DeleteOutcome, InMemoryIndex, LanceVectorIndex, NamespaceRetriever, NamespaceStore,
    PineconeIndex, Retriever, VectorIndexService,
};
