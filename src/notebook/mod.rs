//! Notebook 모듈 - Jupyter 노트북을 검색 가능한 청크로 변환
//!
//! - Loader: .ipynb JSON 파싱 → 셀 단위 raw 레코드 (출력은 길이 제한)
//! - Chunker: raw 레코드 → 셀 타입/출처 메타데이터가 붙은 청크

mod chunker;
mod loader;

use serde::{Deserialize, Serialize};

pub use chunker::{
    chunk_notebook_file, ChunkSettings, LineChunker, NotebookChunker, DEFAULT_MAX_CHUNK_LENGTH,
};
pub use loader::{load_notebook, parse_notebook, LoaderOptions, RawCell, NOTEBOOK_EXTENSION};

// ============================================================================
// Types
// ============================================================================

/// 청크 메타데이터 (벡터와 함께 저장됨)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// 청크를 추출한 원본 파일 이름
    pub source: String,
    /// 원본 셀 타입 (code, markdown, raw)
    pub cell_type: String,
    /// 셀 분할 순서 (0-based, 분할되지 않았으면 0)
    pub chunk_index: usize,
}

/// 검색 단위 청크
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 청크 텍스트 (비어있거나 공백만으로 이루어지지 않음)
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// 문자 수 기준 길이
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}
