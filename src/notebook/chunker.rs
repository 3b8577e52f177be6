//! Notebook Chunking Module
//!
//! 노트북 셀을 검색 가능한 청크로 분할합니다.
//! 셀 경계를 유지하고, 긴 셀만 줄 단위로 나눕니다 (줄 중간은 절대 자르지 않음).

use std::path::Path;

use regex::Regex;

use super::loader::{load_notebook, LoaderOptions, RawCell};
use super::{Chunk, ChunkMetadata};
use crate::error::{RagError, RagResult};

/// 기본 최대 청크 길이 (문자 수)
pub const DEFAULT_MAX_CHUNK_LENGTH: usize = 1000;

/// raw 레코드의 첫 번째 따옴표 토큰 = 셀 타입
const CELL_TYPE_PATTERN: &str = r"'(.*?)'";

// ============================================================================
// Chunk Settings
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkSettings {
    /// 최대 청크 크기 (문자 수)
    pub max_chunk_length: usize,
    /// 노트북 로더 설정
    pub loader: LoaderOptions,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            max_chunk_length: DEFAULT_MAX_CHUNK_LENGTH,
            loader: LoaderOptions::default(),
        }
    }
}

impl ChunkSettings {
    /// 최대 길이만 지정
    pub fn with_max_length(max_chunk_length: usize) -> Self {
        Self {
            max_chunk_length,
            ..Default::default()
        }
    }

    fn validate(&self) -> RagResult<()> {
        if self.max_chunk_length == 0 {
            return Err(RagError::validation("max_chunk_length must be > 0"));
        }
        Ok(())
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 분할 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 조각으로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// LineChunker
// ============================================================================

/// 줄 단위 greedy 청커
///
/// 줄을 버퍼에 누적하다가 다음 줄을 더하면 최대 길이를 넘을 때 버퍼를 내보냅니다.
/// 최대 길이보다 긴 줄은 자르지 않고 그 줄 하나로 청크를 만듭니다.
pub struct LineChunker {
    max_chunk_length: usize,
}

impl LineChunker {
    pub fn new(max_chunk_length: usize) -> Self {
        Self { max_chunk_length }
    }

    /// 버퍼를 조각으로 내보내기 (끝 공백 제거, 공백뿐이면 버림)
    fn flush(pieces: &mut Vec<String>, buffer: &str) {
        let piece = buffer.trim_end();
        if !piece.trim().is_empty() {
            pieces.push(piece.to_string());
        }
    }
}

impl Chunker for LineChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut buffer = String::new();
        let mut buffer_len = 0usize;

        for line in text.split('\n') {
            let line_len = line.chars().count();

            if buffer.is_empty() {
                buffer.push_str(line);
                buffer_len = line_len;
            } else if buffer_len + 1 + line_len > self.max_chunk_length {
                Self::flush(&mut pieces, &buffer);
                buffer.clear();
                buffer.push_str(line);
                buffer_len = line_len;
            } else {
                buffer.push('\n');
                buffer.push_str(line);
                buffer_len += 1 + line_len;
            }
        }

        if !buffer.is_empty() {
            Self::flush(&mut pieces, &buffer);
        }

        pieces
    }

    fn name(&self) -> &'static str {
        "LineChunker"
    }
}

// ============================================================================
// NotebookChunker
// ============================================================================

/// 노트북 청커
///
/// raw 셀 레코드에서 셀 타입과 본문을 꺼내고,
/// 최대 길이를 넘는 셀만 [`LineChunker`]로 분할합니다.
pub struct NotebookChunker {
    settings: ChunkSettings,
    splitter: Box<dyn Chunker>,
}

impl NotebookChunker {
    /// 설정으로 생성
    pub fn new(settings: ChunkSettings) -> RagResult<Self> {
        settings.validate()?;
        let splitter = Box::new(LineChunker::new(settings.max_chunk_length));
        Ok(Self { settings, splitter })
    }

    /// 기본 설정으로 생성 (최대 1000자)
    pub fn with_defaults() -> Self {
        Self {
            settings: ChunkSettings::default(),
            splitter: Box::new(LineChunker::new(DEFAULT_MAX_CHUNK_LENGTH)),
        }
    }

    pub fn settings(&self) -> &ChunkSettings {
        &self.settings
    }

    /// 노트북 파일을 로드하여 청킹
    pub fn chunk_file(&self, path: &Path, source_name: &str) -> RagResult<Vec<Chunk>> {
        let cells = load_notebook(path, &self.settings.loader)?;
        self.chunk_cells(&cells, source_name)
    }

    /// raw 셀 목록을 청크로 변환
    ///
    /// 출력 순서는 셀 순서를 따르며, 같은 입력에 대해 항상 같은 결과를 냅니다.
    pub fn chunk_cells(&self, cells: &[RawCell], source_name: &str) -> RagResult<Vec<Chunk>> {
        let cell_type_re = Regex::new(CELL_TYPE_PATTERN)
            .map_err(|e| RagError::processing("invalid cell type pattern", e))?;
        let max_length = self.settings.max_chunk_length;
        let mut chunks = Vec::new();

        for (position, cell) in cells.iter().enumerate() {
            let (cell_type, content) = split_raw_cell(&cell_type_re, &cell.page_content)
                .ok_or_else(|| {
                    RagError::processing(
                        format!("cannot read cell type of cell {} in {}", position, source_name),
                        anyhow::anyhow!("no quoted cell type in raw cell record"),
                    )
                })?;

            if content.chars().count() > max_length {
                let pieces = self.splitter.chunk(&content);
                tracing::debug!(
                    "Split {} cell {} of {} into {} chunks",
                    cell_type,
                    position,
                    source_name,
                    pieces.len()
                );

                for (chunk_index, piece) in pieces.into_iter().enumerate() {
                    chunks.push(Chunk {
                        content: piece,
                        metadata: ChunkMetadata {
                            source: source_name.to_string(),
                            cell_type: cell_type.clone(),
                            chunk_index,
                        },
                    });
                }
            } else if !content.trim().is_empty() {
                chunks.push(Chunk {
                    content,
                    metadata: ChunkMetadata {
                        source: source_name.to_string(),
                        cell_type,
                        chunk_index: 0,
                    },
                });
            }
        }

        tracing::debug!(
            "Chunked {} cells from {} into {} chunks",
            cells.len(),
            source_name,
            chunks.len()
        );

        Ok(chunks)
    }
}

/// raw 레코드 → (셀 타입, 이스케이프 해제된 본문)
fn split_raw_cell(cell_type_re: &Regex, raw: &str) -> Option<(String, String)> {
    let cell_type = cell_type_re.captures(raw)?.get(1)?.as_str().to_string();
    let content = raw.replace("\\'", "'");
    Some((cell_type, content))
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 노트북 파일 하나를 청킹
pub fn chunk_notebook_file(
    path: &Path,
    source_name: &str,
    settings: &ChunkSettings,
) -> RagResult<Vec<Chunk>> {
    NotebookChunker::new(settings.clone())?.chunk_file(path, source_name)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(cell_type: &str, body: &str) -> RawCell {
        RawCell {
            page_content: format!("'{}' cell: '{}'", cell_type, body),
        }
    }

    fn chunker(max: usize) -> NotebookChunker {
        NotebookChunker::new(ChunkSettings::with_max_length(max)).unwrap()
    }

    #[test]
    fn test_short_cell_single_chunk() {
        let cells = vec![raw("code", "import numpy as np")];
        let chunks = chunker(1000).chunk_cells(&cells, "a.ipynb").unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "'code' cell: 'import numpy as np'");
        assert_eq!(chunks[0].metadata.cell_type, "code");
        assert_eq!(chunks[0].metadata.source, "a.ipynb");
        assert_eq!(chunks[0].metadata.chunk_index, 0);
    }

    #[test]
    fn test_escaped_quotes_unescaped() {
        let cells = vec![RawCell {
            page_content: "'code' cell: 'print(\\'hi\\')'".to_string(),
        }];
        let chunks = chunker(1000).chunk_cells(&cells, "a.ipynb").unwrap();
        assert_eq!(chunks[0].content, "'code' cell: 'print('hi')'");
    }

    #[test]
    fn test_long_cell_split_bounded() {
        let body: Vec<String> = (0..40).map(|i| format!("x = {} # line {}", i, i)).collect();
        let cells = vec![raw("code", &body.join("\n"))];
        let chunks = chunker(100).chunk_cells(&cells, "a.ipynb").unwrap();

        assert!(chunks.len() >= 2);
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.char_len() <= 100, "chunk {} too long", i);
            assert_eq!(chunk.metadata.chunk_index, i);
            assert_eq!(chunk.metadata.cell_type, "code");
        }
    }

    #[test]
    fn test_long_line_kept_whole() {
        let long_line = "y".repeat(150);
        let body = format!("short\n{}\ntail", long_line);
        let cells = vec![raw("markdown", &body)];
        let chunks = chunker(50).chunk_cells(&cells, "a.ipynb").unwrap();

        let overlong: Vec<_> = chunks.iter().filter(|c| c.char_len() > 50).collect();
        assert_eq!(overlong.len(), 1);
        assert_eq!(overlong[0].content, long_line);
    }

    #[test]
    fn test_round_trip_lines() {
        let body: Vec<String> = (0..30).map(|i| format!("value_{} = compute({})", i, i)).collect();
        let cell = raw("code", &body.join("\n"));
        let chunks = chunker(120).chunk_cells(&[cell.clone()], "a.ipynb").unwrap();

        let rebuilt: Vec<&str> = chunks.iter().flat_map(|c| c.content.split('\n')).collect();
        let original: Vec<&str> = cell.page_content.split('\n').collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_empty_cells_dropped() {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "cells": [
                {"cell_type": "markdown", "source": ""},
                {"cell_type": "code", "source": ["   \n", "  "], "outputs": []},
                {"cell_type": "code", "source": "x = 1", "outputs": []}
            ]
        }))
        .unwrap();
        let cells = crate::notebook::parse_notebook(&bytes, &LoaderOptions::default()).unwrap();
        let chunks = chunker(1000).chunk_cells(&cells, "a.ipynb").unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "'code' cell: 'x = 1'");
    }

    #[test]
    fn test_whitespace_pieces_discarded() {
        let splitter = LineChunker::new(10);
        let pieces = splitter.chunk("abcdefgh\n   \n      \nxyz");
        assert!(pieces.iter().all(|p| !p.trim().is_empty()));
        assert_eq!(pieces.first().map(String::as_str), Some("abcdefgh"));
        assert_eq!(pieces.last().map(String::as_str), Some("xyz"));
    }

    #[test]
    fn test_deterministic() {
        let body: Vec<String> = (0..50).map(|i| format!("line {}", i)).collect();
        let cells = vec![raw("code", &body.join("\n")), raw("markdown", "# Notes")];
        let first = chunker(64).chunk_cells(&cells, "a.ipynb").unwrap();
        let second = chunker(64).chunk_cells(&cells, "a.ipynb").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_cell_type_is_processing_error() {
        let cells = vec![RawCell {
            page_content: "no quotes here".to_string(),
        }];
        let err = chunker(1000).chunk_cells(&cells, "a.ipynb").unwrap_err();
        assert!(matches!(err, RagError::Processing { .. }));
    }

    #[test]
    fn test_zero_max_length_rejected() {
        let result = NotebookChunker::new(ChunkSettings::with_max_length(0));
        assert!(matches!(result, Err(RagError::Validation(_))));
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        // 한글 30자 = 90 bytes
        let body = "가".repeat(30);
        let cells = vec![raw("markdown", &body)];
        let chunks = chunker(50).chunk_cells(&cells, "a.ipynb").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.chunk_index, 0);
    }

    #[test]
    fn test_chunk_file_malformed_is_load_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.ipynb");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = chunk_notebook_file(&path, "broken.ipynb", &ChunkSettings::default()).unwrap_err();
        assert!(matches!(err, RagError::Load { .. }));
    }
}
