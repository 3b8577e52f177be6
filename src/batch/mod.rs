//! Batch 모듈 - 업로드 파일 묶음을 하나의 네임스페이스 배치로 변환
//!
//! - 노트북(.ipynb)은 그대로, 아카이브(.zip)는 안의 노트북을 하나씩 꺼내 청킹
//! - 배치마다 네임스페이스 ID를 한 번 생성 (`jupyter_rag:<yyMMdd_HHmm>:<index>`)
//! - 파일 하나라도 검증에 실패하면 배치 전체를 중단 (부분 성공 없음)

pub mod collector;

use std::io::{Cursor, Read, Write};
use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};

use crate::error::{RagError, RagResult};
use crate::notebook::{Chunk, ChunkSettings, NotebookChunker, NOTEBOOK_EXTENSION};

/// 네임스페이스 ID 접두사
pub const NAMESPACE_PREFIX: &str = "jupyter_rag";

/// 네임스페이스 ID 타임스탬프 형식 (분 단위)
const NAMESPACE_TIME_FORMAT: &str = "%y%m%d_%H%M";

/// 아카이브 엔트리 하나의 최대 해제 크기 (zip-bomb 방지)
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// macOS가 zip에 넣는 리소스 포크 디렉토리
const MACOS_METADATA_DIR: &str = "__MACOSX/";

// ============================================================================
// Types
// ============================================================================

/// 업로드된 파일 (이름 + 원본 바이트)
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// 지원하는 업로드 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// 단일 Jupyter 노트북
    Notebook,
    /// 노트북을 담은 zip 아카이브
    Archive,
}

impl UploadKind {
    /// 확장자로 업로드 타입 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            NOTEBOOK_EXTENSION => Some(UploadKind::Notebook),
            "zip" => Some(UploadKind::Archive),
            _ => None,
        }
    }

    /// 파일 이름의 마지막 `.` 뒤를 확장자로 사용 (점이 없으면 이름 전체)
    pub fn from_file_name(name: &str) -> Option<Self> {
        name.rsplit('.').next().and_then(Self::from_extension)
    }
}

/// 임베딩/삽입 준비가 끝난 배치
#[derive(Debug, Clone)]
pub struct Batch {
    /// 배치 전체가 공유하는 네임스페이스 ID
    pub namespace_id: String,
    /// 모든 파일의 청크 (파일 순서 → 셀 순서)
    pub chunks: Vec<Chunk>,
    /// 처리된 노트북 이름 (아카이브는 엔트리 이름)
    pub sources: Vec<String>,
}

// ============================================================================
// Namespace ID
// ============================================================================

/// 네임스페이스 ID 생성
///
/// 같은 인덱스에서 분 단위로 유일합니다.
pub fn namespace_id(index_name: &str, now: NaiveDateTime) -> String {
    format!(
        "{}:{}:{}",
        NAMESPACE_PREFIX,
        now.format(NAMESPACE_TIME_FORMAT),
        index_name
    )
}

// ============================================================================
// BatchBuilder
// ============================================================================

/// 배치 빌더
pub struct BatchBuilder {
    chunker: NotebookChunker,
    /// 임시 파일 위치 (None이면 시스템 임시 디렉토리)
    temp_dir: Option<PathBuf>,
}

impl BatchBuilder {
    /// 청킹 설정으로 생성
    pub fn new(settings: ChunkSettings) -> RagResult<Self> {
        Ok(Self {
            chunker: NotebookChunker::new(settings)?,
            temp_dir: None,
        })
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self {
            chunker: NotebookChunker::with_defaults(),
            temp_dir: None,
        }
    }

    /// 임시 파일 디렉토리 지정
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// 현재 시각으로 배치 생성
    pub fn build_batch(&self, files: &[UploadedFile], index_name: &str) -> RagResult<Batch> {
        self.build_batch_at(files, index_name, Local::now().naive_local())
    }

    /// 지정 시각으로 배치 생성
    pub fn build_batch_at(
        &self,
        files: &[UploadedFile],
        index_name: &str,
        now: NaiveDateTime,
    ) -> RagResult<Batch> {
        let namespace_id = namespace_id(index_name, now);

        // 1. 전체 검증 (하나라도 실패하면 아무것도 처리하지 않음)
        let kinds = files
            .iter()
            .map(validate_upload)
            .collect::<RagResult<Vec<_>>>()?;

        // 2. 파일별 청킹
        let mut chunks = Vec::new();
        let mut sources = Vec::new();

        for (file, kind) in files.iter().zip(kinds) {
            match kind {
                UploadKind::Archive => {
                    self.process_archive(file, &mut chunks, &mut sources)?;
                }
                UploadKind::Notebook => {
                    let file_chunks = self.chunk_via_temp_file(&file.bytes, &file.name)?;
                    chunks.extend(file_chunks);
                    sources.push(file.name.clone());
                }
            }
        }

        tracing::info!(
            "Built batch {} ({} notebooks, {} chunks)",
            namespace_id,
            sources.len(),
            chunks.len()
        );

        Ok(Batch {
            namespace_id,
            chunks,
            sources,
        })
    }

    /// zip 아카이브 안의 노트북을 하나씩 처리
    fn process_archive(
        &self,
        file: &UploadedFile,
        chunks: &mut Vec<Chunk>,
        sources: &mut Vec<String>,
    ) -> RagResult<()> {
        let mut archive = zip::ZipArchive::new(Cursor::new(file.bytes.as_slice()))
            .map_err(|e| RagError::load(format!("cannot open archive {}", file.name), e))?;

        let suffix = format!(".{}", NOTEBOOK_EXTENSION);

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| RagError::load(format!("cannot read archive {}", file.name), e))?;

            let entry_name = entry.name().to_string();
            if entry.is_dir()
                || !entry_name.ends_with(&suffix)
                || entry_name.starts_with(MACOS_METADATA_DIR)
            {
                tracing::debug!("Skipping archive entry: {}", entry_name);
                continue;
            }

            let mut bytes = Vec::new();
            (&mut entry)
                .take(MAX_ENTRY_BYTES)
                .read_to_end(&mut bytes)
                .map_err(|e| RagError::load(format!("cannot extract {}", entry_name), e))?;
            if bytes.len() as u64 >= MAX_ENTRY_BYTES {
                return Err(RagError::validation(format!(
                    "Archive entry {} exceeds size limit ({} bytes)",
                    entry_name, MAX_ENTRY_BYTES
                )));
            }

            let entry_chunks = self.chunk_via_temp_file(&bytes, &entry_name)?;
            chunks.extend(entry_chunks);
            sources.push(entry_name);
        }

        Ok(())
    }

    /// 임시 파일에 노트북을 쓰고 청킹 (임시 파일은 성공/실패와 무관하게 삭제)
    fn chunk_via_temp_file(&self, bytes: &[u8], source_name: &str) -> RagResult<Vec<Chunk>> {
        let suffix = format!(".{}", NOTEBOOK_EXTENSION);
        let mut builder = tempfile::Builder::new();
        builder.prefix("notebook-rag-").suffix(&suffix);

        let mut tmp = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| RagError::processing("cannot create temporary file", e))?;

        let result = tmp
            .write_all(bytes)
            .and_then(|_| tmp.flush())
            .map_err(|e| RagError::processing("cannot write temporary file", e))
            .and_then(|_| self.chunker.chunk_file(tmp.path(), source_name));

        if let Err(e) = tmp.close() {
            tracing::warn!("Failed to remove temporary file for {}: {}", source_name, e);
        }

        result
    }
}

/// 업로드 파일 검증 (빈 파일, 지원하지 않는 확장자)
fn validate_upload(file: &UploadedFile) -> RagResult<UploadKind> {
    if file.bytes.is_empty() {
        return Err(RagError::validation(format!(
            "Empty file uploaded: {}",
            file.name
        )));
    }

    UploadKind::from_file_name(&file.name).ok_or_else(|| {
        RagError::validation(format!(
            "Unsupported file type: {}. Only Jupyter notebook files (.ipynb) or ZIP files containing notebooks are accepted",
            file.name
        ))
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn notebook_bytes(sources: &[(&str, &str)]) -> Vec<u8> {
        let cells: Vec<serde_json::Value> = sources
            .iter()
            .map(|(cell_type, source)| {
                serde_json::json!({"cell_type": cell_type, "source": source, "outputs": []})
            })
            .collect();
        serde_json::to_vec(&serde_json::json!({"cells": cells, "nbformat": 4})).unwrap()
    }

    fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn fixed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(14, 30, 59)
            .unwrap()
    }

    #[test]
    fn test_namespace_id_format() {
        assert_eq!(
            namespace_id("jupyter-notebook-rag", fixed_time()),
            "jupyter_rag:240115_1430:jupyter-notebook-rag"
        );
    }

    #[test]
    fn test_upload_kind() {
        assert_eq!(UploadKind::from_file_name("a.ipynb"), Some(UploadKind::Notebook));
        assert_eq!(UploadKind::from_file_name("A.IPYNB"), Some(UploadKind::Notebook));
        assert_eq!(UploadKind::from_file_name("bundle.zip"), Some(UploadKind::Archive));
        assert_eq!(UploadKind::from_file_name("notes.txt"), None);
        assert_eq!(UploadKind::from_file_name("ipynb"), Some(UploadKind::Notebook));
    }

    #[test]
    fn test_single_notebook_batch() {
        let builder = BatchBuilder::with_defaults();
        let files = vec![UploadedFile::new(
            "intro.ipynb",
            notebook_bytes(&[("markdown", "# Intro"), ("code", "x = 1")]),
        )];

        let batch = builder
            .build_batch_at(&files, "jupyter-notebook-rag", fixed_time())
            .unwrap();

        assert_eq!(batch.namespace_id, "jupyter_rag:240115_1430:jupyter-notebook-rag");
        assert_eq!(batch.chunks.len(), 2);
        assert!(batch.chunks.iter().all(|c| c.metadata.source == "intro.ipynb"));
        assert_eq!(batch.sources, vec!["intro.ipynb".to_string()]);
    }

    #[test]
    fn test_archive_entries_use_entry_names() {
        let archive = zip_bytes(&[
            ("lessons/one.ipynb", notebook_bytes(&[("code", "a = 1")])),
            ("README.md", b"# not a notebook".to_vec()),
            ("lessons/two.ipynb", notebook_bytes(&[("markdown", "two")])),
        ]);
        let builder = BatchBuilder::with_defaults();
        let batch = builder
            .build_batch_at(&[UploadedFile::new("bundle.zip", archive)], "idx", fixed_time())
            .unwrap();

        assert_eq!(batch.sources, vec!["lessons/one.ipynb", "lessons/two.ipynb"]);
        assert_eq!(batch.chunks.len(), 2);
        assert_eq!(batch.chunks[0].metadata.source, "lessons/one.ipynb");
        assert_eq!(batch.chunks[1].metadata.source, "lessons/two.ipynb");
    }

    #[test]
    fn test_unsupported_file_aborts_batch() {
        let builder = BatchBuilder::with_defaults();
        let files = vec![
            UploadedFile::new("a.ipynb", notebook_bytes(&[("code", "a = 1")])),
            UploadedFile::new("b.txt", b"plain text".to_vec()),
            UploadedFile::new("c.ipynb", notebook_bytes(&[("code", "c = 1")])),
        ];

        let err = builder.build_batch_at(&files, "idx", fixed_time()).unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
        assert!(err.to_string().contains("b.txt"));
    }

    #[test]
    fn test_empty_file_rejected() {
        let builder = BatchBuilder::with_defaults();
        let files = vec![UploadedFile::new("empty.ipynb", Vec::new())];

        let err = builder.build_batch_at(&files, "idx", fixed_time()).unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
        assert!(err.to_string().contains("Empty file uploaded: empty.ipynb"));
    }

    #[test]
    fn test_corrupt_archive_is_load_error() {
        let builder = BatchBuilder::with_defaults();
        let files = vec![UploadedFile::new("bad.zip", b"PK not really".to_vec())];

        let err = builder.build_batch_at(&files, "idx", fixed_time()).unwrap_err();
        assert!(matches!(err, RagError::Load { .. }));
    }

    #[test]
    fn test_malformed_notebook_in_batch() {
        let builder = BatchBuilder::with_defaults();
        let files = vec![UploadedFile::new("bad.ipynb", b"{ nope".to_vec())];

        let err = builder.build_batch_at(&files, "idx", fixed_time()).unwrap_err();
        assert!(matches!(err, RagError::Load { .. }));
    }

    #[test]
    fn test_temp_files_removed() {
        let dir = tempfile::TempDir::new().unwrap();
        let builder = BatchBuilder::with_defaults().with_temp_dir(dir.path());

        let ok = builder.build_batch_at(
            &[UploadedFile::new("ok.ipynb", notebook_bytes(&[("code", "a = 1")]))],
            "idx",
            fixed_time(),
        );
        assert!(ok.is_ok());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let archive = zip_bytes(&[
            ("ok.ipynb", notebook_bytes(&[("code", "a = 1")])),
            ("broken.ipynb", b"{ nope".to_vec()),
        ]);
        let failed = builder.build_batch_at(
            &[UploadedFile::new("mixed.zip", archive)],
            "idx",
            fixed_time(),
        );
        assert!(failed.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
