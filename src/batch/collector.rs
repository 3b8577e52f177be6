//! 업로드 수집 모듈
//!
//! CLI 인자로 받은 파일과 폴더에서 업로드 파일 목록을 만듭니다.
//! 폴더는 .gitignore 패턴을 존중하며 .ipynb / .zip 파일만 수집합니다.
//! 직접 지정한 파일은 확장자와 상관없이 그대로 전달하여 배치 검증에 맡깁니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ignore::WalkBuilder;

use super::{UploadKind, UploadedFile};

// ============================================================================
// Collector Config
// ============================================================================

/// 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

// ============================================================================
// Collection
// ============================================================================

/// 경로 목록에서 업로드 파일 수집 (입력 순서 유지, 폴더 내부는 경로순)
pub fn collect_uploads(paths: &[PathBuf], config: &CollectorConfig) -> Result<Vec<UploadedFile>> {
    let mut uploads = Vec::new();

    for path in paths {
        if path.is_dir() {
            uploads.extend(collect_directory(path, config)?);
        } else if path.is_file() {
            uploads.push(read_upload(path)?);
        } else {
            anyhow::bail!("File not found: {:?}", path);
        }
    }

    Ok(uploads)
}

/// 폴더 재귀 수집
fn collect_directory(path: &Path, config: &CollectorConfig) -> Result<Vec<UploadedFile>> {
    let walker = WalkBuilder::new(path)
        .hidden(!config.include_hidden)
        .git_ignore(config.respect_gitignore)
        .git_global(config.respect_gitignore)
        .git_exclude(config.respect_gitignore)
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();

    let mut uploads = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Failed to read entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }

        let file_path = entry.path();
        let supported = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(UploadKind::from_file_name)
            .is_some();
        if !supported {
            continue;
        }

        if config.max_file_size > 0 {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > config.max_file_size {
                tracing::debug!("Skipping large file: {:?} ({} bytes)", file_path, size);
                continue;
            }
        }

        uploads.push(read_upload(file_path)?);
    }

    tracing::info!("Collected {} uploads from {:?}", uploads.len(), path);
    Ok(uploads)
}

/// 파일 하나를 업로드로 읽기
fn read_upload(path: &Path) -> Result<UploadedFile> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid file name: {:?}", path))?
        .to_string();

    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read file: {:?}", path))?;

    Ok(UploadedFile::new(name, bytes))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_directory_filters_extensions() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.ipynb"), b"{}").unwrap();
        std::fs::write(dir.path().join("b.zip"), b"PK").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("c.ipynb"), b"{}").unwrap();

        let uploads =
            collect_uploads(&[dir.path().to_path_buf()], &CollectorConfig::default()).unwrap();
        let names: Vec<&str> = uploads.iter().map(|u| u.name.as_str()).collect();

        assert_eq!(names, vec!["a.ipynb", "b.zip", "c.ipynb"]);
    }

    #[test]
    fn test_explicit_file_passed_through() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"text").unwrap();

        let uploads = collect_uploads(&[path], &CollectorConfig::default()).unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].name, "notes.txt");
        assert_eq!(uploads[0].bytes, b"text");
    }

    #[test]
    fn test_missing_path() {
        let result = collect_uploads(
            &[PathBuf::from("/definitely/not/here.ipynb")],
            &CollectorConfig::default(),
        );
        assert!(result.is_err());
    }
}
