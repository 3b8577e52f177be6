//! Notebook Loader - .ipynb 파싱
//!
//! nbformat 4 JSON을 읽어 셀마다 하나의 raw 레코드를 만듭니다.
//! raw 레코드는 `'<cell_type>' cell: '<source>'` 형태이며,
//! 코드 셀의 출력은 `max_output_length` 문자로 잘라 뒤에 붙입니다.
//!
//! ref: https://nbformat.readthedocs.io/en/latest/format_description.html

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::error::{RagError, RagResult};

/// 노트북 파일 확장자
pub const NOTEBOOK_EXTENSION: &str = "ipynb";

/// 기본 출력 길이 제한 (문자 수)
const DEFAULT_MAX_OUTPUT_LENGTH: usize = 100;

// ============================================================================
// Loader Options
// ============================================================================

/// 로더 설정
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// 코드 셀 출력 포함 여부
    pub include_outputs: bool,
    /// 출력 최대 길이 (문자 수)
    pub max_output_length: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            include_outputs: true,
            max_output_length: DEFAULT_MAX_OUTPUT_LENGTH,
        }
    }
}

/// 셀 하나의 raw 표현
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCell {
    pub page_content: String,
}

// ============================================================================
// nbformat Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct NotebookFile {
    cells: Vec<NotebookCell>,
}

#[derive(Debug, Deserialize)]
struct NotebookCell {
    cell_type: String,
    #[serde(default)]
    source: MultilineText,
    #[serde(default)]
    outputs: Vec<CellOutput>,
}

/// nbformat의 multiline string (문자열 또는 줄 배열)
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MultilineText {
    Single(String),
    Lines(Vec<String>),
}

impl Default for MultilineText {
    fn default() -> Self {
        MultilineText::Lines(Vec::new())
    }
}

impl MultilineText {
    fn into_string(self) -> String {
        match self {
            MultilineText::Single(s) => s,
            MultilineText::Lines(lines) => lines.concat(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CellOutput {
    #[serde(default)]
    output_type: String,
    #[serde(default)]
    text: Option<MultilineText>,
    #[serde(default)]
    data: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    ename: Option<String>,
    #[serde(default)]
    evalue: Option<String>,
}

impl CellOutput {
    /// 텍스트 출력 추출 (stream / execute_result / display_data)
    fn plain_text(self) -> Option<String> {
        if let Some(text) = self.text {
            return Some(text.into_string());
        }

        let plain = self.data?.remove("text/plain")?;
        serde_json::from_value::<MultilineText>(plain)
            .ok()
            .map(MultilineText::into_string)
    }
}

// ============================================================================
// Loading
// ============================================================================

/// 파일 경로에서 노트북 로드
pub fn load_notebook(path: &Path, options: &LoaderOptions) -> RagResult<Vec<RawCell>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read notebook: {:?}", path))
        .map_err(|e| RagError::load(format!("cannot read {}", path.display()), e))?;

    parse_notebook(&bytes, options)
}

/// 바이트에서 노트북 파싱
pub fn parse_notebook(bytes: &[u8], options: &LoaderOptions) -> RagResult<Vec<RawCell>> {
    let notebook: NotebookFile = serde_json::from_slice(bytes)
        .map_err(|e| RagError::load("not a valid Jupyter notebook", e))?;

    tracing::debug!("Parsed notebook with {} cells", notebook.cells.len());

    Ok(notebook
        .cells
        .into_iter()
        .filter_map(|cell| render_cell(cell, options))
        .collect())
}

/// 셀을 raw 표현으로 렌더링 (소스와 출력이 모두 비어있으면 None)
fn render_cell(cell: NotebookCell, options: &LoaderOptions) -> Option<RawCell> {
    let source = cell.source.into_string();
    let mut has_output = false;
    let mut page_content = format!("'{}' cell: '{}'", cell.cell_type, escape_quotes(&source));

    if options.include_outputs && cell.cell_type == "code" && !cell.outputs.is_empty() {
        let mut text_output = String::new();
        let mut error_output: Option<(String, String)> = None;

        for output in cell.outputs {
            if output.output_type == "error" {
                error_output = Some((
                    output.ename.unwrap_or_default(),
                    output.evalue.unwrap_or_default(),
                ));
                break;
            }
            if let Some(text) = output.plain_text() {
                text_output.push_str(&text);
            }
        }

        if let Some((ename, evalue)) = error_output {
            let evalue = truncate_chars(&evalue, options.max_output_length);
            page_content.push_str(&format!(
                "\n gives error '{}', with description '{}'",
                escape_quotes(&ename),
                escape_quotes(evalue)
            ));
            has_output = true;
        } else if !text_output.trim().is_empty() {
            let truncated = truncate_chars(&text_output, options.max_output_length);
            page_content.push_str(&format!(
                "\n with output: '{}'",
                escape_quotes(truncated)
            ));
            has_output = true;
        }
    }

    if source.trim().is_empty() && !has_output {
        return None;
    }

    Some(RawCell { page_content })
}

/// 작은따옴표 이스케이프 (raw 표현의 구분자)
fn escape_quotes(text: &str) -> String {
    text.replace('\'', "\\'")
}

/// 문자 수 기준 자르기 (UTF-8 안전)
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

// ============================================================================
// Tests
// ============================================================================
