//! 설정 모듈 - 환경변수 기반 설정
//!
//! | 변수 | 기본값 |
//! |------|--------|
//! | `OPENAI_API_KEY` | (ingest / query에 필수) |
//! | `PINECONE_API_KEY` | (pinecone 백엔드에 필수) |
//! | `NOTEBOOK_RAG_INDEX` | `jupyter-notebook-rag` |
//! | `NOTEBOOK_RAG_BACKEND` | `pinecone` (`pinecone` \| `lance`) |
//! | `NOTEBOOK_RAG_DATA_DIR` | `<data_local_dir>/.notebook-rag` |
//! | `OPENAI_BASE_URL` | `https://api.openai.com/v1` |
//! | `PINECONE_CONTROL_URL` | `https://api.pinecone.io` |
//! | `NOTEBOOK_RAG_EMBEDDING_MODEL` | `text-embedding-3-small` |
//! | `NOTEBOOK_RAG_EMBEDDING_DIM` | `1536` |
//! | `NOTEBOOK_RAG_CHAT_MODEL` | `gpt-4-turbo-preview` |
//! | `NOTEBOOK_RAG_TOP_K` | `15` |
//! | `NOTEBOOK_RAG_MAX_CHUNK` | `1000` |
//! | `NOTEBOOK_RAG_FILTER_CONCURRENCY` | `4` |
//! | `NOTEBOOK_RAG_IO_TIMEOUT_SECS` | `60` |
//! | `NOTEBOOK_RAG_LLM_TIMEOUT_SECS` | `120` |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::embedding::{DEFAULT_DIMENSION, DEFAULT_EMBEDDING_MODEL, OPENAI_BASE_URL};
use crate::error::{RagError, RagResult};
use crate::llm::DEFAULT_CHAT_MODEL;
use crate::notebook::DEFAULT_MAX_CHUNK_LENGTH;
use crate::rag::DEFAULT_TOP_K;
use crate::store::PINECONE_CONTROL_URL;

/// 기본 인덱스 이름
pub const DEFAULT_INDEX_NAME: &str = "jupyter-notebook-rag";

/// 데이터 디렉토리 경로
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".notebook-rag")
}

// ============================================================================
// Backend
// ============================================================================

/// 벡터 인덱스 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Pinecone,
    Lance,
}

impl FromStr for Backend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pinecone" => Ok(Backend::Pinecone),
            "lance" | "lancedb" => Ok(Backend::Lance),
            other => Err(RagError::config(format!(
                "Unknown backend '{}' (expected pinecone or lance)",
                other
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Pinecone => write!(f, "pinecone"),
            Backend::Lance => write!(f, "lance"),
        }
    }
}

// ============================================================================
// RagConfig
// ============================================================================

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub openai_api_key: Option<String>,
    pub pinecone_api_key: Option<String>,
    pub index_name: String,
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub openai_base_url: String,
    pub pinecone_control_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub chat_model: String,
    pub top_k: usize,
    pub max_chunk_length: usize,
    pub filter_concurrency: usize,
    pub io_timeout: Duration,
    pub llm_timeout: Duration,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            pinecone_api_key: None,
            index_name: DEFAULT_INDEX_NAME.to_string(),
            backend: Backend::default(),
            data_dir: get_data_dir(),
            openai_base_url: OPENAI_BASE_URL.to_string(),
            pinecone_control_url: PINECONE_CONTROL_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimension: DEFAULT_DIMENSION,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            top_k: DEFAULT_TOP_K,
            max_chunk_length: DEFAULT_MAX_CHUNK_LENGTH,
            filter_concurrency: 4,
            io_timeout: Duration::from_secs(60),
            llm_timeout: Duration::from_secs(120),
        }
    }
}

impl RagConfig {
    /// 프로세스 환경변수에서 로드
    pub fn from_env() -> RagResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 조회 함수에서 로드 (빈 값은 미설정으로 취급)
    pub fn from_lookup<F>(lookup: F) -> RagResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let config = Self {
            openai_api_key: get("OPENAI_API_KEY"),
            pinecone_api_key: get("PINECONE_API_KEY"),
            index_name: get("NOTEBOOK_RAG_INDEX").unwrap_or(defaults.index_name),
            backend: match get("NOTEBOOK_RAG_BACKEND") {
                Some(value) => value.parse()?,
                None => defaults.backend,
            },
            data_dir: get("NOTEBOOK_RAG_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            pinecone_control_url: get("PINECONE_CONTROL_URL")
                .unwrap_or(defaults.pinecone_control_url),
            embedding_model: get("NOTEBOOK_RAG_EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            embedding_dimension: parse_number(
                "NOTEBOOK_RAG_EMBEDDING_DIM",
                get("NOTEBOOK_RAG_EMBEDDING_DIM"),
                defaults.embedding_dimension,
            )?,
            chat_model: get("NOTEBOOK_RAG_CHAT_MODEL").unwrap_or(defaults.chat_model),
            top_k: parse_number("NOTEBOOK_RAG_TOP_K", get("NOTEBOOK_RAG_TOP_K"), defaults.top_k)?,
            max_chunk_length: parse_number(
                "NOTEBOOK_RAG_MAX_CHUNK",
                get("NOTEBOOK_RAG_MAX_CHUNK"),
                defaults.max_chunk_length,
            )?,
            filter_concurrency: parse_number(
                "NOTEBOOK_RAG_FILTER_CONCURRENCY",
                get("NOTEBOOK_RAG_FILTER_CONCURRENCY"),
                defaults.filter_concurrency,
            )?,
            io_timeout: Duration::from_secs(parse_number(
                "NOTEBOOK_RAG_IO_TIMEOUT_SECS",
                get("NOTEBOOK_RAG_IO_TIMEOUT_SECS"),
                defaults.io_timeout.as_secs(),
            )?),
            llm_timeout: Duration::from_secs(parse_number(
                "NOTEBOOK_RAG_LLM_TIMEOUT_SECS",
                get("NOTEBOOK_RAG_LLM_TIMEOUT_SECS"),
                defaults.llm_timeout.as_secs(),
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    /// 값 범위 검증
    pub fn validate(&self) -> RagResult<()> {
        if self.index_name.trim().is_empty() {
            return Err(RagError::config("index name must not be empty"));
        }
        let positive = [
            ("NOTEBOOK_RAG_TOP_K", self.top_k as u64),
            ("NOTEBOOK_RAG_MAX_CHUNK", self.max_chunk_length as u64),
            ("NOTEBOOK_RAG_EMBEDDING_DIM", self.embedding_dimension as u64),
            ("NOTEBOOK_RAG_FILTER_CONCURRENCY", self.filter_concurrency as u64),
            ("NOTEBOOK_RAG_IO_TIMEOUT_SECS", self.io_timeout.as_secs()),
            ("NOTEBOOK_RAG_LLM_TIMEOUT_SECS", self.llm_timeout.as_secs()),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(RagError::config(format!("{} must be greater than 0", name)));
            }
        }
        Ok(())
    }

    pub fn require_openai_key(&self) -> RagResult<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| RagError::config("OPENAI_API_KEY is not set"))
    }

    pub fn require_pinecone_key(&self) -> RagResult<&str> {
        self.pinecone_api_key
            .as_deref()
            .ok_or_else(|| RagError::config("PINECONE_API_KEY is not set"))
    }

    /// LanceDB 디렉토리
    pub fn lance_path(&self) -> PathBuf {
        self.data_dir.join("vectors.lance")
    }

    /// 세션 파일
    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }
}

fn parse_number<T: FromStr>(name: &str, value: Option<String>, default: T) -> RagResult<T> {
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|_| RagError::config(format!("{} must be a number, got '{}'", name, raw))),
        None => Ok(default),
    }
}

// ============================================================================
// Tests
// ============================================================================
