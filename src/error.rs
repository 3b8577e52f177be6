//! 에러 타입 - 파이프라인 경계 에러 분류
//!
//! 외부 협력자(HTTP 클라이언트, 벡터 저장소)는 `anyhow::Result`를 반환하고,
//! 코어 연산(청킹, 배치, 삽입, 검색, 생성, 삭제)은 그 실패를 [`RagError`]로 감쌉니다.
//! 모든 variant는 짧은 사용자 메시지와 원인(`source`)을 함께 보존합니다.

use thiserror::Error;

/// RAG 파이프라인 에러
#[derive(Error, Debug)]
pub enum RagError {
    /// 잘못된 입력 (빈 파일, 지원하지 않는 확장자, 잘못된 파라미터)
    #[error("Validation error: {0}")]
    Validation(String),

    /// 노트북 파싱 실패
    #[error("Error loading notebook: {message}")]
    Load {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    /// 청킹 파이프라인 실패
    #[error("Error processing notebook: {message}")]
    Processing {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    /// 임베딩 또는 벡터 쓰기 실패 (롤백 없음)
    #[error("Failed to insert into namespace '{namespace}'")]
    Insert {
        namespace: String,
        #[source]
        source: anyhow::Error,
    },

    /// 유사도 검색 또는 관련성 필터 실패
    #[error("Error retrieving context: {message}")]
    Retrieval {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    /// 최종 답변 생성 실패
    #[error("Error generating answer: {message}")]
    Generation {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    /// 네임스페이스 삭제 요청 자체가 실패
    #[error("Failed to delete namespace '{namespace}'")]
    Delete {
        namespace: String,
        #[source]
        source: anyhow::Error,
    },

    /// 인덱스 관리 연산 실패
    #[error("Index operation failed: {message}")]
    Index {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    /// 설정 오류 (환경변수 누락 등)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// 코어 연산 결과 타입
pub type RagResult<T> = Result<T, RagError>;

impl RagError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn load(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Load {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn processing(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Processing {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn insert(namespace: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Insert {
            namespace: namespace.into(),
            source: source.into(),
        }
    }

    pub fn retrieval(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Retrieval {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn generation(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Generation {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn delete(namespace: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Delete {
            namespace: namespace.into(),
            source: source.into(),
        }
    }

    pub fn index(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Index {
            message: message.into(),
            source: source.into(),
        }
    }

    /// 에러 종류 이름
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Load { .. } => "LoadError",
            Self::Processing { .. } => "ProcessingError",
            Self::Insert { .. } => "InsertError",
            Self::Retrieval { .. } => "RetrievalError",
            Self::Generation { .. } => "GenerationError",
            Self::Delete { .. } => "DeleteError",
            Self::Index { .. } => "IndexError",
            Self::Config(_) => "ConfigError",
        }
    }

    /// 사용자에게 보여줄 한 줄 메시지 (원인 체인 포함)
    pub fn user_message(&self) -> String {
        use std::error::Error as _;

        let mut message = self.to_string();
        let mut cause = self.source();
        while let Some(err) = cause {
            message.push_str(": ");
            message.push_str(&err.to_string());
            cause = err.source();
        }
        message
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_includes_cause() {
        let err = RagError::load("invalid notebook", anyhow::anyhow!("expected value at line 1"));
        let msg = err.user_message();
        assert!(msg.starts_with("Error loading notebook: invalid notebook"));
        assert!(msg.contains("expected value at line 1"));
    }

    #[test]
    fn test_validation_has_no_cause() {
        let err = RagError::validation("Empty file uploaded: a.ipynb");
        assert_eq!(err.user_message(), "Validation error: Empty file uploaded: a.ipynb");
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn test_user_message_walks_context_chain() {
        let cause = anyhow::anyhow!("quota exceeded").context("embedding failed");
        let err = RagError::insert("ns", cause);
        assert_eq!(
            err.user_message(),
            "Failed to insert into namespace 'ns': embedding failed: quota exceeded"
        );
    }

    #[test]
    fn test_source_is_preserved() {
        use std::error::Error as _;

        let err = RagError::insert("ns", anyhow::anyhow!("rate limited"));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("rate limited"));
    }
}
