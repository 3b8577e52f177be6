//! 임베딩 모듈 - OpenAI API를 통한 텍스트 벡터화
//!
//! 청크 삽입(청크마다)과 질의(질의마다) 양쪽에서 같은 프로바이더를 사용합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OpenAiEmbedding::new(api_key, EmbeddingOptions::default())?;
//! let embedding = embedder.embed("How is the dataframe filtered?").await?;
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI Embedding
// ============================================================================

/// OpenAI API 기본 URL
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// 기본 임베딩 모델
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// 기본 임베딩 차원 (text-embedding-3-small)
pub const DEFAULT_DIMENSION: usize = 1536;

/// 429/5xx 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 1000;

/// 요청 타임아웃 하나로 재시도 전체가 끝날 수 있는 최대 시간
///
/// (MAX_RETRIES + 1)회 요청 + 백오프 합계.
pub fn retry_budget(request_timeout: Duration) -> Duration {
    let backoff_ms: u64 = (1..=MAX_RETRIES)
        .map(|attempt| INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1))
        .sum();
    request_timeout * (MAX_RETRIES + 1) + Duration::from_millis(backoff_ms)
}

/// 임베딩 클라이언트 설정
#[derive(Debug, Clone)]
pub struct EmbeddingOptions {
    pub model: String,
    pub dimension: usize,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            base_url: OPENAI_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// OpenAI 임베딩 구현체
///
/// ref: https://platform.openai.com/docs/api-reference/embeddings
#[derive(Debug)]
pub struct OpenAiEmbedding {
    api_key: String,
    client: reqwest::Client,
    options: EmbeddingOptions,
}

impl OpenAiEmbedding {
    /// 새 OpenAI 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API 키
    /// * `options` - 모델, 차원, 엔드포인트, 타임아웃
    pub fn new(api_key: String, options: EmbeddingOptions) -> Result<Self> {
        if options.dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            options,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.options.base_url.trim_end_matches('/'))
    }

    /// 임베딩 요청 (429/5xx/전송 실패 시 지수 백오프 재시도)
    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.options.model,
            input: inputs,
            dimensions: Some(self.options.dimension),
        };

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
                tracing::warn!(
                    "Embedding request failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    MAX_RETRIES
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self
                .client
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let parsed: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                return collect_in_order(parsed, inputs.len());
            }

            if status.as_u16() == 429 || status.is_server_error() {
                last_error = Some(anyhow::anyhow!("OpenAI API error ({}): {}", status, body));
                continue;
            }

            // 다른 에러 - 즉시 실패
            if let Ok(error) = serde_json::from_str::<OpenAiError>(&body) {
                anyhow::bail!("OpenAI API error ({}): {}", status, error.error.message);
            }
            anyhow::bail!("OpenAI API error ({}): {}", status, body);
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }
}

/// 응답의 `index` 기준으로 입력 순서 복원
fn collect_in_order(response: EmbedResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    if response.data.len() != expected {
        anyhow::bail!(
            "Embedding count mismatch: expected {}, got {}",
            expected,
            response.data.len()
        );
    }

    let mut data = response.data;
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI API 에러 응답
#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiError {
    pub(crate) error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiErrorDetail {
    pub(crate) message: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.options.dimension]);
        }

        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!("Embedding batch of {} texts", texts.len());
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.options.dimension
    }

    fn name(&self) -> &str {
        &self.options.model
    }
}

// ============================================================================
// Tests
// ============================================================================
