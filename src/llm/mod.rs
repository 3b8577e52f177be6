//! 언어 모델 모듈 - 완성된 프롬프트 → 텍스트 응답
//!
//! 관련성 필터(후보마다 1회)와 최종 답변 생성(질의마다 1회)에 사용됩니다.
//! ref: https://platform.openai.com/docs/api-reference/chat

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::{OpenAiError, OPENAI_BASE_URL};

// ============================================================================
// LanguageModel Trait
// ============================================================================

/// 언어 모델 트레이트
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// 렌더링된 프롬프트로 텍스트 생성 (응답은 가공하지 않음)
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI Chat
// ============================================================================

/// 기본 채팅 모델
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4-turbo-preview";

/// 429/5xx 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 2;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// 채팅 클라이언트 설정
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: f32,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: 0.0,
            base_url: OPENAI_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// OpenAI Chat Completions 구현체
#[derive(Debug)]
pub struct OpenAiChat {
    api_key: String,
    client: reqwest::Client,
    options: ChatOptions,
}

impl OpenAiChat {
    pub fn new(api_key: String, options: ChatOptions) -> Result<Self> {
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
        format!(
            "{}/chat/completions",
            self.options.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.options.model,
            temperature: self.options.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
                tracing::warn!(
                    "Chat request failed, retrying in {:?} (attempt {}/{})",
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
                    last_error = Some(anyhow::anyhow!("Failed to send chat request: {}", e));
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let parsed: ChatResponse =
                    serde_json::from_str(&body).context("Failed to parse chat response")?;
                return parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| anyhow::anyhow!("Chat response has no content"));
            }

            if status.as_u16() == 429 || status.is_server_error() {
                last_error = Some(anyhow::anyhow!("OpenAI API error ({}): {}", status, body));
                continue;
            }

            if let Ok(error) = serde_json::from_str::<OpenAiError>(&body) {
                anyhow::bail!("OpenAI API error ({}): {}", status, error.error.message);
            }
            anyhow::bail!("OpenAI API error ({}): {}", status, body);
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after {} retries", MAX_RETRIES)))
    }

    fn name(&self) -> &str {
        &self.options.model
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat(server: &MockServer) -> OpenAiChat {
        OpenAiChat::new(
            "sk-test".to_string(),
            ChatOptions {
                base_url: format!("{}/v1", server.uri()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_complete_returns_content_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4-turbo-preview",
                "messages": [{"role": "user", "content": "Say hi"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-1",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "  hi there\n"}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let answer = chat(&server).complete("Say hi").await.unwrap();
        assert_eq!(answer, "  hi there\n");
    }

    #[tokio::test]
    async fn test_bad_request_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "context length exceeded"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = chat(&server).complete("x").await.unwrap_err();
        assert!(err.to_string().contains("context length exceeded"));
    }
}
