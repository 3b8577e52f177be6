//! RAG 모듈 - 검색 증강 답변 생성
//!
//! 흐름: 유사도 검색(top k) → 관련성 필터 → 프롬프트 조립 → 모델 1회 호출.
//! 검색 단계(검색 + 필터)와 생성 단계는 호출마다 넘기는 [`CancelScope`]로 각각 취소할 수 있습니다.

mod filter;
mod prompt;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{RagError, RagResult};
use crate::llm::LanguageModel;
use crate::store::{bounded, RetrievedChunk, Retriever};

pub use filter::{parse_verdict, RelevanceFilter};
pub use prompt::{
    PromptTemplate, PromptValues, DEFAULT_CONVERSATIONAL_TEMPLATE, DEFAULT_QA_TEMPLATE,
};

/// 기본 검색 후보 수
pub const DEFAULT_TOP_K: usize = 15;

/// 문맥 청크 구분자
pub const CONTEXT_SEPARATOR: &str = "\n\n";

// ============================================================================
// Settings
// ============================================================================

/// 답변 생성 설정
#[derive(Debug, Clone)]
pub struct AnswerSettings {
    /// 동시에 진행할 관련성 판정 수
    pub filter_concurrency: usize,
    /// 모델 호출 1회당 타임아웃
    pub llm_timeout: Duration,
}

impl Default for AnswerSettings {
    fn default() -> Self {
        Self {
            filter_concurrency: 4,
            llm_timeout: Duration::from_secs(120),
        }
    }
}

/// 호출 단위 취소 핸들
///
/// 질의마다 새로 만들어 넘깁니다. 한 번 취소된 스코프는 다시 쓰지 않습니다.
#[derive(Debug, Clone, Default)]
pub struct CancelScope {
    /// 검색 + 필터 단계
    pub retrieval: CancellationToken,
    /// 최종 생성 단계
    pub generation: CancellationToken,
}

impl CancelScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// 상위 토큰(예: Ctrl-C)이 취소되면 두 단계 모두 취소
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            retrieval: parent.child_token(),
            generation: parent.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.retrieval.cancel();
        self.generation.cancel();
    }
}

// ============================================================================
// RetrievalAnswerer
// ============================================================================

/// 검색 증강 답변기
pub struct RetrievalAnswerer {
    model: Arc<dyn LanguageModel>,
    filter: RelevanceFilter,
    settings: AnswerSettings,
}

impl RetrievalAnswerer {
    pub fn new(model: Arc<dyn LanguageModel>, settings: AnswerSettings) -> Self {
        let filter = RelevanceFilter::new(
            Arc::clone(&model),
            settings.filter_concurrency,
            settings.llm_timeout,
        );
        Self {
            model,
            filter,
            settings,
        }
    }

    pub fn settings(&self) -> &AnswerSettings {
        &self.settings
    }

    /// 질의에 대한 답변 (모델 출력 그대로)
    ///
    /// 관련 문맥이 하나도 없어도 모델은 호출됩니다.
    pub async fn answer(
        &self,
        query: &str,
        retriever: &dyn Retriever,
        k: usize,
        template: &PromptTemplate,
        scope: &CancelScope,
    ) -> RagResult<String> {
        self.answer_inner(query, None, retriever, k, template, scope)
            .await
    }

    /// 이전 대화를 `{HISTORY}`로 함께 전달하는 답변
    pub async fn answer_with_history(
        &self,
        query: &str,
        history: &str,
        retriever: &dyn Retriever,
        k: usize,
        template: &PromptTemplate,
        scope: &CancelScope,
    ) -> RagResult<String> {
        self.answer_inner(query, Some(history), retriever, k, template, scope)
            .await
    }

    /// 검색 없이 템플릿만으로 생성 (`{CONTEXT}`는 빈 문자열)
    pub async fn generate(
        &self,
        query: &str,
        history: Option<&str>,
        template: &PromptTemplate,
        cancel: &CancellationToken,
    ) -> RagResult<String> {
        let prompt = template.render(&PromptValues {
            context: "",
            question: query,
            history: history.unwrap_or_default(),
        });
        self.complete(&prompt, cancel).await
    }

    async fn answer_inner(
        &self,
        query: &str,
        history: Option<&str>,
        retriever: &dyn Retriever,
        k: usize,
        template: &PromptTemplate,
        scope: &CancelScope,
    ) -> RagResult<String> {
        let context = tokio::select! {
            biased;
            _ = scope.retrieval.cancelled() => {
                return Err(RagError::retrieval("cancelled", anyhow::anyhow!("retrieval cancelled")));
            }
            result = self.retrieve_context(query, retriever, k) => result?,
        };

        let prompt = template.render(&PromptValues {
            context: &context,
            question: query,
            history: history.unwrap_or_default(),
        });

        tracing::debug!("Generating answer from {} chars of context", context.len());
        self.complete(&prompt, &scope.generation).await
    }

    /// 모델 1회 호출 (타임아웃 + 취소)
    async fn complete(&self, prompt: &str, cancel: &CancellationToken) -> RagResult<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(RagError::generation("cancelled", anyhow::anyhow!("generation cancelled")))
            }
            result = bounded(self.settings.llm_timeout, self.model.complete(prompt)) => {
                result.map_err(|e| RagError::generation("model call failed", e))
            }
        }
    }

    /// 검색 + 필터 후 문맥 문자열 조립
    async fn retrieve_context(
        &self,
        query: &str,
        retriever: &dyn Retriever,
        k: usize,
    ) -> RagResult<String> {
        let candidates = retriever
            .similarity_search(query, k)
            .await
            .map_err(|e| RagError::retrieval("similarity search failed", e))?;

        tracing::debug!("Retrieved {} candidates", candidates.len());

        let kept = self
            .filter
            .filter(query, candidates)
            .await
            .map_err(|e| RagError::retrieval("relevance filter failed", e))?;

        Ok(join_context(&kept))
    }
}

/// 청크 본문을 구분자로 연결
pub fn join_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.chunk.content.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notebook::{Chunk, ChunkMetadata};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StaticRetriever(Vec<&'static str>);

    #[async_trait]
    impl Retriever for StaticRetriever {
        async fn similarity_search(&self, _query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
            Ok(self
                .0
                .iter()
                .take(k)
                .enumerate()
                .map(|(i, text)| RetrievedChunk {
                    chunk: Chunk {
                        content: text.to_string(),
                        metadata: ChunkMetadata {
                            source: "nb.ipynb".to_string(),
                            cell_type: "code".to_string(),
                            chunk_index: i,
                        },
                    },
                    score: 1.0 - i as f32 * 0.1,
                })
                .collect())
        }
    }

    struct BrokenRetriever;

    #[async_trait]
    impl Retriever for BrokenRetriever {
        async fn similarity_search(&self, _query: &str, _k: usize) -> Result<Vec<RetrievedChunk>> {
            anyhow::bail!("index unavailable")
        }
    }

    /// 필터 프롬프트에는 "keep" 포함 여부로 판정, 그 외 프롬프트는 기록 후 고정 답변
    #[derive(Default)]
    struct RecordingModel {
        prompts: Mutex<Vec<String>>,
        fail_generation: bool,
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn complete(&self, prompt: &str) -> Result<String> {
            if prompt.contains("Relevant (YES / NO)") {
                let context = prompt.split(">>>\n").nth(1).unwrap_or_default();
                return Ok(if context.contains("keep") { "YES" } else { "NO" }.to_string());
            }
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.fail_generation {
                anyhow::bail!("rate limited");
            }
            Ok("  raw answer \n".to_string())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_answer_uses_filtered_context() {
        let model = Arc::new(RecordingModel::default());
        let answerer = RetrievalAnswerer::new(model.clone(), AnswerSettings::default());
        let retriever = StaticRetriever(vec!["keep a", "drop b", "keep c"]);

        let answer = answerer
            .answer(
                "why?",
                &retriever,
                15,
                &PromptTemplate::new("C={CONTEXT}|Q={question}"),
                &CancelScope::new(),
            )
            .await
            .unwrap();

        assert_eq!(answer, "  raw answer \n");
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0], "C=keep a\n\nkeep c|Q=why?");
    }

    #[tokio::test]
    async fn test_empty_context_still_calls_model() {
        let model = Arc::new(RecordingModel::default());
        let answerer = RetrievalAnswerer::new(model.clone(), AnswerSettings::default());

        let answer = answerer
            .answer("q", &StaticRetriever(vec![]), 15, &PromptTemplate::default(), &CancelScope::new())
            .await
            .unwrap();

        assert!(!answer.is_empty());
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_answer_with_history() {
        let model = Arc::new(RecordingModel::default());
        let answerer = RetrievalAnswerer::new(model.clone(), AnswerSettings::default());

        answerer
            .answer_with_history(
                "and then?",
                "user: first question",
                &StaticRetriever(vec!["keep x"]),
                5,
                &PromptTemplate::new("{HISTORY}|{CONTEXT}|{QUESTION}"),
                &CancelScope::new(),
            )
            .await
            .unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts[0], "user: first question|keep x|and then?");
    }

    #[tokio::test]
    async fn test_retrieval_failure() {
        let answerer =
            RetrievalAnswerer::new(Arc::new(RecordingModel::default()), AnswerSettings::default());
        let err = answerer
            .answer("q", &BrokenRetriever, 15, &PromptTemplate::default(), &CancelScope::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Retrieval { .. }));
        assert!(err.user_message().contains("index unavailable"));
    }

    #[tokio::test]
    async fn test_generation_failure() {
        let model = Arc::new(RecordingModel {
            fail_generation: true,
            ..Default::default()
        });
        let answerer = RetrievalAnswerer::new(model, AnswerSettings::default());
        let err = answerer
            .answer("q", &StaticRetriever(vec!["keep"]), 15, &PromptTemplate::default(), &CancelScope::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Generation { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_stages() {
        let answerer =
            RetrievalAnswerer::new(Arc::new(RecordingModel::default()), AnswerSettings::default());
        let retriever = StaticRetriever(vec!["keep"]);

        let scope = CancelScope::new();
        scope.retrieval.cancel();
        let err = answerer
            .answer("q", &retriever, 15, &PromptTemplate::default(), &scope)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Retrieval { .. }));

        let scope = CancelScope::new();
        scope.generation.cancel();
        let err = answerer
            .answer("q", &retriever, 15, &PromptTemplate::default(), &scope)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Generation { .. }));
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_cancel_does_not_leak_into_next_call() {
        let model = Arc::new(RecordingModel::default());
        let answerer = RetrievalAnswerer::new(model.clone(), AnswerSettings::default());
        let retriever = StaticRetriever(vec!["keep"]);

        let first = CancelScope::new();
        first.cancel();
        assert!(answerer
            .answer("q1", &retriever, 15, &PromptTemplate::default(), &first)
            .await
            .is_err());

        let answer = answerer
            .answer("q2", &retriever, 15, &PromptTemplate::default(), &CancelScope::new())
            .await
            .unwrap();
        assert_eq!(answer, "  raw answer \n");
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_parent_token_cancels_scope() {
        let answerer =
            RetrievalAnswerer::new(Arc::new(RecordingModel::default()), AnswerSettings::default());
        let shutdown = CancellationToken::new();
        let scope = CancelScope::child_of(&shutdown);
        shutdown.cancel();

        let err = answerer
            .answer("q", &StaticRetriever(vec!["keep"]), 15, &PromptTemplate::default(), &scope)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Retrieval { .. }));
    }

    #[tokio::test]
    async fn test_generate_without_retrieval() {
        let model = Arc::new(RecordingModel::default());
        let answerer = RetrievalAnswerer::new(model.clone(), AnswerSettings::default());

        answerer
            .generate(
                "what is pandas?",
                None,
                &PromptTemplate::new("[{CONTEXT}] {question}"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        answerer
            .generate(
                "and numpy?",
                Some("user: what is pandas?"),
                &PromptTemplate::conversational(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts[0], "[] what is pandas?");
        assert!(prompts[1].contains("user: what is pandas?"));
        assert!(prompts[1].contains("and numpy?"));
    }
}
