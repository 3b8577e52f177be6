//! 관련성 필터 - 후보 청크마다 언어 모델에 YES / NO 판정을 요청
//!
//! 판정은 최대 `concurrency`개까지 동시에 진행하되 결과 순서는 입력 순서를 유지합니다.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::{StreamExt, TryStreamExt};
use regex::Regex;

use crate::llm::LanguageModel;
use crate::store::{bounded, RetrievedChunk};

/// 판정 프롬프트
fn filter_prompt(question: &str, context: &str) -> String {
    format!(
        "Given the following question and context, return YES if the context is relevant to the question and NO if it isn't.\n\n> Question: {}\n> Context:\n>>>\n{}\n>>>\n> Relevant (YES / NO):",
        question, context
    )
}

/// 모델 기반 관련성 필터
pub struct RelevanceFilter {
    model: Arc<dyn LanguageModel>,
    concurrency: usize,
    timeout: Duration,
}

impl RelevanceFilter {
    pub fn new(model: Arc<dyn LanguageModel>, concurrency: usize, timeout: Duration) -> Self {
        Self {
            model,
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    /// 관련 있다고 판정된 후보만 남김 (판정 실패 시 전체 실패)
    pub async fn filter(
        &self,
        question: &str,
        candidates: Vec<RetrievedChunk>,
    ) -> Result<Vec<RetrievedChunk>> {
        let total = candidates.len();

        let judged: Vec<(RetrievedChunk, bool)> = futures::stream::iter(candidates)
            .map(|candidate| async move {
                let relevant = self.judge(question, &candidate.chunk.content).await?;
                Ok::<_, anyhow::Error>((candidate, relevant))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let kept: Vec<RetrievedChunk> = judged
            .into_iter()
            .filter_map(|(candidate, relevant)| relevant.then_some(candidate))
            .collect();

        tracing::debug!("Relevance filter kept {}/{} candidates", kept.len(), total);
        Ok(kept)
    }

    async fn judge(&self, question: &str, context: &str) -> Result<bool> {
        let prompt = filter_prompt(question, context);
        let output = bounded(self.timeout, self.model.complete(&prompt)).await?;
        parse_verdict(&output)
    }
}

/// YES / NO 응답 파싱 (대소문자 무시, 둘 다 있거나 둘 다 없으면 에러)
pub fn parse_verdict(output: &str) -> Result<bool> {
    let pattern = Regex::new(r"(?i)\b(YES|NO)\b")?;

    let mut saw_yes = false;
    let mut saw_no = false;
    for capture in pattern.captures_iter(output) {
        if capture[1].eq_ignore_ascii_case("yes") {
            saw_yes = true;
        } else {
            saw_no = true;
        }
    }

    match (saw_yes, saw_no) {
        (true, false) => Ok(true),
        (false, true) => Ok(false),
        (true, true) => anyhow::bail!("Ambiguous relevance verdict: {:?}", output),
        (false, false) => anyhow::bail!("Relevance verdict must contain YES or NO: {:?}", output),
    }
}
