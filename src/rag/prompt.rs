//! 프롬프트 템플릿
//!
//! 지원 자리표시자: `{CONTEXT}`, `{question}`, `{QUESTION}`, `{HISTORY}`.
//! 치환은 한 번만 훑으므로 문맥 안에 자리표시자 모양 텍스트가 있어도 다시 치환되지 않습니다.

/// 기본 질의응답 프롬프트
pub const DEFAULT_QA_TEMPLATE: &str = "You are assistant. Use the following pieces of {CONTEXT} to generate an answer to the provided question.
        question: {question}.
        Helpful Answer:";

/// 대화형 질의응답 프롬프트 (이전 대화 포함)
pub const DEFAULT_CONVERSATIONAL_TEMPLATE: &str = "You are assistant. Use the following pieces of {CONTEXT} and the conversation so far to generate an answer to the provided question.
        conversation: {HISTORY}
        question: {QUESTION}.
        Helpful Answer:";

/// 렌더링 입력값
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptValues<'a> {
    pub context: &'a str,
    pub question: &'a str,
    pub history: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn conversational() -> Self {
        Self::new(DEFAULT_CONVERSATIONAL_TEMPLATE)
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// 자리표시자 치환 (모르는 중괄호 구문은 그대로 둠)
    pub fn render(&self, values: &PromptValues<'_>) -> String {
        let mut out = String::with_capacity(self.template.len() + values.context.len());
        let mut rest = self.template.as_str();

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];

            let replacement = [
                ("{CONTEXT}", values.context),
                ("{question}", values.question),
                ("{QUESTION}", values.question),
                ("{HISTORY}", values.history),
            ]
            .into_iter()
            .find(|(token, _)| tail.starts_with(token));

            match replacement {
                Some((token, value)) => {
                    out.push_str(value);
                    rest = &tail[token.len()..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }

        out.push_str(rest);
        out
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_QA_TEMPLATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_render() {
        let rendered = PromptTemplate::default().render(&PromptValues {
            context: "ctx",
            question: "what?",
            history: "",
        });
        assert_eq!(
            rendered,
            "You are assistant. Use the following pieces of ctx to generate an answer to the provided question.\n        question: what?.\n        Helpful Answer:"
        );
    }

    #[test]
    fn test_single_pass_substitution() {
        let template = PromptTemplate::new("[{CONTEXT}] {question}");
        let rendered = template.render(&PromptValues {
            context: "literal {question}",
            question: "q",
            history: "",
        });
        assert_eq!(rendered, "[literal {question}] q");
    }

    #[test]
    fn test_unknown_braces_untouched() {
        let template = PromptTemplate::new("{ json: {x} } {HISTORY}");
        let rendered = template.render(&PromptValues {
            history: "h",
            ..Default::default()
        });
        assert_eq!(rendered, "{ json: {x} } h");
    }

    #[test]
    fn test_conversational_fills_history() {
        let rendered = PromptTemplate::conversational().render(&PromptValues {
            context: "c",
            question: "next?",
            history: "user: hi",
        });
        assert!(rendered.contains("conversation: user: hi"));
        assert!(rendered.contains("question: next?."));
    }
}
