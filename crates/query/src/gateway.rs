use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use index::{GraphReader, Record};

use crate::conversation::ConversationContext;
use crate::llm::TextGenerator;
use crate::text2cypher::{ReadOnlyGuard, build_cypher_prompt, clean_generated};

pub const ERROR_PREFIX: &str = "❌ 분석 중 오류 발생: ";
/// Query reported when answering failed.
pub const ERROR_QUERY: &str = "Error";
/// Shown to the user when the query matched nothing.
pub const NO_ANSWER_NOTICE: &str = "❌ 데이터를 찾지 못했습니다. 검색 조건을 바꿔보세요.";
/// Stored in the transcript for an unanswered question.
pub const NO_ANSWER_TRANSCRIPT: &str = "검색 결과 없음";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum AnswerOutcome {
    Answered(String),
    /// The query ran and returned no rows.
    NoAnswer,
    /// Error-tagged message, already localized.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayAnswer {
    pub outcome: AnswerOutcome,
    /// The exact query that ran, or [`ERROR_QUERY`].
    pub query: String,
}

impl GatewayAnswer {
    /// `None` only for the no-answer case.
    pub fn answer(&self) -> Option<&str> {
        match &self.outcome {
            AnswerOutcome::Answered(text) | AnswerOutcome::Failed(text) => Some(text),
            AnswerOutcome::NoAnswer => None,
        }
    }
}

/// Natural-language question in, grounded answer and the query behind it out.
pub struct QueryGateway {
    reader: Arc<dyn GraphReader>,
    query_llm: Arc<dyn TextGenerator>,
    answer_llm: Arc<dyn TextGenerator>,
    guard: ReadOnlyGuard,
}

impl QueryGateway {
    pub fn new(
        reader: Arc<dyn GraphReader>,
        query_llm: Arc<dyn TextGenerator>,
        answer_llm: Arc<dyn TextGenerator>,
        guard: ReadOnlyGuard,
    ) -> Self {
        Self {
            reader,
            query_llm,
            answer_llm,
            guard,
        }
    }

    /// Answer one question and append both turns to `conversation`. Never fails.
    pub async fn answer(&self, question: &str, conversation: &mut ConversationContext) -> GatewayAnswer {
        conversation.push_user(question);

        let answer = match self.try_answer(question).await {
            Ok(answer) => answer,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Question could not be answered");
                GatewayAnswer {
                    outcome: AnswerOutcome::Failed(format!("{}{:#}", ERROR_PREFIX, e)),
                    query: ERROR_QUERY.to_string(),
                }
            }
        };

        conversation.push_assistant(&answer);
        answer
    }

    async fn try_answer(&self, question: &str) -> Result<GatewayAnswer> {
        let generated = self
            .query_llm
            .generate(&build_cypher_prompt(question))
            .await
            .context("Query generation failed")?;
        let query = self.guard.check(&clean_generated(&generated))?;

        let records = self
            .reader
            .read(&query)
            .await
            .context("Query execution failed")?;
        info!(rows = records.len(), query = %query, "Graph query executed");

        if records.is_empty() {
            return Ok(GatewayAnswer {
                outcome: AnswerOutcome::NoAnswer,
                query,
            });
        }

        let prompt = build_answer_prompt(question, &records_to_context(&records));
        let text = self
            .answer_llm
            .generate(&prompt)
            .await
            .context("Answer synthesis failed")?;

        Ok(GatewayAnswer {
            outcome: AnswerOutcome::Answered(text.trim().to_string()),
            query,
        })
    }
}

/// One JSON object per row, in result order.
pub fn records_to_context(records: &[Record]) -> String {
    records
        .iter()
        .map(|r| serde_json::Value::Object(r.clone()).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_answer_prompt(question: &str, context: &str) -> String {
    format!(
        r#"당신은 ESG 전문가입니다. 제공된 데이터를 기반으로 한국어로 답변하세요.
데이터에 없는 내용은 추측하지 말고, 데이터만으로 답할 수 없으면 그렇다고 말하세요.

질문: {}

데이터:
{}"#,
        question, context
    )
}
