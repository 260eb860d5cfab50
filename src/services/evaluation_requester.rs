//! 评分请求服务 - 业务能力层
//!
//! 为一个批次构建评分提示词并调用模型，返回模型的原始输出。
//! 不做解析与修正，这些交给 `response_validator`。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::error::{AppResult, LlmError};
use crate::models::Batch;
use crate::services::llm_service::{ChatProvider, ChatRequest};

/// 批次评分接口
#[async_trait]
pub trait BatchEvaluator: Send + Sync {
    /// 返回模型的原始响应文本
    async fn evaluate(&self, batch: &Batch) -> AppResult<String>;
}

const SYSTEM_PROMPT: &str = "You are an experienced examiner grading a student's handwritten answer sheet. \
Grade every listed question against its expected answer, award partial credit where the student is partially correct, \
and respond with strict JSON only. Do not wrap the JSON in prose.";

const RESPONSE_SCHEMA: &str = r#"{
  "studentName": "string (as written on the sheet, or empty)",
  "rollNo": "string",
  "class": "string",
  "subject": "string",
  "answers": [
    {
      "questionNo": 1,
      "section": "Section A",
      "answer": "the student's answer, cleaned up",
      "rawExtractedText": "the student's answer exactly as extracted",
      "score": [0.5, 1],
      "remarks": "short examiner remark",
      "confidence": 0.9,
      "concepts": ["concept tested"],
      "missingElements": ["what the answer lacks"],
      "answerMatches": false,
      "personalizedFeedback": "one or two sentences addressed to the student",
      "alignmentNotes": "how the student's answer was located on the sheet"
    }
  ],
  "overallPerformance": {
    "strengths": ["..."],
    "areasForImprovement": ["..."],
    "studyRecommendations": ["..."],
    "personalizedSummary": "..."
  }
}"#;

/// 评分请求器
pub struct EvaluationRequester {
    provider: Arc<dyn ChatProvider>,
    timeout: Duration,
    max_output_tokens: u32,
}

impl EvaluationRequester {
    pub fn new(provider: Arc<dyn ChatProvider>, timeout: Duration, max_output_tokens: usize) -> Self {
        Self {
            provider,
            timeout,
            max_output_tokens: u32::try_from(max_output_tokens).unwrap_or(u32::MAX),
        }
    }

    /// 构建用户提示词
    pub fn build_prompt(batch: &Batch) -> String {
        let questions: Vec<_> = batch
            .questions
            .iter()
            .map(|q| {
                json!({
                    "questionNo": q.number,
                    "section": q.section,
                    "question": q.text,
                    "expectedAnswer": q.expected_answer,
                    "maxMarks": q.max_marks,
                })
            })
            .collect();
        let questions_json = serde_json::to_string_pretty(&questions).unwrap_or_else(|_| "[]".to_string());

        format!(
            "Grade the following {count} question(s).\n\n\
             ## Questions\n{questions_json}\n\n\
             ## Student answer sheet (full text)\n{student}\n\n\
             ## Instructions\n\
             - Return exactly one answer object per question above, using the same questionNo and section.\n\
             - score is [earned, possible]; possible must equal maxMarks and earned must lie between 0 and possible.\n\
             - confidence is a number between 0 and 1.\n\
             - answerMatches says whether the student's final answer matches the expected answer.\n\
             - If the student did not answer a question, give score [0, maxMarks] and explain in remarks.\n\
             - Respond with JSON only, following this schema:\n{schema}",
            count = batch.len(),
            student = batch.student_answer_text,
            schema = RESPONSE_SCHEMA,
        )
    }
}

#[async_trait]
impl BatchEvaluator for EvaluationRequester {
    async fn evaluate(&self, batch: &Batch) -> AppResult<String> {
        let request = ChatRequest::new(Self::build_prompt(batch))
            .with_system(SYSTEM_PROMPT)
            .with_max_tokens(self.max_output_tokens);

        debug!(
            "批次 {} 请求评分: {} 道题, 预估输入 {} tokens",
            batch.index,
            batch.len(),
            batch.estimated_input_tokens
        );

        match tokio::time::timeout(self.timeout, self.provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout {
                model: self.provider.model_name().to_string(),
                secs: self.timeout.as_secs(),
            }
            .into()),
        }
    }
}
