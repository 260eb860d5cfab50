//! 批次规划服务 - 业务能力层
//!
//! 把对齐后的题目切分为若干批次，每批受输入/输出 token 与题目数量限制。
//! 学生作答全文不拆分，每个批次都完整携带。

use tracing::{debug, warn};

use crate::error::{AppResult, PlanError};
use crate::models::{Batch, BatchLimits, QuestionRecord};
use crate::services::token_estimator::TokenEstimator;

/// 批次规划器
#[derive(Debug, Clone)]
pub struct BatchPlanner {
    estimator: TokenEstimator,
    output_tokens_per_question: usize,
}

impl Default for BatchPlanner {
    fn default() -> Self {
        Self::new(TokenEstimator::default(), 150)
    }
}

impl BatchPlanner {
    pub fn new(estimator: TokenEstimator, output_tokens_per_question: usize) -> Self {
        Self {
            estimator,
            output_tokens_per_question: output_tokens_per_question.max(1),
        }
    }

    /// 整份输入的预估 token 数（所有题干 + 标准答案 + 学生作答）
    pub fn estimate_input_tokens(&self, questions: &[QuestionRecord], student_answer_text: &str) -> usize {
        let chars: usize = questions.iter().map(QuestionRecord::char_len).sum::<usize>()
            + student_answer_text.chars().count();
        self.estimator.estimate_chars(chars)
    }

    /// 单批最多容纳的题目数：题目数上限与输出 token 上限取小
    fn chunk_cap(&self, limits: &BatchLimits) -> usize {
        let by_output = (limits.max_output_tokens / self.output_tokens_per_question).max(1);
        limits.max_questions_per_batch.max(1).min(by_output)
    }

    /// 规划批次
    ///
    /// 预估输入不超过上限且题目数不超过单批上限时只规划一个批次；
    /// 否则按顺序切分，尽量不把一个分区拆到两个批次里，
    /// 但不会因此让批次数超过 `ceil(题目数 / 单批上限)`。
    pub fn plan(
        &self,
        questions: &[QuestionRecord],
        student_answer_text: &str,
        limits: &BatchLimits,
    ) -> AppResult<Vec<Batch>> {
        if questions.is_empty() {
            return Err(PlanError::EmptyQuestionSet.into());
        }

        for q in questions {
            let tokens = self.estimator.estimate_chars(q.char_len());
            if tokens > limits.max_input_tokens {
                return Err(PlanError::OversizedQuestion {
                    section: q.section.clone(),
                    number: q.number,
                    tokens,
                    max_input_tokens: limits.max_input_tokens,
                }
                .into());
            }
        }

        let student_chars = student_answer_text.chars().count();
        let estimated = self.estimate_input_tokens(questions, student_answer_text);
        let cap = self.chunk_cap(limits);

        if estimated <= limits.max_input_tokens && questions.len() <= cap {
            debug!("预估 {} tokens，单批次即可", estimated);
            return Ok(vec![Batch {
                index: 0,
                questions: questions.to_vec(),
                student_answer_text: student_answer_text.to_string(),
                estimated_input_tokens: estimated,
            }]);
        }

        // 学生作答本身已经挤占了全部预算时，只按题目本身计量
        let largest = questions.iter().map(QuestionRecord::char_len).max().unwrap_or(0);
        let packing_base = if self.estimator.estimate_chars(student_chars + largest) > limits.max_input_tokens {
            warn!(
                "学生作答预估 {} tokens，单批无法同时容纳作答与最长题目，按题目本身切分",
                self.estimator.estimate(student_answer_text)
            );
            0
        } else {
            student_chars
        };

        let chunks = self.pack(questions, packing_base, cap, limits.max_input_tokens);

        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let chunk_chars: usize = chunk.iter().map(QuestionRecord::char_len).sum();
                Batch {
                    index,
                    questions: chunk,
                    student_answer_text: student_answer_text.to_string(),
                    estimated_input_tokens: self.estimator.estimate_chars(student_chars + chunk_chars),
                }
            })
            .collect())
    }

    fn pack(
        &self,
        questions: &[QuestionRecord],
        base_chars: usize,
        cap: usize,
        max_input_tokens: usize,
    ) -> Vec<Vec<QuestionRecord>> {
        let fits = |chars: usize| self.estimator.estimate_chars(base_chars + chars) <= max_input_tokens;

        // 为保持分区完整而提前换批时允许浪费的名额
        let target_batches = questions.len().div_ceil(cap);
        let mut slack = target_batches * cap - questions.len();

        let mut chunks: Vec<Vec<QuestionRecord>> = Vec::new();
        let mut current: Vec<QuestionRecord> = Vec::new();
        let mut current_chars = 0usize;

        for group in questions.chunk_by(|a, b| a.section == b.section) {
            let group_chars: usize = group.iter().map(QuestionRecord::char_len).sum();

            if !current.is_empty()
                && (current.len() + group.len() > cap || !fits(current_chars + group_chars))
                && group.len() <= cap
                && fits(group_chars)
            {
                let waste = cap - current.len();
                if waste <= slack {
                    debug!("分区 {} 整体移入新批次", group[0].section);
                    slack -= waste;
                    chunks.push(std::mem::take(&mut current));
                    current_chars = 0;
                }
            }

            for q in group {
                let q_chars = q.char_len();
                if !current.is_empty() && (current.len() >= cap || !fits(current_chars + q_chars)) {
                    chunks.push(std::mem::take(&mut current));
                    current_chars = 0;
                }
                current.push(q.clone());
                current_chars += q_chars;
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }
}
