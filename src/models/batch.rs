use serde::{Deserialize, Serialize};

use super::question::QuestionRecord;

/// 批次规划限制
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    pub max_input_tokens: usize,
    pub max_output_tokens: usize,
    pub max_questions_per_batch: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_input_tokens: 12_000,
            max_output_tokens: 4_096,
            max_questions_per_batch: 20,
        }
    }
}

/// 一次 LLM 评分请求的题目子集
///
/// 学生作答原文不拆分，每个批次都携带全文
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// 在规划结果中的位置（从 0 开始），合并时以此排序
    pub index: usize,
    pub questions: Vec<QuestionRecord>,
    pub student_answer_text: String,
    pub estimated_input_tokens: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// 本批次涉及的分区（按出现顺序去重）
    pub fn sections(&self) -> Vec<&str> {
        let mut sections: Vec<&str> = Vec::new();
        for q in &self.questions {
            if !sections.contains(&q.section.as_str()) {
                sections.push(&q.section);
            }
        }
        sections
    }
}
