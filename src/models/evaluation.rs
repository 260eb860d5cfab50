use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::question::QuestionKey;

/// 得分，序列化为 `[earned, possible]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score(pub f64, pub f64);

impl Score {
    pub fn earned(&self) -> f64 {
        self.0
    }

    pub fn possible(&self) -> f64 {
        self.1
    }

    pub fn is_full(&self) -> bool {
        self.0 >= self.1
    }
}

/// 单道题的评分结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedAnswer {
    pub question_no: u32,
    pub section: String,
    pub question: String,
    pub expected_answer: String,
    pub answer: String,
    pub raw_extracted_text: String,
    pub score: Score,
    pub remarks: String,
    pub confidence: f64,
    pub concepts: Vec<String>,
    pub missing_elements: Vec<String>,
    /// 与得分相互独立的匹配信号
    pub answer_matches: bool,
    pub personalized_feedback: String,
    pub alignment_notes: String,
}

impl GradedAnswer {
    pub fn key(&self) -> QuestionKey {
        QuestionKey::new(&self.section, self.question_no)
    }

    /// 在对齐备注后追加一条说明
    pub fn add_alignment_note(&mut self, note: &str) {
        if self.alignment_notes.trim().is_empty() {
            self.alignment_notes = note.to_string();
        } else {
            self.alignment_notes = format!("{} {}", self.alignment_notes.trim_end(), note);
        }
    }
}

/// 整体表现总结
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverallPerformance {
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub study_recommendations: Vec<String>,
    pub personalized_summary: String,
}

/// 学生基本信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentInfo {
    #[serde(alias = "student_name")]
    pub student_name: String,
    #[serde(alias = "roll_no")]
    pub roll_no: String,
    pub class: String,
    pub subject: String,
}

/// 一个学生的完整评分结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub student_name: String,
    pub roll_no: String,
    pub class: String,
    pub subject: String,
    pub total_questions_detected: usize,
    pub questions_by_section: BTreeMap<String, usize>,
    pub answers: Vec<GradedAnswer>,
    pub overall_performance: OverallPerformance,
}

impl EvaluationResult {
    /// 总得分与总分
    pub fn total_score(&self) -> Score {
        self.answers.iter().fold(Score(0.0, 0.0), |acc, answer| {
            Score(acc.0 + answer.score.earned(), acc.1 + answer.score.possible())
        })
    }

    /// 答案数、分区计数之和、识别题数三者一致
    pub fn is_consistent(&self) -> bool {
        let by_section: usize = self.questions_by_section.values().sum();
        self.answers.len() == by_section && by_section == self.total_questions_detected
    }
}
