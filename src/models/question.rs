use serde::{Deserialize, Serialize};
use std::fmt;

/// 没有显式分区时使用的隐式分区名
pub const MAIN_SECTION: &str = "Main Section";

/// 对齐后的题目记录
///
/// `(section, number)` 在一次评分内唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    /// 试卷上印刷的题号
    pub number: u32,
    pub section: String,
    pub text: String,
    /// 答案未匹配到时为空字符串
    #[serde(default)]
    pub expected_answer: String,
    pub max_marks: f64,
}

impl QuestionRecord {
    /// 题目唯一键
    pub fn key(&self) -> QuestionKey {
        QuestionKey::new(&self.section, self.number)
    }

    /// 题干与标准答案的字符数，用于 token 估算
    pub fn char_len(&self) -> usize {
        self.text.chars().count() + self.expected_answer.chars().count()
    }
}

/// 题目唯一键：分区 + 题号
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuestionKey {
    pub section: String,
    pub number: u32,
}

impl QuestionKey {
    pub fn new(section: &str, number: u32) -> Self {
        Self {
            section: section.to_string(),
            number,
        }
    }
}

impl fmt::Display for QuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.section, self.number)
    }
}

/// 学生答题卡中某道题的作答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAnswer {
    pub question_number: u32,
    pub section: String,
    /// 未经处理的 OCR 文本
    pub raw_extracted_text: String,
    /// 去除题号与多余空白后的作答
    pub answer_text: String,
}
