use serde::{Deserialize, Serialize};

use super::evaluation::StudentInfo;

/// 文档来源：直接给出文本、文本文件或需要识别的页面图片
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentSource {
    Text { text: String },
    File { path: String },
    Pages { pages: Vec<String> },
}

impl DocumentSource {
    /// 是否需要先经过文字识别
    pub fn needs_extraction(&self) -> bool {
        matches!(self, DocumentSource::Pages { .. })
    }
}

/// 一个学生的评分任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationJob {
    pub test_id: String,
    pub student_id: String,
    #[serde(default)]
    pub student: StudentInfo,
    pub question_paper: DocumentSource,
    pub answer_key: DocumentSource,
    pub answer_sheet: DocumentSource,
}

impl EvaluationJob {
    /// 直接以文本构造任务
    pub fn from_texts(
        test_id: impl Into<String>,
        student_id: impl Into<String>,
        student: StudentInfo,
        question_paper: impl Into<String>,
        answer_key: impl Into<String>,
        answer_sheet: impl Into<String>,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            student_id: student_id.into(),
            student,
            question_paper: DocumentSource::Text { text: question_paper.into() },
            answer_key: DocumentSource::Text { text: answer_key.into() },
            answer_sheet: DocumentSource::Text { text: answer_sheet.into() },
        }
    }
}
