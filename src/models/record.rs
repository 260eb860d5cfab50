use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::evaluation::EvaluationResult;

/// 评分状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    Processing,
    Completed,
    Failed,
}

/// 持久化记录，以 `(test_id, student_id)` 为键整体覆盖写入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub test_id: String,
    pub student_id: String,
    pub status: EvaluationStatus,
    pub score: Option<f64>,
    pub evaluation_result: Option<EvaluationResult>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl EvaluationRecord {
    pub fn processing(test_id: &str, student_id: &str) -> Self {
        Self {
            test_id: test_id.to_string(),
            student_id: student_id.to_string(),
            status: EvaluationStatus::Processing,
            score: None,
            evaluation_result: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn completed(test_id: &str, student_id: &str, result: EvaluationResult) -> Self {
        Self {
            test_id: test_id.to_string(),
            student_id: student_id.to_string(),
            status: EvaluationStatus::Completed,
            score: Some(result.total_score().earned()),
            evaluation_result: Some(result),
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn failed(test_id: &str, student_id: &str, error: impl Into<String>) -> Self {
        Self {
            test_id: test_id.to_string(),
            student_id: student_id.to_string(),
            status: EvaluationStatus::Failed,
            score: None,
            evaluation_result: None,
            error: Some(error.into()),
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.test_id.clone(), self.student_id.clone())
    }
}
