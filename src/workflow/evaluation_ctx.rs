//! 评分上下文
//!
//! 封装"我正在评哪场考试的哪个学生"这一信息

use std::fmt::Display;

use crate::models::{EvaluationJob, ProgressEvent};

/// 评分上下文
#[derive(Debug, Clone)]
pub struct EvaluationCtx {
    /// 考试ID
    pub test_id: String,

    /// 学生ID
    pub student_id: String,
}

impl EvaluationCtx {
    /// 创建新的评分上下文
    pub fn new(test_id: impl Into<String>, student_id: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            student_id: student_id.into(),
        }
    }

    pub fn from_job(job: &EvaluationJob) -> Self {
        Self::new(&job.test_id, &job.student_id)
    }

    pub fn batch_started(&self, index: usize, total: usize) -> ProgressEvent {
        ProgressEvent::BatchStarted {
            test_id: self.test_id.clone(),
            student_id: self.student_id.clone(),
            index,
            total,
        }
    }

    pub fn batch_retrying(&self, index: usize, attempt: u32, reason: String) -> ProgressEvent {
        ProgressEvent::BatchRetrying {
            test_id: self.test_id.clone(),
            student_id: self.student_id.clone(),
            index,
            attempt,
            reason,
        }
    }

    pub fn batch_completed(&self, index: usize, answers: usize) -> ProgressEvent {
        ProgressEvent::BatchCompleted {
            test_id: self.test_id.clone(),
            student_id: self.student_id.clone(),
            index,
            answers,
        }
    }

    pub fn batch_failed(&self, index: usize, error: String) -> ProgressEvent {
        ProgressEvent::BatchFailed {
            test_id: self.test_id.clone(),
            student_id: self.student_id.clone(),
            index,
            error,
        }
    }
}

impl Display for EvaluationCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[考试 {} 学生 {}]", self.test_id, self.student_id)
    }
}
