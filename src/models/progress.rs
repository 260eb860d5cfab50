use serde::Serialize;

/// 评分流水线对外发出的进度事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    /// 批次开始评分
    BatchStarted {
        test_id: String,
        student_id: String,
        index: usize,
        total: usize,
    },
    /// 批次需要重试
    BatchRetrying {
        test_id: String,
        student_id: String,
        index: usize,
        attempt: u32,
        reason: String,
    },
    /// 批次评分完成
    BatchCompleted {
        test_id: String,
        student_id: String,
        index: usize,
        answers: usize,
    },
    /// 批次耗尽重试
    BatchFailed {
        test_id: String,
        student_id: String,
        index: usize,
        error: String,
    },
}
