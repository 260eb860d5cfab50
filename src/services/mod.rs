//! 业务能力层（Services）
//!
//! 每个服务只描述"我能做什么"，不关心调用顺序与重试：
//!
//! - `text_extractor` - 答题卡图片 → 带页标记的文本
//! - `token_estimator` - 字符数 → token 数
//! - `aligner` - 试卷 + 答案 → 题目记录
//! - `batch_planner` - 题目记录 → 批次
//! - `evaluation_requester` - 批次 → 模型原始输出
//! - `response_validator` - 模型原始输出 → 评分答案
//! - `merger` - 各批次结果 → 完整评分结果
//! - `persistence` - 评分记录写入

pub mod aligner;
pub mod batch_planner;
pub mod evaluation_requester;
pub mod llm_service;
pub mod merger;
pub mod persistence;
pub mod response_validator;
pub mod text_extractor;
pub mod token_estimator;

pub use aligner::{AlignedPaper, Aligner, AlignmentWarning, AlignmentWarningKind};
pub use batch_planner::BatchPlanner;
pub use evaluation_requester::{BatchEvaluator, EvaluationRequester};
pub use llm_service::{ChatProvider, ChatRequest, LlmService};
pub use merger::merge;
pub use persistence::{upsert_with_retry, EvaluationStore, FileStore, MemoryStore};
pub use response_validator::{ResponseValidator, ValidatedBatch};
pub use text_extractor::TextExtractor;
pub use token_estimator::TokenEstimator;
