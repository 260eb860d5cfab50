//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量评分和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量评分处理器
//! - 管理应用生命周期（初始化、运行）
//! - 批量加载评分任务（Vec<EvaluationJob>）
//! - 控制学生并发数量（Semaphore）
//! - 消费进度事件，输出全局统计信息
//!
//! ### `pipeline` - 单个学生评分流水线
//! - 文档准备、对齐、批次规划
//! - 批次并发评分（Semaphore + tokio::spawn）
//! - 合并结果并写入记录
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<EvaluationJob>)
//!     ↓
//! pipeline (处理 Vec<Batch>)
//!     ↓
//! workflow::BatchFlow (处理单个 Batch)
//!     ↓
//! services (能力层：aligner / planner / requester / validator / store)
//!     ↓
//! clients (外部服务：Supabase)
//! ```

pub mod batch_processor;
pub mod pipeline;

// 重新导出主要类型
pub use batch_processor::{App, ProcessingStats};
pub use pipeline::EvaluationPipeline;
