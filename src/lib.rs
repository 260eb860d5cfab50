//! # GradeLab Eval
//!
//! 答题卡自动评分流水线：试卷、标准答案和学生答题卡的 OCR 文本进，
//! 逐题评分结果（得分、评语、置信度、考查知识点、对齐说明）出。
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 外部服务层（Clients）
//! - `clients/` - 与外部服务通信
//! - `SupabaseStore` - PostgREST upsert 评分记录
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，每个服务只处理一件事
//! - `Aligner` - 试卷与答案对齐（可插拔的分区/题号识别策略）
//! - `BatchPlanner` - 按 token 预算切分批次
//! - `EvaluationRequester` - 构建提示词并调用模型
//! - `ResponseValidator` / `merge` - 解析、修正、合并模型输出
//! - `TextExtractor` - 答题卡图片文字识别
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个批次"的完整评分流程
//! - `EvaluationCtx` - 上下文封装（test_id + student_id）
//! - `BatchFlow` - 请求 → 校验 → 按失败类型重试
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/pipeline` - 单个学生评分流水线，批次并发与结果合并
//! - `orchestrator/batch_processor` - 批量评分处理器，管理学生并发与统计
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{Config, RetryPolicy};
pub use error::{AppError, AppResult};
pub use models::{EvaluationJob, EvaluationRecord, EvaluationResult, GradedAnswer, ProgressEvent, QuestionRecord};
pub use orchestrator::{App, EvaluationPipeline, ProcessingStats};
pub use services::{Aligner, BatchEvaluator, BatchPlanner, ChatProvider, EvaluationStore};
pub use workflow::{BatchFlow, EvaluationCtx};
