//! 单个学生评分流水线 - 编排层
//!
//! ## 职责
//!
//! 本模块负责一个学生的完整评分，是学生级别的编排器。
//!
//! ## 核心流程
//!
//! 1. **准备文档**：读取文本，答题卡图片先做文字识别
//! 2. **状态标记**：写入 `processing` 记录
//! 3. **题目对齐**：试卷 + 答案 → 题目记录
//! 4. **批次规划**：按 token 与题目数切分批次
//! 5. **并发评分**：Semaphore 限制同时在途的批次数，全部批次结束后再汇总
//! 6. **合并写入**：任一批次失败则整体失败，否则按批次下标合并后写入 `completed`

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::clients::SupabaseStore;
use crate::config::{Config, RetryPolicy};
use crate::error::{AppError, AppResult, ConfigError};
use crate::models::loaders::read_document_text;
use crate::models::{
    BatchLimits, DocumentSource, EvaluationJob, EvaluationRecord, EvaluationResult, ProgressEvent,
};
use crate::services::{
    merge, upsert_with_retry, Aligner, BatchEvaluator, BatchPlanner, EvaluationRequester, EvaluationStore,
    FileStore, LlmService, ResponseValidator, TextExtractor, TokenEstimator, ValidatedBatch,
};
use crate::utils::logging::log_plan;
use crate::workflow::{BatchFlow, EvaluationCtx};

/// 单个学生的评分流水线
///
/// 不持有任何全局可变状态，同一个实例可以被多个学生任务共享
pub struct EvaluationPipeline {
    aligner: Aligner,
    planner: BatchPlanner,
    limits: BatchLimits,
    evaluator: Arc<dyn BatchEvaluator>,
    extractor: Option<TextExtractor>,
    store: Arc<dyn EvaluationStore>,
    policy: RetryPolicy,
    max_concurrent_batches: usize,
    persistence_attempts: u32,
    progress: Option<UnboundedSender<ProgressEvent>>,
}

impl EvaluationPipeline {
    /// 使用给定的评分器与存储创建
    pub fn new(config: &Config, evaluator: Arc<dyn BatchEvaluator>, store: Arc<dyn EvaluationStore>) -> Self {
        Self {
            aligner: Aligner::new(config.default_max_marks),
            planner: BatchPlanner::new(
                TokenEstimator::new(config.tokens_per_char),
                config.output_tokens_per_question,
            ),
            limits: config.batch_limits(),
            evaluator,
            extractor: None,
            store,
            policy: config.retry_policy(),
            max_concurrent_batches: config.max_concurrent_batches.max(1),
            persistence_attempts: config.persistence_attempts,
            progress: None,
        }
    }

    /// 生产环境装配：LLM 评分 + 视觉识别 + Supabase/文件存储
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let grader: Arc<LlmService> = Arc::new(LlmService::new(config));
        let evaluator = Arc::new(EvaluationRequester::new(
            grader,
            config.request_timeout(),
            config.max_output_tokens,
        ));
        let vision = Arc::new(LlmService::with_model(config, config.vision_model_name.clone()));

        let store: Arc<dyn EvaluationStore> = if config.uses_supabase() {
            Arc::new(SupabaseStore::new(config)?)
        } else {
            Arc::new(FileStore::new(&config.output_dir))
        };

        let extractor = TextExtractor::new(vision, config.request_timeout(), config.retry_policy());

        Ok(Self::new(config, evaluator, store).with_extractor(extractor))
    }

    pub fn with_extractor(mut self, extractor: TextExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// 订阅批次进度事件
    pub fn with_progress(mut self, progress: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// 评分一个学生
    ///
    /// 成功与失败都会写入记录；失败时不保留任何部分结果。
    /// 重新评分只需再次调用本方法。
    pub async fn evaluate(&self, job: &EvaluationJob) -> AppResult<EvaluationResult> {
        let ctx = EvaluationCtx::from_job(job);
        info!("{} 🚀 开始评分", ctx);

        self.persist(&EvaluationRecord::processing(&job.test_id, &job.student_id))
            .await?;

        match self.run(job, &ctx).await {
            Ok(result) => {
                let total = result.total_score();
                self.persist(&EvaluationRecord::completed(&job.test_id, &job.student_id, result.clone()))
                    .await?;
                info!(
                    "{} ✅ 评分完成: {} 道题, 得分 {}/{}",
                    ctx,
                    result.total_questions_detected,
                    total.earned(),
                    total.possible()
                );
                Ok(result)
            }
            Err(e) => {
                error!("{} ❌ 评分失败: {}", ctx, e);
                let failed = EvaluationRecord::failed(&job.test_id, &job.student_id, e.to_string());
                if let Err(persist_err) = self.persist(&failed).await {
                    error!("{} 失败状态写入失败: {}", ctx, persist_err);
                }
                Err(e)
            }
        }
    }

    async fn run(&self, job: &EvaluationJob, ctx: &EvaluationCtx) -> AppResult<EvaluationResult> {
        let question_paper = self.resolve_document(&job.question_paper, ctx).await?;
        let answer_key = self.resolve_document(&job.answer_key, ctx).await?;
        let answer_sheet = self.resolve_document(&job.answer_sheet, ctx).await?;

        // ========== 对齐 ==========
        let aligned = self.aligner.align(&question_paper, &answer_key)?;
        for warning in &aligned.warnings {
            warn!("{} ⚠️ {}", ctx, warning.message);
        }
        let segments = self
            .aligner
            .segment_student_answers(&answer_sheet, &aligned.questions);

        // ========== 规划 ==========
        let batches = self
            .planner
            .plan(&aligned.questions, &answer_sheet, &self.limits)?;
        log_plan(
            &ctx.to_string(),
            aligned.questions.len(),
            batches.len(),
            self.planner
                .estimate_input_tokens(&aligned.questions, &answer_sheet),
        );

        // ========== 并发评分 ==========
        let flow = BatchFlow::new(
            self.evaluator.clone(),
            Arc::new(ResponseValidator::new(segments)),
            self.policy.clone(),
            self.progress.clone(),
        );
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_batches));
        let total = batches.len();
        let mut handles = Vec::with_capacity(total);

        for batch in batches {
            let semaphore = semaphore.clone();
            let flow = flow.clone();
            let ctx = ctx.clone();
            let index = batch.index;

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| AppError::Other(format!("批次并发控制已关闭: {}", e)))?;
                flow.run(&batch, total, &ctx).await
            });
            handles.push((index, handle));
        }

        // 等待所有批次结束，不做跨批次取消
        let mut completed: Vec<(usize, ValidatedBatch)> = Vec::with_capacity(total);
        let mut first_error: Option<AppError> = None;
        for (index, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(AppError::BatchFailed {
                    index,
                    source: Box::new(AppError::Other(format!("任务执行失败: {}", e))),
                }),
            };
            match outcome {
                Ok(validated) => completed.push((index, validated)),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let result = merge(&job.student, completed);
        debug_assert!(result.is_consistent());
        Ok(result)
    }

    /// 读取文档文本，图片页交给文字识别
    async fn resolve_document(&self, source: &DocumentSource, ctx: &EvaluationCtx) -> AppResult<String> {
        if let DocumentSource::Pages { pages } = source {
            let extractor = self.extractor.as_ref().ok_or_else(|| ConfigError::MissingValue {
                var_name: "VISION_MODEL_NAME".to_string(),
            })?;
            info!("{} 📷 识别 {} 页答题卡图片", ctx, pages.len());
            return extractor.extract_pages(pages).await;
        }

        read_document_text(source)
            .await
            .map_err(|e| AppError::Other(format!("{:#}", e)))?
            .ok_or_else(|| AppError::Other("文档没有可读取的文本".to_string()))
    }

    async fn persist(&self, record: &EvaluationRecord) -> AppResult<()> {
        upsert_with_retry(self.store.as_ref(), record, self.persistence_attempts, &self.policy).await
    }
}
