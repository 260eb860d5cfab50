//! 批次评分流程 - 流程层
//!
//! 核心职责：定义"一个批次"的完整评分流程
//!
//! 流程顺序：
//! 1. 请求模型评分
//! 2. 校验并修正响应
//! 3. 按失败类型决定是否重试：
//!    - 结构错误：最多再试 `schema_retries` 次
//!    - 覆盖不全：最多再试 `coverage_retries` 次
//!    - 网络/超时：指数退避，最多 `network_attempts` 次
//!    - 其他错误：不重试

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};

use crate::config::RetryPolicy;
use crate::error::{AppError, AppResult, RetryClass};
use crate::models::{Batch, ProgressEvent};
use crate::services::{BatchEvaluator, ResponseValidator, ValidatedBatch};
use crate::utils::logging::{log_batch_complete, log_batch_start};
use crate::workflow::evaluation_ctx::EvaluationCtx;

/// 批次评分流程
///
/// - 编排"请求 → 校验 → 重试"
/// - 不持有任何批次之外的状态，可以克隆到并发任务中
#[derive(Clone)]
pub struct BatchFlow {
    evaluator: Arc<dyn BatchEvaluator>,
    validator: Arc<ResponseValidator>,
    policy: RetryPolicy,
    progress: Option<UnboundedSender<ProgressEvent>>,
}

/// 各类失败已用掉的次数
#[derive(Debug, Default)]
struct Failures {
    schema: u32,
    coverage: u32,
    network: u32,
}

impl BatchFlow {
    /// 创建新的批次评分流程
    pub fn new(
        evaluator: Arc<dyn BatchEvaluator>,
        validator: Arc<ResponseValidator>,
        policy: RetryPolicy,
        progress: Option<UnboundedSender<ProgressEvent>>,
    ) -> Self {
        Self {
            evaluator,
            validator,
            policy,
            progress,
        }
    }

    /// 评分一个批次
    ///
    /// 耗尽重试后返回 `AppError::BatchFailed`
    pub async fn run(&self, batch: &Batch, total: usize, ctx: &EvaluationCtx) -> AppResult<ValidatedBatch> {
        let label = ctx.to_string();
        log_batch_start(&label, batch.index + 1, total, batch.len());
        self.emit(ctx.batch_started(batch.index, total));

        let mut failures = Failures::default();
        let mut attempt: u32 = 1;

        loop {
            match self.attempt(batch).await {
                Ok(validated) => {
                    log_batch_complete(&label, batch.index + 1, total, validated.answers.len());
                    self.emit(ctx.batch_completed(batch.index, validated.answers.len()));
                    return Ok(validated);
                }
                Err(e) => {
                    let Some(delay) = self.next_delay(&e, &mut failures) else {
                        error!("{} ❌ 第 {}/{} 批评分失败: {}", label, batch.index + 1, total, e);
                        self.emit(ctx.batch_failed(batch.index, e.to_string()));
                        return Err(AppError::BatchFailed {
                            index: batch.index,
                            source: Box::new(e),
                        });
                    };

                    attempt += 1;
                    warn!(
                        "{} ⚠️ 第 {}/{} 批第 {} 次尝试前重试: {}",
                        label,
                        batch.index + 1,
                        total,
                        attempt,
                        e
                    );
                    self.emit(ctx.batch_retrying(batch.index, attempt, e.to_string()));
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn attempt(&self, batch: &Batch) -> AppResult<ValidatedBatch> {
        let raw = self.evaluator.evaluate(batch).await?;
        Ok(self.validator.validate(&raw, &batch.questions)?)
    }

    /// 还能重试时返回等待时间
    fn next_delay(&self, err: &AppError, failures: &mut Failures) -> Option<Duration> {
        match err.retry_class() {
            RetryClass::Schema => {
                failures.schema += 1;
                (failures.schema <= self.policy.schema_retries).then_some(Duration::ZERO)
            }
            RetryClass::Coverage => {
                failures.coverage += 1;
                (failures.coverage <= self.policy.coverage_retries).then_some(Duration::ZERO)
            }
            RetryClass::Network => {
                failures.network += 1;
                (failures.network < self.policy.network_attempts).then(|| self.policy.backoff(failures.network))
            }
            RetryClass::Fatal => None,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            // 接收端已关闭时静默丢弃
            let _ = tx.send(event);
        }
    }
}
