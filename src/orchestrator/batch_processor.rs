//! 批量评分处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量评分任务的加载、并发与统计。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：校验配置、装配评分流水线
//! 2. **批量加载**：扫描并加载所有评分任务（`Vec<EvaluationJob>`）
//! 3. **并发控制**：使用 Semaphore 限制同时评分的学生数
//! 4. **进度汇报**：消费批次进度事件并写入日志
//! 5. **全局统计**：汇总所有学生的评分结果
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个学生的细节
//! - **向下委托**：委托 `EvaluationPipeline` 评分单个学生

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::models::{EvaluationJob, ProgressEvent};
use crate::orchestrator::pipeline::EvaluationPipeline;
use crate::utils::logging::{log_jobs_loaded, log_startup, print_final_stats};

/// 应用主结构
pub struct App {
    config: Config,
    pipeline: Arc<EvaluationPipeline>,
    progress_rx: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
}

/// 处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingStats {
    pub success: usize,
    pub failed: usize,
    pub total: usize,
}

impl App {
    /// 初始化应用
    pub fn initialize(config: Config) -> Result<Self> {
        config.validate().context("配置校验失败")?;

        log_startup(
            config.max_concurrent_students,
            config.max_concurrent_batches,
            &config.llm_model_name,
        );

        let pipeline = EvaluationPipeline::from_config(&config).context("评分流水线装配失败")?;
        Ok(Self::with_pipeline(config, pipeline))
    }

    /// 使用已装配好的流水线创建（测试或自定义存储时使用）
    pub fn with_pipeline(config: Config, pipeline: EvaluationPipeline) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            pipeline: Arc::new(pipeline.with_progress(tx)),
            progress_rx: Some(rx),
        }
    }

    /// 运行应用主逻辑
    pub async fn run(mut self) -> Result<ProcessingStats> {
        info!("\n📁 正在扫描待评分的任务...");
        let jobs = crate::models::load_all_jobs(&self.config.jobs_folder).await?;

        if jobs.is_empty() {
            warn!("⚠️ 没有找到待评分的TOML文件，程序结束");
            return Ok(ProcessingStats::default());
        }

        log_jobs_loaded(jobs.len(), self.config.max_concurrent_students);

        let reporter = self.progress_rx.take().map(|rx| tokio::spawn(report_progress(rx)));

        let stats = self.evaluate_all(jobs).await?;

        // 关闭发送端后进度任务才会退出
        drop(self.pipeline);
        if let Some(reporter) = reporter {
            let _ = reporter.await;
        }

        print_final_stats(stats.success, stats.failed, stats.total, &self.config.output_log_file);
        Ok(stats)
    }

    /// 并发评分所有学生
    pub async fn evaluate_all(&self, jobs: Vec<EvaluationJob>) -> Result<ProcessingStats> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_students.max(1)));
        let mut stats = ProcessingStats {
            total: jobs.len(),
            ..Default::default()
        };

        let mut handles = Vec::with_capacity(jobs.len());
        for (idx, job) in jobs.into_iter().enumerate() {
            let permit = semaphore.clone().acquire_owned().await?;
            let pipeline = self.pipeline.clone();
            let label = format!("[考试 {} 学生 {}]", job.test_id, job.student_id);

            let handle = tokio::spawn(async move {
                let _permit = permit;
                pipeline.evaluate(&job).await.map(|_| ())
            });
            handles.push((idx + 1, label, handle));
        }

        for (idx, label, handle) in handles {
            match handle.await {
                Ok(Ok(())) => stats.success += 1,
                Ok(Err(e)) => {
                    debug!("#{} {} 评分失败: {}", idx, label, e);
                    stats.failed += 1;
                }
                Err(e) => {
                    error!("#{} {} 任务执行失败: {}", idx, label, e);
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }
}

/// 把批次进度写入日志
async fn report_progress(mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        match &event {
            ProgressEvent::BatchRetrying {
                student_id,
                index,
                attempt,
                reason,
                ..
            } => debug!("[学生 {}] 批次 {} 第 {} 次尝试: {}", student_id, index + 1, attempt, reason),
            ProgressEvent::BatchFailed {
                student_id, index, error, ..
            } => debug!("[学生 {}] 批次 {} 失败: {}", student_id, index + 1, error),
            _ => {
                if let Ok(json) = serde_json::to_string(&event) {
                    debug!("进度: {}", json);
                }
            }
        }
    }
}
