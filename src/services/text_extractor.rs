//! 文字识别服务 - 业务能力层
//!
//! 逐页调用视觉模型识别答题卡图片，结果带 `=== PAGE N ===` 页标记按页码拼接。
//! 单页请求有超时，网络/超时错误按指数退避重试；
//! 重试耗尽的页写入占位说明，全部页面都失败时整份识别失败。

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use crate::config::RetryPolicy;
use crate::error::{AppError, AppResult, LlmError, RetryClass};
use crate::services::llm_service::{ChatProvider, ChatRequest};

const EXTRACTION_PROMPT: &str = "Transcribe all handwritten and printed text on this answer sheet page exactly as written. \
Keep question numbers, line breaks and mathematical symbols (such as ±, √, ², π). \
Do not correct mistakes, do not summarise, and output plain text only.";

/// 页标记
pub fn page_tag(page_number: usize) -> String {
    format!("=== PAGE {} ===", page_number)
}

/// 文字识别器
pub struct TextExtractor {
    provider: Arc<dyn ChatProvider>,
    timeout: Duration,
    policy: RetryPolicy,
    max_tokens: u32,
}

impl TextExtractor {
    pub fn new(provider: Arc<dyn ChatProvider>, timeout: Duration, policy: RetryPolicy) -> Self {
        Self {
            provider,
            timeout,
            policy,
            max_tokens: 4096,
        }
    }

    /// 识别所有页面，页码从 1 开始
    ///
    /// 没有任何一页识别成功时返回 `AppError::ExtractionFailed`
    pub async fn extract_pages(&self, page_urls: &[String]) -> AppResult<String> {
        info!("🔍 开始识别 {} 页图片 (模型: {})", page_urls.len(), self.provider.model_name());

        let tasks = page_urls
            .iter()
            .enumerate()
            .map(|(i, url)| self.extract_page(i + 1, url));
        let pages = join_all(tasks).await;

        let succeeded = pages.iter().filter(|p| p.is_ok()).count();
        if succeeded == 0 {
            let reason = pages
                .iter()
                .find_map(|p| p.as_ref().err().map(|e| e.to_string()))
                .unwrap_or_else(|| "没有可识别的页面".to_string());
            return Err(AppError::ExtractionFailed {
                pages: page_urls.len(),
                reason,
            });
        }
        if succeeded < pages.len() {
            warn!("⚠️ {}/{} 页识别成功", succeeded, pages.len());
        }

        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(i, page)| {
                let body = match page {
                    Ok(text) => text.trim().to_string(),
                    Err(e) => format!("[Text extraction failed for page {}: {}]", i + 1, e),
                };
                format!("{}\n{}", page_tag(i + 1), body)
            })
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    async fn extract_page(&self, page_number: usize, url: &str) -> AppResult<String> {
        let mut attempt: u32 = 1;

        loop {
            match self.request_page(url).await {
                Ok(text) => return Ok(text),
                Err(e) if e.retry_class() == RetryClass::Network && attempt < self.policy.network_attempts => {
                    let delay = self.policy.backoff(attempt);
                    attempt += 1;
                    warn!("第 {} 页识别第 {} 次尝试前重试: {}", page_number, attempt, e);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    warn!("第 {} 页识别失败: {}", page_number, e);
                    return Err(e);
                }
            }
        }
    }

    async fn request_page(&self, url: &str) -> AppResult<String> {
        let request = ChatRequest::new(EXTRACTION_PROMPT)
            .with_images(vec![url.to_string()])
            .with_max_tokens(self.max_tokens);

        match tokio::time::timeout(self.timeout, self.provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout {
                model: self.provider.model_name().to_string(),
                secs: self.timeout.as_secs(),
            }
            .into()),
        }
    }
}
