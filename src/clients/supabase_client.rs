/// Supabase 存储客户端
///
/// 通过 PostgREST 接口按 `(test_id, student_id)` upsert 评分记录
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::{AppError, AppResult, PersistenceError};
use crate::models::EvaluationRecord;
use crate::services::persistence::EvaluationStore;

/// Supabase 存储
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    api_key: String,
    table: String,
}

impl SupabaseStore {
    /// 创建新的 Supabase 存储
    ///
    /// 请求超时沿用 `request_timeout_secs`，超时按网络错误交给上层重试
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            api_key: config.supabase_key.clone(),
            table: config.supabase_table.clone(),
        })
    }

    /// upsert 请求地址
    pub fn endpoint(&self) -> String {
        format!(
            "{}/rest/v1/{}?on_conflict=test_id,student_id",
            self.base_url, self.table
        )
    }
}

#[async_trait]
impl EvaluationStore for SupabaseStore {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn upsert(&self, record: &EvaluationRecord) -> AppResult<()> {
        let url = self.endpoint();
        debug!(
            "写入 Supabase: {} (test={}, student={})",
            self.table, record.test_id, record.student_id
        );

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(record)
            .send()
            .await
            .map_err(|e| AppError::persistence_request_failed(&self.table, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Supabase 写入失败: status={}, body={}", status, body);
            return Err(PersistenceError::BadStatus {
                target: self.table.clone(),
                status: status.as_u16(),
                body,
            }
            .into());
        }

        Ok(())
    }
}
