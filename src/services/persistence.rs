//! 持久化服务 - 业务能力层
//!
//! 评分记录按 `(test_id, student_id)` 覆盖写入，后写入者生效。
//!
//! - `FileStore`：每个学生一个 JSON 文件
//! - `MemoryStore`：进程内存储，测试与试运行使用
//! - `SupabaseStore`：见 `clients::supabase_client`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{AppError, AppResult, RetryClass};
use crate::models::EvaluationRecord;

/// 评分记录存储接口
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    /// 存储名称（仅用于日志）
    fn name(&self) -> &str;

    async fn upsert(&self, record: &EvaluationRecord) -> AppResult<()>;
}

/// 带重试的写入
///
/// 只有网络类错误会重试，退避时间与批次重试共用同一套策略
pub async fn upsert_with_retry(
    store: &dyn EvaluationStore,
    record: &EvaluationRecord,
    attempts: u32,
    policy: &RetryPolicy,
) -> AppResult<()> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match store.upsert(record).await {
            Ok(()) => {
                debug!(
                    "记录已写入 {} (test={}, student={}, status={:?})",
                    store.name(),
                    record.test_id,
                    record.student_id,
                    record.status
                );
                return Ok(());
            }
            Err(e) if e.retry_class() == RetryClass::Network && attempt < attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "写入 {} 失败 (第 {}/{} 次): {}，{:?} 后重试",
                    store.name(),
                    attempt,
                    attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// 文件存储
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 记录对应的文件路径
    pub fn path_for(&self, test_id: &str, student_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}__{}.json", sanitize(test_id), sanitize(student_id)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl EvaluationStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn upsert(&self, record: &EvaluationRecord) -> AppResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::file_write_failed(self.dir.display().to_string(), e))?;

        let path = self.path_for(&record.test_id, &record.student_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(record)?;

        // 先写临时文件再改名，读者不会看到写了一半的记录
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| AppError::file_write_failed(tmp.display().to_string(), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

        Ok(())
    }
}

/// 内存存储
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, String), EvaluationRecord>>,
    history: Mutex<Vec<EvaluationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, test_id: &str, student_id: &str) -> Option<EvaluationRecord> {
        self.records
            .lock()
            .ok()?
            .get(&(test_id.to_string(), student_id.to_string()))
            .cloned()
    }

    /// 按写入顺序返回所有写入过的记录
    pub fn history(&self) -> Vec<EvaluationRecord> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EvaluationStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, record: &EvaluationRecord) -> AppResult<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::Other("内存存储锁已损坏".to_string()))?;
        records.insert(record.key(), record.clone());
        drop(records);

        if let Ok(mut history) = self.history.lock() {
            history.push(record.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;
    use crate::models::EvaluationStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_memory_store_last_write_wins() {
        let store = MemoryStore::new();
        store.upsert(&EvaluationRecord::processing("t1", "s1")).await.unwrap();
        store
            .upsert(&EvaluationRecord::failed("t1", "s1", "批次 0 评分失败"))
            .await
            .unwrap();

        let record = store.get("t1", "s1").unwrap();
        assert_eq!(record.status, EvaluationStatus::Failed);
        assert_eq!(store.history().len(), 2);
        assert!(store.get("t1", "s2").is_none());
    }

    #[tokio::test]
    async fn test_file_store_replaces_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("evaluations"));

        store.upsert(&EvaluationRecord::processing("mid-term", "s/42")).await.unwrap();
        store
            .upsert(&EvaluationRecord::failed("mid-term", "s/42", "boom"))
            .await
            .unwrap();

        let path = store.path_for("mid-term", "s/42");
        assert!(path.ends_with("mid-term__s_42.json"));
        let saved: EvaluationRecord = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.status, EvaluationStatus::Failed);
        assert_eq!(saved.error.as_deref(), Some("boom"));
    }

    struct FlakyStore {
        failures: AtomicU32,
        calls: AtomicU32,
        status: u16,
    }

    #[async_trait]
    impl EvaluationStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn upsert(&self, _record: &EvaluationRecord) -> AppResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(PersistenceError::BadStatus {
                    target: "test_answers".to_string(),
                    status: self.status,
                    body: String::new(),
                }
                .into());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_server_errors() {
        let store = FlakyStore {
            failures: AtomicU32::new(4),
            calls: AtomicU32::new(0),
            status: 503,
        };
        let record = EvaluationRecord::processing("t1", "s1");
        upsert_with_retry(&store, &record, 5, &RetryPolicy::immediate())
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        let store = FlakyStore {
            failures: AtomicU32::new(10),
            calls: AtomicU32::new(0),
            status: 503,
        };
        let record = EvaluationRecord::processing("t1", "s1");
        assert!(upsert_with_retry(&store, &record, 3, &RetryPolicy::immediate())
            .await
            .is_err());
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let store = FlakyStore {
            failures: AtomicU32::new(1),
            calls: AtomicU32::new(0),
            status: 400,
        };
        let record = EvaluationRecord::processing("t1", "s1");
        assert!(upsert_with_retry(&store, &record, 5, &RetryPolicy::immediate())
            .await
            .is_err());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}
