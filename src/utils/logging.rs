/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use anyhow::Result;
use std::fs::{self, File, OpenOptions};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// 初始化 tracing
///
/// 控制台与日志文件各一个输出层；`RUST_LOG` 优先于 `verbose`。
/// 日志文件先写入文件头，再以追加方式交给输出层
pub fn init(verbose: bool, log_file_path: Option<&str>) -> Result<()> {
    let default_level = if verbose { "gradelab_eval=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_file_path {
        Some(path) => {
            let file = open_log_file(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()?;

    Ok(())
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n答题卡评分日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 写入文件头后以追加方式打开日志文件
pub fn open_log_file(log_file_path: &str) -> Result<File> {
    init_log_file(log_file_path)?;
    Ok(OpenOptions::new().create(true).append(true).open(log_file_path)?)
}

/// 记录程序启动信息
pub fn log_startup(max_concurrent_students: usize, max_concurrent_batches: usize, model: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 答题卡批量评分模式");
    info!("📊 学生并发数: {} | 批次并发数: {}", max_concurrent_students, max_concurrent_batches);
    info!("🤖 评分模型: {}", model);
    info!("{}", "=".repeat(60));
}

/// 记录任务加载信息
pub fn log_jobs_loaded(total: usize, max_concurrent: usize) {
    info!("✓ 找到 {} 个待评分的学生", total);
    info!("📋 最多同时评分 {} 个学生\n", max_concurrent);
}

/// 记录批次规划信息
pub fn log_plan(label: &str, questions: usize, batches: usize, estimated_tokens: usize) {
    info!(
        "{} 📦 共 {} 道题, 规划为 {} 个批次 (预估输入 {} tokens)",
        label, questions, batches, estimated_tokens
    );
}

/// 记录批次开始信息
pub fn log_batch_start(label: &str, batch_num: usize, total_batches: usize, questions: usize) {
    info!(
        "{} ▶ 开始评分第 {}/{} 批 ({} 道题)",
        label, batch_num, total_batches, questions
    );
}

/// 记录批次完成信息
pub fn log_batch_complete(label: &str, batch_num: usize, total_batches: usize, answers: usize) {
    info!(
        "{} ✓ 第 {}/{} 批完成: {} 道题已评分",
        label, batch_num, total_batches, answers
    );
}

/// 打印最终统计信息
pub fn print_final_stats(success: usize, failed: usize, total: usize, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部评分完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", success, total);
    info!("❌ 失败: {}", failed);
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大字符数
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("x = ±3 because", 6), "x = ±3...");
    }

    #[test]
    fn test_init_log_file_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        init_log_file(&path.to_string_lossy()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("答题卡评分日志"));
    }

    #[test]
    fn test_log_writer_keeps_header() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        std::fs::write(&path, "stale run\n").unwrap();

        let mut file = open_log_file(&path.to_string_lossy()).unwrap();
        writeln!(file, "🚀 程序启动").unwrap();
        drop(file);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("stale run"));
        assert!(content.starts_with(&"=".repeat(60)));
        assert!(content.ends_with("🚀 程序启动\n"));
    }
}
