use crate::models::job::{DocumentSource, EvaluationJob};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 从 TOML 文件加载评分任务
///
/// 文档中的相对路径以任务文件所在目录为基准
pub async fn load_job(toml_file_path: &Path) -> Result<EvaluationJob> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    let mut job: EvaluationJob = toml::from_str(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))?;

    let base_dir = toml_file_path.parent().unwrap_or_else(|| Path::new("."));
    for source in [
        &mut job.question_paper,
        &mut job.answer_key,
        &mut job.answer_sheet,
    ] {
        resolve_relative_path(source, base_dir);
    }

    Ok(job)
}

fn resolve_relative_path(source: &mut DocumentSource, base_dir: &Path) {
    if let DocumentSource::File { path } = source {
        let candidate = PathBuf::from(path.as_str());
        if candidate.is_relative() {
            *path = base_dir.join(candidate).to_string_lossy().to_string();
        }
    }
}

/// 从文件夹中加载所有任务文件，按文件名排序
pub async fn load_all_jobs(folder_path: &str) -> Result<Vec<EvaluationJob>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut toml_files = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml_files.push(path);
        }
    }
    toml_files.sort();

    let mut jobs = Vec::new();
    for path in toml_files {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_job(&path).await {
            Ok(job) => {
                tracing::info!("成功加载任务: 考试 {} / 学生 {}", job.test_id, job.student_id);
                jobs.push(job);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(jobs)
}

/// 读取文本类文档；页面图片返回 `None`，需要交给文字识别
pub async fn read_document_text(source: &DocumentSource) -> Result<Option<String>> {
    match source {
        DocumentSource::Text { text } => Ok(Some(text.clone())),
        DocumentSource::File { path } => {
            let text = fs::read_to_string(path)
                .await
                .with_context(|| format!("无法读取文档: {}", path))?;
            Ok(Some(text))
        }
        DocumentSource::Pages { .. } => Ok(None),
    }
}
