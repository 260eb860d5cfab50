//! 结果合并服务 - 业务能力层
//!
//! 按批次下标（而不是完成顺序）把各批次的校验结果拼接成一个 `EvaluationResult`

use std::collections::BTreeMap;

use crate::models::{EvaluationResult, OverallPerformance, StudentInfo};
use crate::services::response_validator::ValidatedBatch;

/// 合并所有批次
///
/// `batches` 中的元素为 `(批次下标, 校验结果)`，顺序任意
pub fn merge(student: &StudentInfo, mut batches: Vec<(usize, ValidatedBatch)>) -> EvaluationResult {
    batches.sort_by_key(|(index, _)| *index);

    let student = resolve_student(student, &batches);

    let mut overall = OverallPerformance::default();
    let mut summaries: Vec<String> = Vec::new();
    let mut answers = Vec::new();

    for (_, batch) in batches {
        answers.extend(batch.answers);
        if let Some(perf) = batch.overall_performance {
            extend_unique(&mut overall.strengths, perf.strengths);
            extend_unique(&mut overall.areas_for_improvement, perf.areas_for_improvement);
            extend_unique(&mut overall.study_recommendations, perf.study_recommendations);
            let summary = perf.personalized_summary.trim();
            if !summary.is_empty() && !summaries.iter().any(|s| s == summary) {
                summaries.push(summary.to_string());
            }
        }
    }
    overall.personalized_summary = summaries.join(" ");

    let mut questions_by_section: BTreeMap<String, usize> = BTreeMap::new();
    for answer in &answers {
        *questions_by_section.entry(answer.section.clone()).or_default() += 1;
    }

    EvaluationResult {
        student_name: student.student_name,
        roll_no: student.roll_no,
        class: student.class,
        subject: student.subject,
        total_questions_detected: answers.len(),
        questions_by_section,
        answers,
        overall_performance: overall,
    }
}

/// 任务里的学生信息优先，空字段取第一个给出该字段的批次
fn resolve_student(student: &StudentInfo, batches: &[(usize, ValidatedBatch)]) -> StudentInfo {
    let reported: Vec<&StudentInfo> = batches.iter().filter_map(|(_, b)| b.student.as_ref()).collect();
    let pick = |own: &str, field: fn(&StudentInfo) -> &str| -> String {
        if !own.trim().is_empty() {
            return own.to_string();
        }
        reported
            .iter()
            .map(|info| field(info).trim())
            .find(|value| !value.is_empty())
            .unwrap_or_default()
            .to_string()
    };

    StudentInfo {
        student_name: pick(&student.student_name, |s| s.student_name.as_str()),
        roll_no: pick(&student.roll_no, |s| s.roll_no.as_str()),
        class: pick(&student.class, |s| s.class.as_str()),
        subject: pick(&student.subject, |s| s.subject.as_str()),
    }
}

fn extend_unique(target: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        let item = item.trim();
        if !item.is_empty() && !target.iter().any(|existing| existing == item) {
            target.push(item.to_string());
        }
    }
}
