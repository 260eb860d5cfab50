//! 题目/答案对齐服务 - 业务能力层
//!
//! 把试卷 OCR 文本和答案 OCR 文本解析为统一的题目记录列表。
//! 分区识别与题目边界识别都是可插拔策略，按优先级依次尝试：
//!
//! - 分区：`LetteredSectionDetector` → `ImplicitSectionDetector`
//! - 边界：数字 → `Q` 前缀 → 罗马数字 → 字母
//!
//! 第一个分区标题之前的文字视为卷首说明，不参与解析。

pub mod boundary_detector;
pub mod section_detector;

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::{AlignmentError, AppResult};
use crate::models::{QuestionKey, QuestionRecord, StudentAnswer};

pub use boundary_detector::{
    LetteredBoundaryDetector, NumericBoundaryDetector, PrefixedBoundaryDetector, QuestionBoundaryDetector,
    QuestionSpan, RomanBoundaryDetector,
};
pub use section_detector::{ImplicitSectionDetector, LetteredSectionDetector, SectionDetector, SectionHeader};

/// 对齐警告类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentWarningKind {
    /// 答案中找不到该题
    MissingAnswer,
    /// 试卷中同一分区出现重复题号
    DuplicateQuestion,
    /// 答案中同一分区出现重复题号
    DuplicateAnswer,
    /// 识别到的题目数与分区说明不一致
    CountMismatch,
}

/// 对齐过程中的非致命问题
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentWarning {
    pub section: String,
    pub number: Option<u32>,
    pub kind: AlignmentWarningKind,
    pub message: String,
}

/// 对齐结果
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPaper {
    pub questions: Vec<QuestionRecord>,
    pub warnings: Vec<AlignmentWarning>,
}

impl AlignedPaper {
    pub fn warnings_of(&self, kind: AlignmentWarningKind) -> impl Iterator<Item = &AlignmentWarning> {
        self.warnings.iter().filter(move |w| w.kind == kind)
    }
}

/// 解析后的一个分区
#[derive(Debug, Clone)]
struct ParsedSection {
    header: SectionHeader,
    spans: Vec<QuestionSpan>,
}

/// 题目/答案对齐服务
pub struct Aligner {
    section_detectors: Vec<Box<dyn SectionDetector>>,
    boundary_detectors: Vec<Box<dyn QuestionBoundaryDetector>>,
    default_max_marks: f64,
}

impl Default for Aligner {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Aligner {
    /// 使用内置策略创建
    pub fn new(default_max_marks: f64) -> Self {
        Self::with_strategies(
            vec![Box::new(LetteredSectionDetector), Box::new(ImplicitSectionDetector)],
            vec![
                Box::new(NumericBoundaryDetector),
                Box::new(PrefixedBoundaryDetector),
                Box::new(RomanBoundaryDetector),
                Box::new(LetteredBoundaryDetector),
            ],
            default_max_marks,
        )
    }

    /// 使用自定义策略创建，按给定顺序尝试
    pub fn with_strategies(
        section_detectors: Vec<Box<dyn SectionDetector>>,
        boundary_detectors: Vec<Box<dyn QuestionBoundaryDetector>>,
        default_max_marks: f64,
    ) -> Self {
        Self {
            section_detectors,
            boundary_detectors,
            default_max_marks,
        }
    }

    /// 对齐试卷与答案
    ///
    /// 一道题都没识别到时返回 `AlignmentError::NoQuestions`
    pub fn align(&self, question_paper: &str, answer_key: &str) -> AppResult<AlignedPaper> {
        let mut warnings = Vec::new();

        let paper_sections = self.parse_document(question_paper, &mut warnings);
        let key_sections = self.parse_document(answer_key, &mut Vec::new());
        let key_index = AnswerIndex::build(&key_sections, &mut warnings);

        let mut questions = Vec::new();
        let mut seen: HashSet<QuestionKey> = HashSet::new();

        for section in &paper_sections {
            for span in &section.spans {
                let key = QuestionKey::new(&section.header.name, span.number);
                if !seen.insert(key.clone()) {
                    warn!("试卷中 {} 重复出现，保留第一次出现", key);
                    warnings.push(AlignmentWarning {
                        section: key.section.clone(),
                        number: Some(key.number),
                        kind: AlignmentWarningKind::DuplicateQuestion,
                        message: format!("试卷中 {} 重复出现，已保留第一次出现", key),
                    });
                    continue;
                }

                let (text, inline_marks) = split_inline_marks(&span.text);
                let max_marks = inline_marks
                    .or(section.header.marks_each)
                    .unwrap_or(self.default_max_marks);

                let expected_answer = match key_index.lookup(&key) {
                    Some(answer) => answer.to_string(),
                    None => {
                        debug!("答案中找不到 {}", key);
                        warnings.push(AlignmentWarning {
                            section: key.section.clone(),
                            number: Some(key.number),
                            kind: AlignmentWarningKind::MissingAnswer,
                            message: format!("答案中找不到 {}，标准答案留空", key),
                        });
                        String::new()
                    }
                };

                questions.push(QuestionRecord {
                    number: span.number,
                    section: section.header.name.clone(),
                    text,
                    expected_answer,
                    max_marks,
                });
            }
        }

        if questions.is_empty() {
            return Err(AlignmentError::NoQuestions {
                paper_chars: question_paper.chars().count(),
            }
            .into());
        }

        Ok(AlignedPaper { questions, warnings })
    }

    /// 按题号切分学生答题卡
    ///
    /// 尽力而为：切不出来的题目不会出现在结果中
    pub fn segment_student_answers(&self, answer_sheet: &str, questions: &[QuestionRecord]) -> Vec<StudentAnswer> {
        let sections = self.parse_document(answer_sheet, &mut Vec::new());
        let mut index: HashMap<QuestionKey, &QuestionSpan> = HashMap::new();
        let mut by_number: HashMap<u32, Vec<&QuestionSpan>> = HashMap::new();
        for section in &sections {
            for span in &section.spans {
                index
                    .entry(QuestionKey::new(&section.header.name, span.number))
                    .or_insert(span);
                by_number.entry(span.number).or_default().push(span);
            }
        }

        questions
            .iter()
            .filter_map(|q| {
                let span = index.get(&q.key()).copied().or_else(|| match by_number.get(&q.number) {
                    Some(spans) if spans.len() == 1 => Some(spans[0]),
                    _ => None,
                })?;
                Some(StudentAnswer {
                    question_number: q.number,
                    section: q.section.clone(),
                    raw_extracted_text: span.raw.clone(),
                    answer_text: collapse_whitespace(&span.text),
                })
            })
            .collect()
    }

    /// 解析一份文档为分区 + 题目范围
    fn parse_document(&self, text: &str, warnings: &mut Vec<AlignmentWarning>) -> Vec<ParsedSection> {
        let lines = strip_page_tags(text);

        let headers = self
            .section_detectors
            .iter()
            .map(|d| (d.name(), d.detect(&lines)))
            .find(|(_, headers)| !headers.is_empty())
            .map(|(name, headers)| {
                debug!("分区识别策略: {} ({} 个分区)", name, headers.len());
                headers
            })
            .unwrap_or_default();

        headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                let end = headers
                    .get(i + 1)
                    .map(|next| next.content_start.saturating_sub(1))
                    .unwrap_or(lines.len());
                let start = header.content_start.min(end);
                let spans = self.detect_boundaries(header, &lines[start..end], warnings);
                ParsedSection {
                    header: header.clone(),
                    spans,
                }
            })
            .collect()
    }

    /// 依次尝试边界策略，优先选择与声明题数一致的结果
    fn detect_boundaries(
        &self,
        header: &SectionHeader,
        lines: &[&str],
        warnings: &mut Vec<AlignmentWarning>,
    ) -> Vec<QuestionSpan> {
        let candidates: Vec<(&'static str, Vec<QuestionSpan>)> = self
            .boundary_detectors
            .iter()
            .map(|d| (d.name(), d.detect(lines), d))
            .filter(|(_, spans, d)| !spans.is_empty() && d.is_plausible(spans))
            .map(|(name, spans, _)| (name, spans))
            .collect();

        let Some(declared) = header.declared_count else {
            return candidates.into_iter().next().map(|(_, spans)| spans).unwrap_or_default();
        };

        if let Some(idx) = candidates.iter().position(|(_, spans)| unique_numbers(spans) == declared) {
            let (name, spans) = candidates.into_iter().nth(idx).unwrap_or_default();
            debug!("{}: 边界策略 {} 与声明题数 {} 一致", header.name, name, declared);
            return spans;
        }

        // 没有完全一致的策略时取最接近的，同距离按优先级
        let closest = candidates
            .into_iter()
            .enumerate()
            .min_by_key(|(priority, (_, spans))| (unique_numbers(spans).abs_diff(declared), *priority))
            .map(|(_, candidate)| candidate);

        let found = closest.as_ref().map(|(_, spans)| unique_numbers(spans)).unwrap_or(0);
        warn!("{}: 声明 {} 道题，实际识别到 {} 道", header.name, declared, found);
        warnings.push(AlignmentWarning {
            section: header.name.clone(),
            number: None,
            kind: AlignmentWarningKind::CountMismatch,
            message: format!("{} 声明 {} 道题，实际识别到 {} 道", header.name, declared, found),
        });

        closest.map(|(_, spans)| spans).unwrap_or_default()
    }
}

/// 答案索引
struct AnswerIndex {
    exact: HashMap<QuestionKey, String>,
    by_number: HashMap<u32, Vec<String>>,
}

impl AnswerIndex {
    fn build(sections: &[ParsedSection], warnings: &mut Vec<AlignmentWarning>) -> Self {
        let mut exact = HashMap::new();
        let mut by_number: HashMap<u32, Vec<String>> = HashMap::new();

        for section in sections {
            for span in &section.spans {
                let key = QuestionKey::new(&section.header.name, span.number);
                let answer = strip_answer_label(&span.text);
                if exact.contains_key(&key) {
                    warnings.push(AlignmentWarning {
                        section: key.section.clone(),
                        number: Some(key.number),
                        kind: AlignmentWarningKind::DuplicateAnswer,
                        message: format!("答案中 {} 重复出现，已保留第一次出现", key),
                    });
                    continue;
                }
                by_number.entry(span.number).or_default().push(answer.clone());
                exact.insert(key, answer);
            }
        }

        Self { exact, by_number }
    }

    /// 先按 (分区, 题号) 精确匹配，题号全局唯一时退化为按题号匹配
    fn lookup(&self, key: &QuestionKey) -> Option<&str> {
        if let Some(answer) = self.exact.get(key) {
            return Some(answer);
        }
        match self.by_number.get(&key.number) {
            Some(answers) if answers.len() == 1 => Some(&answers[0]),
            _ => None,
        }
    }
}

/// 去掉 `=== PAGE N ===` 页面标记行
pub fn strip_page_tags(text: &str) -> Vec<&str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?i)^\s*=+\s*page\s+\d+\s*=+\s*$").expect("page tag regex"));
    text.lines().filter(|line| !re.is_match(line)).collect()
}

/// 拆出题干末尾的 "[2 marks]" / "(3 marks)"
fn split_inline_marks(text: &str) -> (String, Option<f64>) {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)\s*[\[(]\s*(\d+(?:\.\d+)?)\s*marks?\s*[\])]\s*$").expect("inline marks regex")
    });
    match re.captures(text) {
        Some(caps) => {
            let marks = caps[1].parse().ok();
            let start = caps.get(0).map(|m| m.start()).unwrap_or(text.len());
            (text[..start].trim().to_string(), marks)
        }
        None => (text.trim().to_string(), None),
    }
}

/// 去掉答案前面的 "Answer:" / "Ans." 标签
fn strip_answer_label(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?i)^\s*(?:answer|ans)\s*[.:\-]\s*").expect("answer label regex"));
    re.replace(text.trim(), "").trim().to_string()
}

fn unique_numbers(spans: &[QuestionSpan]) -> usize {
    spans.iter().map(|s| s.number).collect::<HashSet<_>>().len()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
