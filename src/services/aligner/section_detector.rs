//! 分区识别策略

use regex::Regex;
use std::sync::OnceLock;

use crate::models::MAIN_SECTION;

/// 识别到的分区标题
#[derive(Debug, Clone, PartialEq)]
pub struct SectionHeader {
    /// 规范化后的分区名，如 "Section A"
    pub name: String,
    /// 分区内容起始行
    pub content_start: usize,
    /// 说明行中声明的题目数量
    pub declared_count: Option<usize>,
    /// 说明行中声明的每题分值
    pub marks_each: Option<f64>,
}

/// 分区识别策略
pub trait SectionDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// 按出现顺序返回分区；返回空表示本策略不适用
    fn detect(&self, lines: &[&str]) -> Vec<SectionHeader>;
}

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(section|part)\s*[-–:.]?\s*([A-Z]|[IVX]{1,4}|\d{1,2})\b\s*([-–—:.)]?)\s*(.*)$")
            .expect("section header regex")
    })
}

fn count_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+)\s*questions?\b").expect("question count regex"))
}

fn marks_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*marks?\s*(?:each|per\s+question)").expect("marks regex")
    })
}

/// 解析说明行，如 "(20 Questions - 1 mark each)"
pub fn parse_instruction(line: &str) -> (Option<usize>, Option<f64>) {
    let count = count_regex()
        .captures(line)
        .and_then(|c| c[1].parse::<usize>().ok());
    let marks = marks_regex()
        .captures(line)
        .and_then(|c| c[1].parse::<f64>().ok());
    (count, marks)
}

fn is_instruction_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('(') && {
        let (count, marks) = parse_instruction(trimmed);
        count.is_some() || marks.is_some()
    }
}

/// 从 `start` 开始的若干行中收集说明信息
fn scan_instructions(lines: &[&str], start: usize, inline: &str) -> (Option<usize>, Option<f64>) {
    let (mut count, mut marks) = parse_instruction(inline);

    for line in lines.iter().skip(start).filter(|l| !l.trim().is_empty()).take(2) {
        if !is_instruction_line(line) {
            break;
        }
        let (c, m) = parse_instruction(line);
        count = count.or(c);
        marks = marks.or(m);
    }

    (count, marks)
}

/// "SECTION A" / "Section-B" / "PART C" 形式的分区标题
#[derive(Debug, Default, Clone, Copy)]
pub struct LetteredSectionDetector;

impl LetteredSectionDetector {
    fn normalize(kind: &str, label: &str) -> String {
        let mut chars = kind.chars();
        let kind = match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
            None => String::new(),
        };
        format!("{} {}", kind, label.to_uppercase())
    }

    /// 标签之后的部分能否作为标题的一部分
    ///
    /// 接受 "SECTION A: Objective"、"SECTION B – Short Answer"、"PART C LONG ANSWER"
    /// 和 "(10 Questions ...)"；"Part a of the figure shows" 这类题干正文不算标题
    fn is_header_tail(separator: &str, rest: &str) -> bool {
        let rest = rest.trim();
        rest.is_empty()
            || rest.starts_with('(')
            || !separator.is_empty()
            || !rest.chars().any(|c| c.is_lowercase())
    }
}

impl SectionDetector for LetteredSectionDetector {
    fn name(&self) -> &'static str {
        "lettered"
    }

    fn detect(&self, lines: &[&str]) -> Vec<SectionHeader> {
        let mut headers = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            let Some(caps) = header_regex().captures(line) else {
                continue;
            };
            let separator = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
            let rest = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
            if !Self::is_header_tail(separator, rest) {
                continue;
            }
            let (declared_count, marks_each) = scan_instructions(lines, idx + 1, rest);
            headers.push(SectionHeader {
                name: Self::normalize(&caps[1], &caps[2]),
                content_start: idx + 1,
                declared_count,
                marks_each,
            });
        }

        headers
    }
}

/// 兜底策略：整份文档视为一个隐式分区
#[derive(Debug, Default, Clone, Copy)]
pub struct ImplicitSectionDetector;

impl SectionDetector for ImplicitSectionDetector {
    fn name(&self) -> &'static str {
        "implicit"
    }

    fn detect(&self, lines: &[&str]) -> Vec<SectionHeader> {
        let (declared_count, marks_each) = scan_instructions(lines, 0, "");
        vec![SectionHeader {
            name: MAIN_SECTION.to_string(),
            content_start: 0,
            declared_count,
            marks_each,
        }]
    }
}
