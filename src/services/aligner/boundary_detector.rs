//! 题目边界识别策略

use regex::Regex;
use std::sync::OnceLock;

/// 一道题在文档中的范围
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionSpan {
    pub number: u32,
    /// 题号之后的首行文本与续行
    pub text: String,
    /// 原始行（含题号）
    pub raw: String,
}

/// 题目边界识别策略
pub trait QuestionBoundaryDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// 若该行是题目起始行，返回 (题号, 题号后的文本)
    fn parse_line(&self, line: &str) -> Option<(u32, String)>;

    /// 识别结果是否可信；字母与罗马数字编号要求从 1 开始连续
    fn is_plausible(&self, _spans: &[QuestionSpan]) -> bool {
        true
    }

    /// 按起始行切分；首个边界之前的行视为说明文字丢弃
    fn detect(&self, lines: &[&str]) -> Vec<QuestionSpan> {
        let mut spans: Vec<QuestionSpan> = Vec::new();

        for line in lines {
            if let Some((number, first)) = self.parse_line(line) {
                spans.push(QuestionSpan {
                    number,
                    text: first.trim().to_string(),
                    raw: line.trim().to_string(),
                });
            } else if let Some(current) = spans.last_mut() {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if !current.text.is_empty() {
                    current.text.push('\n');
                }
                current.text.push_str(trimmed);
                current.raw.push('\n');
                current.raw.push_str(trimmed);
            }
        }

        spans
    }
}

fn is_consecutive_from_one(spans: &[QuestionSpan]) -> bool {
    spans.first().map(|s| s.number) == Some(1)
        && spans.windows(2).all(|w| w[1].number == w[0].number + 1)
}

/// `1.` / `1)` 数字编号
#[derive(Debug, Default, Clone, Copy)]
pub struct NumericBoundaryDetector;

impl QuestionBoundaryDetector for NumericBoundaryDetector {
    fn name(&self) -> &'static str {
        "numeric"
    }

    fn parse_line(&self, line: &str) -> Option<(u32, String)> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"^\s*(\d{1,3})\s*[.)](?:\s+(.*)|\s*)$").expect("numeric regex"));
        let caps = re.captures(line)?;
        let number = caps[1].parse().ok()?;
        Some((number, caps.get(2).map(|m| m.as_str()).unwrap_or_default().to_string()))
    }
}

/// `Q1.` / `Q.1` / `Q 1:` 编号
#[derive(Debug, Default, Clone, Copy)]
pub struct PrefixedBoundaryDetector;

impl QuestionBoundaryDetector for PrefixedBoundaryDetector {
    fn name(&self) -> &'static str {
        "prefixed"
    }

    fn parse_line(&self, line: &str) -> Option<(u32, String)> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"(?i)^\s*(?:q|que|ques|question)\s*\.?\s*(\d{1,3})\s*[.):]?(?:\s+(.*)|\s*)$")
                .expect("prefixed regex")
        });
        let caps = re.captures(line)?;
        let number = caps[1].parse().ok()?;
        Some((number, caps.get(2).map(|m| m.as_str()).unwrap_or_default().to_string()))
    }
}

/// 罗马数字编号 `i.` / `(iv)`
#[derive(Debug, Default, Clone, Copy)]
pub struct RomanBoundaryDetector;

impl RomanBoundaryDetector {
    pub fn roman_to_int(roman: &str) -> Option<u32> {
        let value = |c: char| match c {
            'i' => Some(1),
            'v' => Some(5),
            'x' => Some(10),
            'l' => Some(50),
            _ => None,
        };

        let digits: Vec<u32> = roman
            .chars()
            .map(|c| value(c.to_ascii_lowercase()))
            .collect::<Option<Vec<_>>>()?;
        if digits.is_empty() {
            return None;
        }

        let mut total = 0;
        for (i, d) in digits.iter().enumerate() {
            match digits.get(i + 1) {
                Some(next) if next > d => total -= *d as i64,
                _ => total += *d as i64,
            }
        }
        u32::try_from(total).ok().filter(|n| *n > 0)
    }
}

impl QuestionBoundaryDetector for RomanBoundaryDetector {
    fn name(&self) -> &'static str {
        "roman"
    }

    fn parse_line(&self, line: &str) -> Option<(u32, String)> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"(?i)^\s*\(?([ivxl]{1,6})[.)](?:\s+(.*)|\s*)$").expect("roman regex")
        });
        let caps = re.captures(line)?;
        let number = Self::roman_to_int(&caps[1])?;
        Some((number, caps.get(2).map(|m| m.as_str()).unwrap_or_default().to_string()))
    }

    fn is_plausible(&self, spans: &[QuestionSpan]) -> bool {
        is_consecutive_from_one(spans)
    }
}

/// 字母编号 `a.` / `(b)`
#[derive(Debug, Default, Clone, Copy)]
pub struct LetteredBoundaryDetector;

impl QuestionBoundaryDetector for LetteredBoundaryDetector {
    fn name(&self) -> &'static str {
        "lettered"
    }

    fn parse_line(&self, line: &str) -> Option<(u32, String)> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"^\s*\(?([a-zA-Z])[.)](?:\s+(.*)|\s*)$").expect("lettered regex"));
        let caps = re.captures(line)?;
        let letter = caps[1].chars().next()?.to_ascii_lowercase();
        let number = letter as u32 - 'a' as u32 + 1;
        Some((number, caps.get(2).map(|m| m.as_str()).unwrap_or_default().to_string()))
    }

    fn is_plausible(&self, spans: &[QuestionSpan]) -> bool {
        is_consecutive_from_one(spans)
    }
}
