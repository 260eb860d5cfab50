//! 响应校验服务 - 业务能力层
//!
//! 把模型的原始输出解析为 `GradedAnswer` 列表：
//! 1. 提取 JSON（直接解析 → ```json 代码块 → 花括号/方括号兜底）
//! 2. 逐条校验结构，题号允许是数字或数字字符串
//! 3. 按 (分区, 题号) 匹配期望题目，多余和重复的答案丢弃
//! 4. 修正分数与置信度，修正内容记入 `alignmentNotes`

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::models::{GradedAnswer, OverallPerformance, QuestionKey, QuestionRecord, Score, StudentAnswer, StudentInfo};
use crate::utils::truncate_text;

/// 模型未给出置信度时使用的默认值
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

const EPSILON: f64 = 1e-9;

static FENCED_JSON: OnceLock<Regex> = OnceLock::new();
static OBJECT_JSON: OnceLock<Regex> = OnceLock::new();
static ARRAY_JSON: OnceLock<Regex> = OnceLock::new();

/// 一个批次校验通过后的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedBatch {
    /// 按期望题目顺序排列
    pub answers: Vec<GradedAnswer>,
    pub student: Option<StudentInfo>,
    pub overall_performance: Option<OverallPerformance>,
    /// 被丢弃的多余/重复答案
    pub dropped: Vec<String>,
}

/// 响应校验器
///
/// 持有学生作答的分段结果，用于补全模型漏填的 `rawExtractedText`
#[derive(Debug, Clone, Default)]
pub struct ResponseValidator {
    student_answers: Vec<StudentAnswer>,
}

impl ResponseValidator {
    pub fn new(student_answers: Vec<StudentAnswer>) -> Self {
        Self { student_answers }
    }

    /// 校验一个批次的原始响应
    pub fn validate(&self, raw: &str, expected: &[QuestionRecord]) -> Result<ValidatedBatch, ValidationError> {
        let value = extract_json(raw).ok_or_else(|| schema("响应中没有可解析的 JSON", raw))?;

        let (items, object) = match value {
            Value::Array(items) => (items, None),
            Value::Object(mut map) => match map.remove("answers") {
                Some(Value::Array(items)) => (items, Some(map)),
                Some(_) => return Err(schema("answers 字段不是数组", raw)),
                None => return Err(schema("缺少 answers 字段", raw)),
            },
            _ => return Err(schema("响应既不是对象也不是数组", raw)),
        };

        let mut parsed = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let answer: RawAnswer = serde_json::from_value(item)
                .map_err(|e| schema(format!("第 {} 个答案结构不合法: {}", i + 1, e), raw))?;
            if answer.score.len() != 2 {
                return Err(schema(
                    format!(
                        "第 {} 题 score 应为 [得分, 满分]，实际有 {} 个元素",
                        answer.question_no,
                        answer.score.len()
                    ),
                    raw,
                ));
            }
            if answer.score.iter().any(|v| !v.is_finite()) {
                return Err(schema(format!("第 {} 题 score 不是有效数字", answer.question_no), raw));
            }
            parsed.push(answer);
        }

        let (student, overall_performance) = match object {
            Some(map) => parse_summary(map),
            None => (None, None),
        };

        let mut slots: Vec<Option<RawAnswer>> = (0..expected.len()).map(|_| None).collect();
        let mut dropped = Vec::new();
        for answer in parsed {
            match match_expected(expected, &answer) {
                Some(idx) if slots[idx].is_none() => slots[idx] = Some(answer),
                Some(idx) => {
                    let key = expected[idx].key();
                    warn!("丢弃重复答案: {}", key);
                    dropped.push(format!("重复答案 {}", key));
                }
                None => {
                    let label = answer.label();
                    warn!("丢弃无法匹配的答案: {}", label);
                    dropped.push(format!("未知题目 {}", label));
                }
            }
        }

        let missing: Vec<String> = expected
            .iter()
            .zip(&slots)
            .filter(|(_, slot)| slot.is_none())
            .map(|(q, _)| q.key().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::Coverage {
                expected: expected.len(),
                received: expected.len() - missing.len(),
                missing,
            });
        }

        let answers = expected
            .iter()
            .zip(slots)
            .filter_map(|(record, slot)| slot.map(|raw| self.repair(record, raw)))
            .collect();

        Ok(ValidatedBatch {
            answers,
            student,
            overall_performance,
            dropped,
        })
    }

    /// 以期望题目为准修正一条答案
    fn repair(&self, record: &QuestionRecord, raw: RawAnswer) -> GradedAnswer {
        let segment = self.find_segment(&record.key());

        let mut answer = GradedAnswer {
            question_no: record.number,
            section: record.section.clone(),
            question: record.text.clone(),
            expected_answer: record.expected_answer.clone(),
            answer: raw.answer.unwrap_or_default(),
            raw_extracted_text: raw.raw_extracted_text.unwrap_or_default(),
            score: Score(raw.score[0], raw.score[1]),
            remarks: raw.remarks.unwrap_or_default(),
            confidence: raw.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0),
            concepts: raw.concepts.unwrap_or_default(),
            missing_elements: raw.missing_elements.unwrap_or_default(),
            answer_matches: raw.answer_matches.unwrap_or(false),
            personalized_feedback: raw.personalized_feedback.unwrap_or_default(),
            alignment_notes: raw.alignment_notes.unwrap_or_default(),
        };

        if let Some(segment) = segment {
            if answer.raw_extracted_text.trim().is_empty() {
                answer.raw_extracted_text = segment.raw_extracted_text.clone();
            }
            if answer.answer.trim().is_empty() {
                answer.answer = segment.answer_text.clone();
            }
        }

        let Score(mut earned, mut possible) = answer.score;
        if (possible - record.max_marks).abs() > EPSILON {
            answer.add_alignment_note(&format!(
                "Possible marks {} replaced by the question's max marks {}.",
                possible, record.max_marks
            ));
            possible = record.max_marks;
        }
        if earned < 0.0 {
            answer.add_alignment_note(&format!("Negative score {} raised to 0.", earned));
            earned = 0.0;
        }
        if earned > possible {
            answer.add_alignment_note(&format!("Score {} clamped to the maximum {}.", earned, possible));
            earned = possible;
        }
        answer.score = Score(earned, possible);

        answer
    }

    fn find_segment(&self, key: &QuestionKey) -> Option<&StudentAnswer> {
        self.student_answers
            .iter()
            .find(|s| s.section == key.section && s.question_number == key.number)
            .or_else(|| {
                let mut same_number = self.student_answers.iter().filter(|s| s.question_number == key.number);
                match (same_number.next(), same_number.next()) {
                    (Some(only), None) => Some(only),
                    _ => None,
                }
            })
    }
}

/// 不依赖学生作答分段的便捷入口
pub fn validate(raw: &str, expected: &[QuestionRecord]) -> Result<Vec<GradedAnswer>, ValidationError> {
    ResponseValidator::default()
        .validate(raw, expected)
        .map(|batch| batch.answers)
}

/// 从模型输出中提取 JSON 值
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let fenced = FENCED_JSON.get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("fenced json regex"));
    if let Some(value) = fenced
        .captures_iter(trimmed)
        .filter_map(|caps| serde_json::from_str::<Value>(caps[1].trim()).ok())
        .next()
    {
        debug!("从代码块中提取到 JSON");
        return Some(value);
    }

    let object = OBJECT_JSON.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("object regex"));
    let array = ARRAY_JSON.get_or_init(|| Regex::new(r"(?s)\[.*\]").expect("array regex"));
    [object, array]
        .into_iter()
        .filter_map(|re| re.find(trimmed))
        .find_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
}

fn schema(reason: impl Into<String>, raw: &str) -> ValidationError {
    ValidationError::Schema {
        reason: reason.into(),
        snippet: truncate_text(raw.trim(), 120),
    }
}

fn parse_summary(mut map: serde_json::Map<String, Value>) -> (Option<StudentInfo>, Option<OverallPerformance>) {
    let overall = map.remove("overallPerformance").and_then(|value| {
        serde_json::from_value::<OverallPerformance>(value)
            .map_err(|e| warn!("overallPerformance 结构不合法，已忽略: {}", e))
            .ok()
    });

    let student = serde_json::from_value::<StudentInfo>(Value::Object(map))
        .ok()
        .filter(|info| *info != StudentInfo::default());

    (student, overall)
}

/// 找到一条答案对应的期望题目下标
fn match_expected(expected: &[QuestionRecord], answer: &RawAnswer) -> Option<usize> {
    if let Some(section) = answer.section.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if let Some(idx) = expected
            .iter()
            .position(|q| q.number == answer.question_no && q.section.eq_ignore_ascii_case(section))
        {
            return Some(idx);
        }
    }

    // 分区对不上时，只有题号唯一才能确定
    let mut same_number = expected
        .iter()
        .enumerate()
        .filter(|(_, q)| q.number == answer.question_no)
        .map(|(i, _)| i);
    match (same_number.next(), same_number.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

/// 模型返回的单条答案（宽松结构）
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnswer {
    #[serde(deserialize_with = "deserialize_question_no", alias = "question_no", alias = "questionNumber")]
    question_no: u32,
    #[serde(default)]
    section: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default, alias = "raw_extracted_text")]
    raw_extracted_text: Option<String>,
    score: Vec<f64>,
    #[serde(default)]
    remarks: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    concepts: Option<Vec<String>>,
    #[serde(default, alias = "missing_elements")]
    missing_elements: Option<Vec<String>>,
    #[serde(default, alias = "answer_matches")]
    answer_matches: Option<bool>,
    #[serde(default, alias = "personalized_feedback")]
    personalized_feedback: Option<String>,
    #[serde(default, alias = "alignment_notes")]
    alignment_notes: Option<String>,
}

impl RawAnswer {
    fn label(&self) -> String {
        match &self.section {
            Some(section) => QuestionKey::new(section, self.question_no).to_string(),
            None => format!("#{}", self.question_no),
        }
    }
}

// 题号既可能是数字，也可能是数字字符串
fn deserialize_question_no<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct QuestionNoVisitor;

    impl<'de> Visitor<'de> for QuestionNoVisitor {
        type Value = u32;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a question number as an integer or numeric string")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            value
                .trim()
                .trim_end_matches('.')
                .parse::<u32>()
                .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u32::try_from(value).map_err(|_| E::invalid_value(de::Unexpected::Unsigned(value), &self))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u32::try_from(value).map_err(|_| E::invalid_value(de::Unexpected::Signed(value), &self))
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if value.fract() == 0.0 && value >= 0.0 && value <= u32::MAX as f64 {
                Ok(value as u32)
            } else {
                Err(E::invalid_value(de::Unexpected::Float(value), &self))
            }
        }
    }

    deserializer.deserialize_any(QuestionNoVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(section: &str, number: u32, max_marks: f64) -> QuestionRecord {
        QuestionRecord {
            number,
            section: section.to_string(),
            text: format!("Question {number}"),
            expected_answer: format!("Answer {number}"),
            max_marks,
        }
    }

    fn expected() -> Vec<QuestionRecord> {
        vec![record("Section A", 1, 1.0), record("Section A", 2, 2.0)]
    }

    #[test]
    fn test_accepts_object_with_answers() {
        let raw = r#"{
            "studentName": "Asha",
            "answers": [
                {"questionNo": 1, "section": "Section A", "score": [1, 1], "confidence": 0.9, "answerMatches": true},
                {"questionNo": "2", "section": "Section A", "score": [1.5, 2], "remarks": "partly right"}
            ],
            "overallPerformance": {"strengths": ["algebra"], "personalizedSummary": "Good work."}
        }"#;

        let batch = ResponseValidator::default().validate(raw, &expected()).unwrap();
        assert_eq!(batch.answers.len(), 2);
        assert_eq!(batch.answers[0].score, Score(1.0, 1.0));
        assert_eq!(batch.answers[1].question_no, 2);
        assert_eq!(batch.answers[1].confidence, DEFAULT_CONFIDENCE);
        assert_eq!(batch.answers[1].question, "Question 2");
        assert_eq!(batch.student.unwrap().student_name, "Asha");
        assert_eq!(batch.overall_performance.unwrap().strengths, vec!["algebra"]);
    }

    #[test]
    fn test_accepts_fenced_array_out_of_order() {
        let raw = "Here is the grading:\n```json\n[\n{\"questionNo\": 2, \"score\": [2, 2]},\n{\"questionNo\": 1, \"score\": [0, 1]}\n]\n```";
        let answers = validate(raw, &expected()).unwrap();
        assert_eq!(answers.iter().map(|a| a.question_no).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(answers[0].section, "Section A");
    }

    #[test]
    fn test_brace_fallback() {
        let raw = "Sure! {\"answers\": [{\"questionNo\": 1, \"score\": [1, 1]}, {\"questionNo\": 2, \"score\": [0, 2]}]} Hope this helps.";
        assert_eq!(validate(raw, &expected()).unwrap().len(), 2);
    }

    #[test]
    fn test_non_json_is_schema_error() {
        let err = validate("I could not grade this sheet.", &expected()).unwrap_err();
        assert!(matches!(err, ValidationError::Schema { .. }));
    }

    #[test]
    fn test_score_must_have_two_elements() {
        let raw = r#"[{"questionNo": 1, "score": [1]}, {"questionNo": 2, "score": [2, 2]}]"#;
        let err = validate(raw, &expected()).unwrap_err();
        assert!(matches!(err, ValidationError::Schema { .. }));
    }

    #[test]
    fn test_missing_question_is_coverage_error() {
        let raw = r#"[{"questionNo": 1, "score": [1, 1]}, {"questionNo": 7, "score": [1, 1]}]"#;
        match validate(raw, &expected()).unwrap_err() {
            ValidationError::Coverage {
                expected,
                received,
                missing,
            } => {
                assert_eq!(expected, 2);
                assert_eq!(received, 1);
                assert_eq!(missing, vec!["Section A #2".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicates_and_extras_are_dropped() {
        let raw = r#"[
            {"questionNo": 1, "score": [1, 1]},
            {"questionNo": 1, "score": [0, 1]},
            {"questionNo": 2, "score": [2, 2]},
            {"questionNo": 9, "score": [1, 1]}
        ]"#;
        let batch = ResponseValidator::default().validate(raw, &expected()).unwrap();
        assert_eq!(batch.answers.len(), 2);
        assert_eq!(batch.answers[0].score, Score(1.0, 1.0));
        assert_eq!(batch.dropped.len(), 2);
    }

    #[test]
    fn test_score_repairs_are_noted() {
        let raw = r#"[
            {"questionNo": 1, "score": [3, 1], "confidence": 1.4},
            {"questionNo": 2, "score": [-1, 5], "alignmentNotes": "Found on page 2."}
        ]"#;
        let answers = validate(raw, &expected()).unwrap();

        assert_eq!(answers[0].score, Score(1.0, 1.0));
        assert_eq!(answers[0].confidence, 1.0);
        assert!(answers[0].alignment_notes.contains("clamped"));

        assert_eq!(answers[1].score, Score(0.0, 2.0));
        assert!(answers[1].alignment_notes.starts_with("Found on page 2."));
        assert!(answers[1].alignment_notes.contains("replaced"));
        assert!(answers[1].alignment_notes.contains("Negative"));
    }

    #[test]
    fn test_answer_matches_is_independent_of_score() {
        let raw = r#"[
            {"questionNo": 1, "score": [0.5, 1], "answerMatches": false},
            {"questionNo": 2, "score": [2, 2], "answerMatches": false}
        ]"#;
        let answers = validate(raw, &expected()).unwrap();
        assert_eq!(answers[0].score, Score(0.5, 1.0));
        assert!(!answers[1].answer_matches);
        assert_eq!(answers[1].score, Score(2.0, 2.0));
    }

    #[test]
    fn test_section_mismatch_falls_back_to_unique_number() {
        let expected = vec![record("Section A", 1, 1.0), record("Section B", 2, 1.0)];
        let raw = r#"[
            {"questionNo": 1, "section": "A", "score": [1, 1]},
            {"questionNo": 2, "section": "section b", "score": [1, 1]}
        ]"#;
        let answers = validate(raw, &expected).unwrap();
        assert_eq!(answers[0].section, "Section A");
        assert_eq!(answers[1].section, "Section B");
    }

    #[test]
    fn test_ambiguous_number_needs_section() {
        let expected = vec![record("Section A", 1, 1.0), record("Section B", 1, 1.0)];
        let raw = r#"[
            {"questionNo": 1, "section": "Section B", "score": [1, 1]},
            {"questionNo": 1, "score": [0, 1]}
        ]"#;
        let err = validate(raw, &expected).unwrap_err();
        assert!(matches!(err, ValidationError::Coverage { received: 1, .. }));
    }

    #[test]
    fn test_raw_text_filled_from_segments() {
        let segments = vec![StudentAnswer {
            question_number: 2,
            section: "Section A".to_string(),
            raw_extracted_text: "2. photosynthesis".to_string(),
            answer_text: "photosynthesis".to_string(),
        }];
        let raw = r#"[{"questionNo": 1, "score": [1, 1], "rawExtractedText": "1. yes"}, {"questionNo": 2, "score": [2, 2]}]"#;
        let batch = ResponseValidator::new(segments).validate(raw, &expected()).unwrap();
        assert_eq!(batch.answers[0].raw_extracted_text, "1. yes");
        assert_eq!(batch.answers[1].raw_extracted_text, "2. photosynthesis");
        assert_eq!(batch.answers[1].answer, "photosynthesis");
    }
}
