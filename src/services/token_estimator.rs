//! Token 估算
//!
//! 按固定系数从字符数估算 token，试卷、答案和学生作答统一使用同一系数

/// 默认的每字符 token 系数
pub const DEFAULT_TOKENS_PER_CHAR: f64 = 0.25;

/// Token 估算器
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimator {
    tokens_per_char: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_TOKENS_PER_CHAR)
    }
}

impl TokenEstimator {
    pub fn new(tokens_per_char: f64) -> Self {
        Self { tokens_per_char }
    }

    pub fn tokens_per_char(&self) -> f64 {
        self.tokens_per_char
    }

    /// `ceil(chars * ratio)`
    pub fn estimate_chars(&self, chars: usize) -> usize {
        (chars as f64 * self.tokens_per_char).ceil() as usize
    }

    /// 估算一段文本
    pub fn estimate(&self, text: &str) -> usize {
        self.estimate_chars(text.chars().count())
    }
}
