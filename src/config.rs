use std::time::Duration;

use crate::error::ConfigError;
use crate::models::BatchLimits;

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时评分的学生数量
    pub max_concurrent_students: usize,
    /// 单个学生同时在途的批次请求数量
    pub max_concurrent_batches: usize,
    /// 评分任务 TOML 文件存放目录
    pub jobs_folder: String,
    /// 评分结果输出目录（FileStore 使用）
    pub output_dir: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    /// 文字识别使用的视觉模型
    pub vision_model_name: String,
    pub temperature: f32,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    // --- 批次规划 ---
    pub max_input_tokens: usize,
    pub max_output_tokens: usize,
    pub max_questions_per_batch: usize,
    /// 每道题评分结果预估占用的输出 token
    pub output_tokens_per_question: usize,
    /// 字符到 token 的估算系数
    pub tokens_per_char: f64,
    /// 未标注分值的题目默认分值
    pub default_max_marks: f64,
    // --- 重试策略 ---
    pub schema_retries: u32,
    pub coverage_retries: u32,
    pub network_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: u32,
    pub persistence_attempts: u32,
    // --- 持久化 ---
    /// 为空时使用本地 FileStore
    pub supabase_url: String,
    pub supabase_key: String,
    pub supabase_table: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_students: 4,
            max_concurrent_batches: 3,
            jobs_folder: "jobs".to_string(),
            output_dir: "evaluations".to_string(),
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            vision_model_name: "gpt-4o".to_string(),
            temperature: 0.2,
            request_timeout_secs: 90,
            max_input_tokens: 12_000,
            max_output_tokens: 4_096,
            max_questions_per_batch: 20,
            output_tokens_per_question: 150,
            tokens_per_char: 0.25,
            default_max_marks: 1.0,
            schema_retries: 2,
            coverage_retries: 1,
            network_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_factor: 2,
            persistence_attempts: 5,
            supabase_url: String::new(),
            supabase_key: String::new(),
            supabase_table: "test_answers".to_string(),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrent_students: env_or("MAX_CONCURRENT_STUDENTS", default.max_concurrent_students),
            max_concurrent_batches: env_or("MAX_CONCURRENT_BATCHES", default.max_concurrent_batches),
            jobs_folder: std::env::var("JOBS_FOLDER").unwrap_or(default.jobs_folder),
            output_dir: std::env::var("OUTPUT_DIR").unwrap_or(default.output_dir),
            verbose_logging: env_or("VERBOSE_LOGGING", default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            vision_model_name: std::env::var("VISION_MODEL_NAME").unwrap_or(default.vision_model_name),
            temperature: env_or("LLM_TEMPERATURE", default.temperature),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", default.request_timeout_secs),
            max_input_tokens: env_or("MAX_INPUT_TOKENS", default.max_input_tokens),
            max_output_tokens: env_or("MAX_OUTPUT_TOKENS", default.max_output_tokens),
            max_questions_per_batch: env_or("MAX_QUESTIONS_PER_BATCH", default.max_questions_per_batch),
            output_tokens_per_question: env_or("OUTPUT_TOKENS_PER_QUESTION", default.output_tokens_per_question),
            tokens_per_char: env_or("TOKENS_PER_CHAR", default.tokens_per_char),
            default_max_marks: env_or("DEFAULT_MAX_MARKS", default.default_max_marks),
            schema_retries: env_or("SCHEMA_RETRIES", default.schema_retries),
            coverage_retries: env_or("COVERAGE_RETRIES", default.coverage_retries),
            network_attempts: env_or("NETWORK_ATTEMPTS", default.network_attempts),
            backoff_base_ms: env_or("BACKOFF_BASE_MS", default.backoff_base_ms),
            backoff_factor: env_or("BACKOFF_FACTOR", default.backoff_factor),
            persistence_attempts: env_or("PERSISTENCE_ATTEMPTS", default.persistence_attempts),
            supabase_url: std::env::var("SUPABASE_URL").unwrap_or(default.supabase_url),
            supabase_key: std::env::var("SUPABASE_KEY").unwrap_or(default.supabase_key),
            supabase_table: std::env::var("SUPABASE_TABLE").unwrap_or(default.supabase_table),
        }
    }

    /// 检查配置中会导致规划或调度无法进行的取值
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("MAX_CONCURRENT_STUDENTS", self.max_concurrent_students),
            ("MAX_CONCURRENT_BATCHES", self.max_concurrent_batches),
            ("MAX_INPUT_TOKENS", self.max_input_tokens),
            ("MAX_OUTPUT_TOKENS", self.max_output_tokens),
            ("MAX_QUESTIONS_PER_BATCH", self.max_questions_per_batch),
            ("OUTPUT_TOKENS_PER_QUESTION", self.output_tokens_per_question),
        ];
        for (var_name, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    var_name: var_name.to_string(),
                    value: value.to_string(),
                    reason: "必须大于 0".to_string(),
                });
            }
        }

        if !(self.tokens_per_char > 0.0 && self.tokens_per_char.is_finite()) {
            return Err(ConfigError::InvalidValue {
                var_name: "TOKENS_PER_CHAR".to_string(),
                value: self.tokens_per_char.to_string(),
                reason: "必须是正数".to_string(),
            });
        }

        if self.network_attempts == 0 || self.persistence_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                var_name: "NETWORK_ATTEMPTS/PERSISTENCE_ATTEMPTS".to_string(),
                value: format!("{}/{}", self.network_attempts, self.persistence_attempts),
                reason: "至少需要 1 次尝试".to_string(),
            });
        }

        if self.supabase_url.is_empty() != self.supabase_key.is_empty() {
            return Err(ConfigError::MissingValue {
                var_name: if self.supabase_url.is_empty() { "SUPABASE_URL" } else { "SUPABASE_KEY" }
                    .to_string(),
            });
        }

        Ok(())
    }

    /// 批次规划限制
    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_input_tokens: self.max_input_tokens,
            max_output_tokens: self.max_output_tokens,
            max_questions_per_batch: self.max_questions_per_batch,
        }
    }

    /// 批次评分的重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            schema_retries: self.schema_retries,
            coverage_retries: self.coverage_retries,
            network_attempts: self.network_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_factor: self.backoff_factor,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 是否配置了 Supabase
    pub fn uses_supabase(&self) -> bool {
        !self.supabase_url.is_empty()
    }
}

/// 重试策略
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// SchemaError 之后额外的重试次数
    pub schema_retries: u32,
    /// CoverageError 之后额外的重试次数
    pub coverage_retries: u32,
    /// 网络/超时错误的最大尝试次数（含第一次）
    pub network_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_factor: u32,
}

impl RetryPolicy {
    /// 第 `attempt` 次失败后的等待时间（attempt 从 1 开始）
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.backoff_base
            .saturating_mul(self.backoff_factor.saturating_pow(exponent))
    }

    /// 不等待的策略，测试用
    pub fn immediate() -> Self {
        Self {
            backoff_base: Duration::ZERO,
            ..Config::default().retry_policy()
        }
    }
}
