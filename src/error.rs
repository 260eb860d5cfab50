use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 题目对齐错误
    #[error("对齐错误: {0}")]
    Alignment(#[from] AlignmentError),
    /// 批次规划错误
    #[error("批次规划错误: {0}")]
    Plan(#[from] PlanError),
    /// LLM 服务错误
    #[error("LLM错误: {0}")]
    Llm(#[from] LlmError),
    /// 模型响应校验错误
    #[error("响应校验错误: {0}")]
    Validation(#[from] ValidationError),
    /// 持久化错误
    #[error("持久化错误: {0}")]
    Persistence(#[from] PersistenceError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// JSON 序列化错误
    #[error("JSON序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
    /// 答题卡图片全部识别失败
    #[error("Text extraction failed: {pages} 页图片均未识别成功 ({reason})")]
    ExtractionFailed { pages: usize, reason: String },
    /// 某个批次耗尽重试次数
    #[error("批次 {index} 评分失败: {source}")]
    BatchFailed {
        index: usize,
        #[source]
        source: Box<AppError>,
    },
    /// 其他错误
    #[error("错误: {0}")]
    Other(String),
}

/// 题目对齐错误
#[derive(Debug, Error)]
pub enum AlignmentError {
    /// 试卷中没有识别到任何题目
    #[error("试卷中未识别到任何题目 (文本长度: {paper_chars} 字符)")]
    NoQuestions { paper_chars: usize },
}

/// 批次规划错误
#[derive(Debug, Error)]
pub enum PlanError {
    /// 单道题本身就超过输入 token 上限
    #[error("题目 {section} 第 {number} 题过长: 预估 {tokens} tokens, 上限 {max_input_tokens}")]
    OversizedQuestion {
        section: String,
        number: u32,
        tokens: usize,
        max_input_tokens: usize,
    },
    /// 没有可规划的题目
    #[error("没有可规划的题目")]
    EmptyQuestionSet,
}

/// LLM 服务错误
#[derive(Debug, Error)]
pub enum LlmError {
    /// API 调用失败
    #[error("LLM API调用失败 (模型: {model}): {source}")]
    ApiCallFailed {
        model: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 请求构建失败
    #[error("LLM请求构建失败: {source}")]
    RequestBuildFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 返回内容为空
    #[error("LLM返回内容为空 (模型: {model})")]
    EmptyContent { model: String },
    /// 请求超时
    #[error("LLM请求超时 (模型: {model}, {secs} 秒)")]
    Timeout { model: String, secs: u64 },
}

/// 模型响应校验错误
#[derive(Debug, Error)]
pub enum ValidationError {
    /// 响应不是合法 JSON 或不符合结构约定
    #[error("响应结构不合法: {reason} (响应片段: {snippet})")]
    Schema { reason: String, snippet: String },
    /// 返回的答案少于期望题目数
    #[error("答案覆盖不完整: 期望 {expected} 题, 实际匹配 {received} 题, 缺失 [{}]", .missing.join(", "))]
    Coverage {
        expected: usize,
        received: usize,
        missing: Vec<String>,
    },
}

/// 持久化错误
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// 网络请求失败
    #[error("写入请求失败 ({target}): {source}")]
    RequestFailed {
        target: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 服务端返回错误状态
    #[error("写入被拒绝 ({target}): status={status}, body={body}")]
    BadStatus {
        target: String,
        status: u16,
        body: String,
    },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 取值非法
    #[error("配置项 {var_name} 取值 '{value}' 非法: {reason}")]
    InvalidValue {
        var_name: String,
        value: String,
        reason: String,
    },
    /// 缺少必需的配置项
    #[error("缺少配置项 {var_name}")]
    MissingValue { var_name: String },
}

/// 失败后的重试分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// 响应结构不合法
    Schema,
    /// 答案覆盖不完整
    Coverage,
    /// 网络或超时
    Network,
    /// 不可重试
    Fatal,
}

// ========== 从常见错误类型转换 ==========

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::File(FileError::TomlParseFailed {
            path: String::new(), // TOML错误通常不包含路径信息
            source: Box::new(err),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let target = err.url().map(|u| u.to_string()).unwrap_or_default();
        AppError::persistence_request_failed(target, err)
    }
}

impl From<async_openai::error::OpenAIError> for AppError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        AppError::Llm(LlmError::RequestBuildFailed {
            source: Box::new(err),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建LLM API调用错误
    pub fn llm_api_failed(
        model: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Llm(LlmError::ApiCallFailed {
            model: model.into(),
            source: Box::new(source),
        })
    }

    /// 创建响应结构错误
    pub fn schema(reason: impl Into<String>, response: &str) -> Self {
        AppError::Validation(ValidationError::Schema {
            reason: reason.into(),
            snippet: crate::utils::logging::truncate_text(response, 120),
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建持久化请求错误
    pub fn persistence_request_failed(
        target: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Persistence(PersistenceError::RequestFailed {
            target: target.into(),
            source: Box::new(source),
        })
    }

    /// 判断错误属于哪一类重试
    pub fn retry_class(&self) -> RetryClass {
        match self {
            AppError::Validation(ValidationError::Schema { .. }) => RetryClass::Schema,
            AppError::Validation(ValidationError::Coverage { .. }) => RetryClass::Coverage,
            AppError::Llm(LlmError::ApiCallFailed { .. })
            | AppError::Llm(LlmError::EmptyContent { .. })
            | AppError::Llm(LlmError::Timeout { .. })
            | AppError::Persistence(PersistenceError::RequestFailed { .. }) => RetryClass::Network,
            AppError::Persistence(PersistenceError::BadStatus { status, .. }) if *status >= 500 || *status == 429 => {
                RetryClass::Network
            }
            AppError::BatchFailed { source, .. } => source.retry_class(),
            _ => RetryClass::Fatal,
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
