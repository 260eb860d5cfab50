//! LLM 服务 - 业务能力层
//!
//! 只负责"调用模型"能力，不关心评分流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, LlmError};

/// 一次对话请求
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub user: String,
    /// 图片 URL 或 data URL，追加到用户消息中
    pub images: Vec<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// 模型调用接口
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// 返回模型输出的文本（已去除首尾空白）
    async fn complete(&self, request: ChatRequest) -> AppResult<String>;
}

/// LLM 服务
///
/// 职责：
/// - 调用兼容 OpenAI 的 Chat Completions API
/// - 支持 Vision（图片作为用户消息的一部分）
/// - 不关心批次、重试与校验
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
}

impl LlmService {
    /// 创建评分用的 LLM 服务
    pub fn new(config: &Config) -> Self {
        Self::with_model(config, config.llm_model_name.clone())
    }

    /// 使用指定模型创建（文字识别使用视觉模型）
    pub fn with_model(config: &Config, model_name: impl Into<String>) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: model_name.into(),
            temperature: config.temperature,
        }
    }

    /// 构建消息列表
    fn build_messages(request: &ChatRequest) -> AppResult<Vec<ChatCompletionRequestMessage>> {
        let mut messages = Vec::new();

        if let Some(sys_msg) = &request.system {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg.as_str())
                .build()?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = if request.images.is_empty() {
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.user.as_str())
                .build()?
        } else {
            // 使用 Vision API：文本在前，图片在后
            let mut content_parts: Vec<ChatCompletionRequestUserMessageContentPart> = Vec::new();
            content_parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: request.user.clone(),
                },
            ));
            for url in &request.images {
                content_parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImage {
                        image_url: ImageUrl {
                            url: url.clone(),
                            detail: Some(ImageDetail::High),
                        },
                    },
                ));
            }

            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
                .build()?
        };

        messages.push(ChatCompletionRequestMessage::User(user_msg));
        Ok(messages)
    }
}

#[async_trait]
impl ChatProvider for LlmService {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: ChatRequest) -> AppResult<String> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", request.user.len());
        if !request.images.is_empty() {
            debug!("包含 {} 张图片", request.images.len());
        }

        let messages = Self::build_messages(&request)?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model_name)
            .messages(messages)
            .temperature(request.temperature.unwrap_or(self.temperature));
        if let Some(max_tokens) = request.max_tokens {
            args.max_tokens(max_tokens);
        }
        let api_request = args.build()?;

        let response = self.client.chat().create(api_request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            AppError::llm_api_failed(&self.model_name, e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| LlmError::EmptyContent {
                model: self.model_name.clone(),
            })?;

        Ok(content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_text_only_messages() {
        let request = ChatRequest::new("grade this").with_system("you are a grader");
        let messages = LlmService::build_messages(&request).unwrap();

        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_build_vision_message_parts() {
        let request = ChatRequest::new("extract text").with_images(vec![
            "https://example.com/page-1.png".to_string(),
            "https://example.com/page-2.png".to_string(),
        ]);
        let messages = LlmService::build_messages(&request).unwrap();

        assert_eq!(messages.len(), 1);
        match &messages[0] {
            ChatCompletionRequestMessage::User(user) => match &user.content {
                ChatCompletionRequestUserMessageContent::Array(parts) => assert_eq!(parts.len(), 3),
                other => panic!("expected multipart content, got {:?}", other),
            },
            other => panic!("expected user message, got {:?}", other),
        }
    }

    /// 测试 LLM API 连接性
    ///
    /// 运行方式：
    /// ```bash
    /// LLM_API_KEY=... cargo test test_live_completion -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn test_live_completion() {
        let _ = tracing_subscriber::fmt::try_init();

        let service = LlmService::new(&Config::from_env());
        let response = service
            .complete(ChatRequest::new("Reply with the single word: ready").with_max_tokens(16))
            .await;

        match response {
            Ok(text) => {
                println!("LLM 响应: {}", text);
                assert!(!text.is_empty());
            }
            Err(e) => panic!("LLM 调用失败: {}", e),
        }
    }
}
