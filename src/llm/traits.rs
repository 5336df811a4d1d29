//! 补全服务抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 CompletionClient：一次阻塞式往返，
//! 无状态、无副作用；分类、路由、跟进生成各自只发一次调用，失败不重试。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 消息角色（与补全 API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条对话消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 补全客户端 trait
///
/// 调用方必须容忍任意纯文本或非法 JSON 的回复；解析失败走各自的安全默认值。
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// 非流式补全：一组消息 + 可选 system prompt，返回完整文本
    async fn complete(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
    ) -> Result<String, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
