//! Mock 补全客户端（用于测试，无需 API）
//!
//! 按脚本顺序弹出预置回复；脚本耗尽时回显最后一条 User 消息。
//! 记录调用次数，便于断言"规则预过滤未触发 LLM 调用"之类的行为。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{ChatMessage, CompletionClient, Role};

/// Mock 客户端：预置回复队列 + 调用计数
#[derive(Debug, Default)]
pub struct MockCompletionClient {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicU64,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一组按序返回的回复
    pub fn with_replies(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            calls: AtomicU64::new(0),
        }
    }

    /// 追加一条预置回复
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply.into());
    }

    /// 累计 complete 调用次数
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _system_prompt: Option<&str>,
    ) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(reply) = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return Ok(reply);
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("Echo from Mock: {}", last_user))
    }
}
