//! 意图分类
//!
//! 将一条自由文本消息归入固定意图集合（request / status / tasks / respond / general）。
//! 单次补全调用，prompt 内嵌消息与用户当前待办/在途请求数；回复按固定 JSON 结构解析。
//! 任何解析失败都安全回落到 general，绝不向调用方抛错，也不重试。

use std::sync::Arc;

use serde::Deserialize;

use crate::llm::{ChatMessage, CompletionClient};

/// 分类 system prompt
const CLASSIFIER_PROMPT: &str = r#"You are a message intent classifier. Analyze the user's message and classify their intent.

Respond with JSON only:
{
  "intent": "request" | "status" | "tasks" | "respond" | "general",
  "task_number": null or number if responding to a specific task,
  "details": "any relevant details"
}

Intent types:
- "request": User wants something from someone else (needs routing to another person)
- "status": User asking about status of their outgoing requests
- "tasks": User asking what they need to do / their task queue
- "respond": User responding to a task in their queue (often starts with a number)
- "general": General question, chat, or information request"#;

/// 识别出的意图
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// 要找别人办事，需要路由
    Request,
    /// 询问自己发出请求的状态
    Status,
    /// 查看自己的任务队列
    Tasks,
    /// 回复队列中的某个任务（可带 1 起始的编号）
    Respond { task_number: Option<usize> },
    /// 普通对话 / 提问
    General { detail: Option<String> },
}

/// 分类回复的固定 JSON 结构
#[derive(Debug, Deserialize)]
struct ClassifierReply {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    task_number: Option<i64>,
    #[serde(default)]
    details: Option<String>,
}

/// 解析结果三分：有效 / 结构合法但语义为空 / 格式非法
enum Parsed {
    Valid(Intent),
    Empty,
    Malformed,
}

/// 意图分类器
pub struct IntentClassifier {
    llm: Arc<dyn CompletionClient>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn CompletionClient>) -> Self {
        Self { llm }
    }

    /// 分类一条用户消息；永不失败
    pub async fn classify(
        &self,
        message: &str,
        pending_task_count: usize,
        active_request_count: usize,
    ) -> Intent {
        let user = format!(
            "Message to classify:\n\"{}\"\n\nContext:\nUser has {} pending tasks in their queue.\nUser has {} active outgoing requests.",
            message, pending_task_count, active_request_count
        );

        let reply = match self
            .llm
            .complete(&[ChatMessage::user(user)], Some(CLASSIFIER_PROMPT))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("classifier call failed, falling back to general: {}", e);
                return Intent::General { detail: None };
            }
        };

        match parse_reply(&reply) {
            Parsed::Valid(intent) => intent,
            Parsed::Empty => {
                tracing::warn!("empty classification, falling back to general");
                Intent::General { detail: None }
            }
            Parsed::Malformed => {
                tracing::warn!("malformed classification reply, falling back to general");
                Intent::General { detail: None }
            }
        }
    }
}

fn parse_reply(text: &str) -> Parsed {
    let reply: ClassifierReply = match from_json_loose(text) {
        Some(r) => r,
        None => return Parsed::Malformed,
    };

    let task_number = reply
        .task_number
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0);

    match reply.intent.as_deref() {
        Some("request") => Parsed::Valid(Intent::Request),
        Some("status") => Parsed::Valid(Intent::Status),
        Some("tasks") => Parsed::Valid(Intent::Tasks),
        Some("respond") => Parsed::Valid(Intent::Respond { task_number }),
        Some("general") => Parsed::Valid(Intent::General {
            detail: reply.details,
        }),
        // 结构合法但 intent 缺失或未知
        _ => Parsed::Empty,
    }
}

/// 宽松 JSON 解析：先整体解析，失败后截取首个 '{' 到末个 '}' 再试
/// （模型偶尔会把 JSON 包在说明文字或代码块里）
pub(crate) fn from_json_loose<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockCompletionClient;

    async fn classify_with(reply: &str) -> Intent {
        let llm = Arc::new(MockCompletionClient::with_replies(&[reply]));
        IntentClassifier::new(llm).classify("test", 0, 0).await
    }

    #[tokio::test]
    async fn test_all_known_intents() {
        assert_eq!(
            classify_with(r#"{"intent": "request", "task_number": null, "details": ""}"#).await,
            Intent::Request
        );
        assert_eq!(classify_with(r#"{"intent": "status"}"#).await, Intent::Status);
        assert_eq!(classify_with(r#"{"intent": "tasks"}"#).await, Intent::Tasks);
        assert_eq!(
            classify_with(r#"{"intent": "respond", "task_number": 2}"#).await,
            Intent::Respond {
                task_number: Some(2)
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_reply_falls_back_to_general() {
        assert_eq!(
            classify_with("I think this is a request").await,
            Intent::General { detail: None }
        );
    }

    #[tokio::test]
    async fn test_empty_reply_falls_back_to_general() {
        assert_eq!(
            classify_with(r#"{"task_number": 1}"#).await,
            Intent::General { detail: None }
        );
        assert_eq!(
            classify_with(r#"{"intent": "make_coffee"}"#).await,
            Intent::General { detail: None }
        );
    }

    #[tokio::test]
    async fn test_json_wrapped_in_prose_still_parses() {
        let reply = "Sure, here is the classification:\n```json\n{\"intent\": \"tasks\"}\n```";
        assert_eq!(classify_with(reply).await, Intent::Tasks);
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_general() {
        // 脚本耗尽时 Mock 会回显纯文本，等价于格式非法
        let llm = Arc::new(MockCompletionClient::new());
        let intent = IntentClassifier::new(llm).classify("hello", 0, 0).await;
        assert_eq!(intent, Intent::General { detail: None });
    }

    #[tokio::test]
    async fn test_nonpositive_task_number_dropped() {
        assert_eq!(
            classify_with(r#"{"intent": "respond", "task_number": 0}"#).await,
            Intent::Respond { task_number: None }
        );
        assert_eq!(
            classify_with(r#"{"intent": "respond", "task_number": -3}"#).await,
            Intent::Respond { task_number: None }
        );
    }
}
