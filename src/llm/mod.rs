//! 补全服务层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockCompletionClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{ChatMessage, CompletionClient, Role};
