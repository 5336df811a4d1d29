//! Courier - Rust 团队沟通智能体系统
//!
//! 每个人有一个专属 Agent 代理：理解自然语言请求、路由到合适的同事、
//! 追踪请求生命周期，并对长期无人响应的请求自动跟进。
//!
//! 模块划分：
//! - **agent**: 编排核心（意图分类、路由、生命周期、会话注册表）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **events**: 进程内事件总线（类型订阅 + 通配）
//! - **followup**: 跟进调度器（可注入时钟，便于测试）
//! - **llm**: 补全服务抽象与实现（OpenAI 兼容 / Mock）
//! - **model**: 数据模型（Person / Request / Task / Message / MemoryNote）
//! - **org**: 组织上下文快照（团队 / 频道 / 路由规则）
//! - **store**: 记录存储（内存 / SQLite）

pub mod agent;
pub mod config;
pub mod events;
pub mod followup;
pub mod llm;
pub mod model;
pub mod org;
pub mod store;

pub use agent::{AgentEngine, AgentReply, EngineError};
pub use events::{Event, EventBus, EventKind};
pub use followup::{FollowUpConfig, FollowUpScheduler};
