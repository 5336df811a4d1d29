//! Agent 编排层：意图分类、路由、生命周期、会话注册表与消息处理主干

pub mod classifier;
pub mod engine;
pub mod lifecycle;
pub mod registry;
pub mod router;

pub use classifier::{Intent, IntentClassifier};
pub use engine::{AgentEngine, AgentReply, EngineError};
pub use lifecycle::{CreateOutcome, LifecycleManager};
pub use registry::{AgentRegistry, AgentSession, ConversationMemory};
pub use router::{Router, RoutingDecision};
