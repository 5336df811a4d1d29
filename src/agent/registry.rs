//! Agent 会话注册表
//!
//! 按 person_id 管理在线会话（不绑定任何传输连接）：首次接触创建，
//! 空闲超时驱逐并把对应 AgentProfile 置为 inactive。
//! 每个会话持锁处理一条入站消息，同一人串行、不同人并行。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use crate::llm::ChatMessage;
use crate::model::{AgentStatus, PersonId};
use crate::store::RecordStore;

/// 短期记忆：最近 N 轮对话（每轮 user + assistant，实际保留约 max_turns*2 条）
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<ChatMessage>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns,
        }
    }

    pub fn push(&mut self, msg: ChatMessage) {
        self.messages.push(msg);
        self.prune();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// 超出 max_turns*2 时丢弃最旧的消息
    fn prune(&mut self) {
        if self.messages.len() > self.max_turns * 2 {
            let keep = self.max_turns * 2;
            self.messages.drain(..self.messages.len() - keep);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// 单个 Agent 会话
pub struct AgentSession {
    pub person_id: PersonId,
    /// 对话上下文（general 意图使用）
    pub conversation: ConversationMemory,
    pub last_active: Instant,
    pub created_at: Instant,
}

impl AgentSession {
    fn new(person_id: String, max_context_turns: usize) -> Self {
        Self {
            person_id,
            conversation: ConversationMemory::new(max_context_turns),
            last_active: Instant::now(),
            created_at: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_active.elapsed() > timeout
    }
}

/// 会话注册表
pub struct AgentRegistry {
    /// person_id -> 会话
    sessions: RwLock<HashMap<PersonId, Arc<Mutex<AgentSession>>>>,
    max_context_turns: usize,
    idle_timeout: Duration,
}

impl AgentRegistry {
    pub fn new(max_context_turns: usize, idle_timeout_secs: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_context_turns,
            idle_timeout: Duration::from_secs(idle_timeout_secs),
        }
    }

    /// 获取或创建某人的会话
    pub async fn get_or_create(&self, person_id: &str) -> Arc<Mutex<AgentSession>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(person_id) {
                return Arc::clone(session);
            }
        }

        let mut sessions = self.sessions.write().await;
        // 双检：写锁等待期间可能已被别的调用创建
        if let Some(session) = sessions.get(person_id) {
            return Arc::clone(session);
        }
        let session = Arc::new(Mutex::new(AgentSession::new(
            person_id.to_string(),
            self.max_context_turns,
        )));
        sessions.insert(person_id.to_string(), Arc::clone(&session));
        session
    }

    /// 清理空闲超时的会话，并把对应 Agent 置为 inactive。
    /// 正在处理消息（持锁）的会话不会被驱逐。
    pub async fn cleanup_expired(&self, store: &dyn RecordStore) -> usize {
        let mut expired = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (person_id, session) in sessions.iter() {
                if let Ok(guard) = session.try_lock() {
                    if guard.is_expired(self.idle_timeout) {
                        expired.push(person_id.clone());
                    }
                }
            }
        }

        let mut sessions = self.sessions.write().await;
        let mut removed = 0;
        for person_id in expired {
            if sessions.remove(&person_id).is_some() {
                removed += 1;
                if let Err(e) = store
                    .set_agent_status(&person_id, AgentStatus::Inactive)
                    .await
                {
                    tracing::warn!("failed to deactivate agent {}: {}", person_id, e);
                }
            }
        }

        if removed > 0 {
            tracing::info!("evicted {} idle agent sessions", removed);
        }
        removed
    }

    /// 活跃会话数
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(20, 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AgentProfile;
    use crate::store::MemoryStore;

    #[test]
    fn test_conversation_prune() {
        let mut memory = ConversationMemory::new(2);
        for i in 0..10 {
            memory.push(ChatMessage::user(format!("msg {}", i)));
        }
        assert_eq!(memory.len(), 4);
        assert_eq!(memory.messages()[0].content, "msg 6");
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_session() {
        let registry = AgentRegistry::new(20, 3600);
        let a = registry.get_or_create("person_a").await;
        let b = registry.get_or_create("person_a").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_deactivates_agent() {
        let store = MemoryStore::new();
        store
            .create_agent(AgentProfile::new("person_a"))
            .await
            .unwrap();

        // 超时设为 0 秒，任何已存在的会话都视为过期
        let registry = AgentRegistry::new(20, 0);
        registry.get_or_create("person_a").await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let removed = registry.cleanup_expired(&store).await;
        assert_eq!(removed, 1);
        assert_eq!(registry.active_count().await, 0);

        let agent = store.get_agent_by_person("person_a").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Inactive);
    }

    #[tokio::test]
    async fn test_busy_session_not_evicted() {
        let store = MemoryStore::new();
        store
            .create_agent(AgentProfile::new("person_a"))
            .await
            .unwrap();

        let registry = AgentRegistry::new(20, 0);
        let session = registry.get_or_create("person_a").await;
        let _guard = session.lock().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let removed = registry.cleanup_expired(&store).await;
        assert_eq!(removed, 0);
        assert_eq!(registry.active_count().await, 1);
    }
}
