//! Agent 引擎：入站消息处理主干
//!
//! 每条消息走完整链路：意图分类 -> {路由 + 生命周期变更} | {查询} -> 事件发布 -> 回复。
//! 对用户可见的失败一律是自然语言回复字符串；只有存储后端故障以 Err 形式
//! 穿出（当前操作失败，用户输入不静默丢弃，由适配层提示重试）。

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use super::classifier::{Intent, IntentClassifier};
use super::lifecycle::{
    extract_task_number, select_task, strip_task_number, CreateOutcome, LifecycleManager,
};
use super::registry::{AgentRegistry, ConversationMemory};
use super::router::Router;
use crate::events::EventBus;
use crate::llm::{ChatMessage, CompletionClient};
use crate::model::{
    AgentProfile, AgentStatus, Person, Priority, Request, RequestStatus, Task,
};
use crate::org::OrgContext;
use crate::store::{RecordStore, StoreError};

/// general 意图的 system prompt
const RESPONDER_PROMPT: &str = r#"You are a helpful AI communication assistant. You help users by:
1. Understanding their requests and routing them to the right people
2. Tracking requests and following up automatically
3. Managing their task queue
4. Answering general questions about their team and work

Be concise, professional, and proactive. Use a friendly but efficient tone.
If you take an action, clearly state what you did.
If you need clarification, ask specific questions."#;

/// 引擎错误：仅存储后端故障会到这里，LLM 故障全部就地降级
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unknown person: {0}")]
    UnknownPerson(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 处理结果：回复文本 + 采取的动作 + 相关请求
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub text: String,
    pub action: Option<String>,
    pub request: Option<Request>,
}

impl AgentReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: None,
            request: None,
        }
    }
}

/// Agent 引擎
pub struct AgentEngine {
    llm: Arc<dyn CompletionClient>,
    store: Arc<dyn RecordStore>,
    events: Arc<EventBus>,
    classifier: IntentClassifier,
    router: Router,
    lifecycle: LifecycleManager,
    registry: AgentRegistry,
    org: RwLock<OrgContext>,
}

impl AgentEngine {
    pub fn new(
        llm: Arc<dyn CompletionClient>,
        store: Arc<dyn RecordStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(Arc::clone(&llm)),
            router: Router::new(Arc::clone(&llm)),
            lifecycle: LifecycleManager::new(Arc::clone(&store), Arc::clone(&events)),
            registry: AgentRegistry::default(),
            llm,
            store,
            events,
            org: RwLock::new(OrgContext::default()),
        }
    }

    /// 覆盖会话参数（上下文轮数 / 空闲超时）
    pub fn with_session_limits(mut self, max_context_turns: usize, idle_timeout_secs: u64) -> Self {
        self.registry = AgentRegistry::new(max_context_turns, idle_timeout_secs);
        self
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// 适配层刷新组织快照；核心只读
    pub async fn set_org_context(&self, org: OrgContext) {
        *self.org.write().await = org;
    }

    /// 首次接触注册：按平台标识或姓名查找已有 Person，缺失则创建 Person + AgentProfile
    pub async fn attach(
        &self,
        name: &str,
        platform_id: Option<&str>,
    ) -> Result<Person, EngineError> {
        let people = self.store.list_people().await?;

        let existing = people
            .iter()
            .find(|p| platform_id.is_some() && p.platform_id.as_deref() == platform_id)
            .or_else(|| people.iter().find(|p| p.name.eq_ignore_ascii_case(name)));

        if let Some(person) = existing {
            self.ensure_agent(&person.id).await?;
            self.registry.get_or_create(&person.id).await;
            return Ok(person.clone());
        }

        let mut person = Person::new(name);
        if let Some(pid) = platform_id {
            person = person.with_platform_id(pid);
        }
        let person = self.store.create_person(person).await?;
        self.store
            .create_agent(AgentProfile::new(&person.id))
            .await?;
        self.registry.get_or_create(&person.id).await;

        tracing::info!(person = %person.name, id = %person.id, "person registered on first contact");
        Ok(person)
    }

    async fn ensure_agent(&self, person_id: &str) -> Result<(), EngineError> {
        if self.store.get_agent_by_person(person_id).await?.is_none() {
            self.store
                .create_agent(AgentProfile::new(person_id))
                .await?;
        }
        Ok(())
    }

    /// 处理一条入站消息。同一人的消息串行处理（会话锁覆盖整个链路），
    /// 不同人的消息可以并发。
    pub async fn handle_message(
        &self,
        person_id: &str,
        text: &str,
    ) -> Result<AgentReply, EngineError> {
        let person = self
            .store
            .get_person(person_id)
            .await?
            .ok_or_else(|| EngineError::UnknownPerson(person_id.to_string()))?;

        let session = self.registry.get_or_create(person_id).await;
        let mut session = session.lock().await;

        if let Err(e) = self
            .store
            .set_agent_status(person_id, AgentStatus::Busy)
            .await
        {
            tracing::debug!("could not mark agent busy: {}", e);
        }

        let pending = self.store.pending_tasks(person_id).await?;
        let outgoing = self.store.list_requests_from(person_id).await?;
        let active_count = outgoing.iter().filter(|r| !r.is_terminal()).count();

        let intent = self
            .classifier
            .classify(text, pending.len(), active_count)
            .await;
        tracing::debug!(person = %person.name, ?intent, "intent classified");

        let result = match intent {
            Intent::Request => self.handle_request(&person, text).await,
            Intent::Status => self.handle_status(&outgoing).await,
            Intent::Tasks => self.handle_tasks(&pending).await,
            Intent::Respond { task_number } => {
                self.handle_respond(&person, text, task_number, &pending).await
            }
            Intent::General { .. } => {
                self.handle_general(&person, text, &session.conversation).await
            }
        };

        if let Err(e) = self
            .store
            .set_agent_status(person_id, AgentStatus::Active)
            .await
        {
            tracing::debug!("could not mark agent active: {}", e);
        }

        let reply = result?;
        session.conversation.push(ChatMessage::user(text));
        session.conversation.push(ChatMessage::assistant(&reply.text));
        session.touch();

        Ok(reply)
    }

    /// request 意图：路由并创建请求
    async fn handle_request(
        &self,
        person: &Person,
        text: &str,
    ) -> Result<AgentReply, EngineError> {
        let org = self.org.read().await.clone();
        let people: Vec<Person> = self
            .store
            .list_people()
            .await?
            .into_iter()
            .filter(|p| p.id != person.id)
            .collect();

        let decision = self.router.route(person, text, &org, &people).await;

        if decision.is_unresolved() {
            let reasoning = if decision.reasoning.trim().is_empty() {
                String::new()
            } else {
                format!(" {}", decision.reasoning.trim())
            };
            return Ok(AgentReply::text(format!(
                "I couldn't determine who should handle this.{}\n\nCould you tell me who to ask, or which team this is for?",
                reasoning
            )));
        }

        match self
            .lifecycle
            .create_request(person, &decision, text, &org)
            .await?
        {
            CreateOutcome::Created {
                request, target, ..
            } => Ok(AgentReply {
                text: format!(
                    "✅ I've sent your request to **{}**.\n\n**Request:** {}\n\nI'll track this and follow up if needed. You can check status anytime by asking me.",
                    target.name, request.description
                ),
                action: Some("request_created".to_string()),
                request: Some(request),
            }),
            CreateOutcome::NoTarget => Ok(AgentReply::text(
                "I found a potential match but couldn't locate the specific person. Could you help me identify who to ask?",
            )),
        }
    }

    /// status 意图：列出在途请求
    async fn handle_status(&self, outgoing: &[Request]) -> Result<AgentReply, EngineError> {
        let active: Vec<&Request> = outgoing.iter().filter(|r| !r.is_terminal()).collect();

        if active.is_empty() {
            return Ok(AgentReply::text(
                "You don't have any active outgoing requests. Need to send one?",
            ));
        }

        let mut lines = Vec::new();
        for request in active.iter().take(10) {
            let target_name = match &request.to_person_id {
                Some(id) => self
                    .store
                    .get_person(id)
                    .await?
                    .map(|p| p.name)
                    .unwrap_or_else(|| "Unknown".to_string()),
                None => "Unknown".to_string(),
            };
            let emoji = match request.status {
                RequestStatus::Pending => "⏳",
                RequestStatus::InProgress => "🔄",
                RequestStatus::WaitingResponse => "💬",
                _ => "📋",
            };
            lines.push(format!(
                "{} **{}** → {} ({})",
                emoji,
                request.subject,
                target_name,
                request.status.as_str()
            ));
        }

        Ok(AgentReply::text(format!(
            "**Your Active Requests ({}):**\n\n{}",
            active.len(),
            lines.join("\n")
        )))
    }

    /// tasks 意图：列出任务队列；不改动任何记录
    async fn handle_tasks(&self, pending: &[Task]) -> Result<AgentReply, EngineError> {
        if pending.is_empty() {
            return Ok(AgentReply::text("🎉 No pending tasks! You're all caught up."));
        }

        let mut lines = Vec::new();
        for (i, task) in pending.iter().take(10).enumerate() {
            let from_name = match self.store.get_request(&task.request_id).await? {
                Some(request) => self
                    .store
                    .get_person(&request.from_person_id)
                    .await?
                    .map(|p| p.name)
                    .unwrap_or_else(|| "Unknown".to_string()),
                None => "Unknown".to_string(),
            };
            let emoji = match task.priority {
                Priority::Urgent => "🔴",
                Priority::High => "🟠",
                Priority::Normal => "🔵",
                Priority::Low => "⚪",
            };
            let description: String = task.description.chars().take(100).collect();
            let ellipsis = if task.description.chars().count() > 100 {
                "..."
            } else {
                ""
            };
            lines.push(format!(
                "{}. {} **{}** (from {})\n   {}{}",
                i + 1,
                emoji,
                task.title,
                from_name,
                description,
                ellipsis
            ));
        }

        Ok(AgentReply::text(format!(
            "**Your Task Queue ({}):**\n\n{}\n\n*Reply with a number to respond to that task.*",
            pending.len(),
            lines.join("\n\n")
        )))
    }

    /// respond 意图：定位任务并完成其关联请求
    async fn handle_respond(
        &self,
        person: &Person,
        text: &str,
        task_number: Option<usize>,
        pending: &[Task],
    ) -> Result<AgentReply, EngineError> {
        if pending.is_empty() {
            return Ok(AgentReply::text(
                "You don't have any pending tasks to respond to.",
            ));
        }

        let number = task_number.or_else(|| extract_task_number(text));
        let task = match select_task(pending, number) {
            Some(t) => t,
            None => {
                return Ok(AgentReply::text(
                    "You don't have any pending tasks to respond to.",
                ))
            }
        };

        let response_text = strip_task_number(text);

        match self
            .lifecycle
            .complete_request(person, &task.request_id, &response_text)
            .await
        {
            Ok((request, _)) => {
                let requester = self
                    .store
                    .get_person(&request.from_person_id)
                    .await?
                    .map(|p| p.name)
                    .unwrap_or_else(|| "requester".to_string());
                Ok(AgentReply {
                    text: format!(
                        "✅ Response sent to {}!\n\n**Your response:** \"{}\"",
                        requester, response_text
                    ),
                    action: Some("task_completed".to_string()),
                    request: Some(request),
                })
            }
            Err(StoreError::AlreadyTerminal(_)) => Ok(AgentReply::text(
                "That request is already closed, so I didn't record another response.",
            )),
            Err(StoreError::NotFound(_)) => Ok(AgentReply::text(
                "Couldn't find the associated request. Please try again.",
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// general 意图：带组织上下文与记忆召回的普通对话
    async fn handle_general(
        &self,
        person: &Person,
        text: &str,
        conversation: &ConversationMemory,
    ) -> Result<AgentReply, EngineError> {
        let org = self.org.read().await.clone();
        let people = self.store.list_people().await?;

        let members: Vec<String> = people
            .iter()
            .filter(|p| p.id != person.id)
            .take(10)
            .map(|p| p.name.clone())
            .collect();
        let teams: Vec<String> = org.teams.iter().map(|t| t.name.clone()).collect();

        let notes = match self
            .store
            .search_memory_notes(&person.id, text, chrono::Utc::now())
            .await
        {
            Ok(notes) => notes,
            Err(e) => {
                tracing::warn!("memory recall failed: {}", e);
                Vec::new()
            }
        };

        let mut context = format!(
            "You're helping {} ({}).\n\nTeam members: {}\nTeams: {}",
            person.name,
            person.role.as_deref().unwrap_or("team member"),
            members.join(", "),
            teams.join(", ")
        );
        if !notes.is_empty() {
            context.push_str("\nRelevant notes:");
            for note in notes.iter().take(5) {
                context.push_str(&format!("\n- {}", note.content));
            }
        }

        let mut messages: Vec<ChatMessage> = conversation.messages().to_vec();
        messages.push(ChatMessage::user(format!(
            "{}\n\nUser message: {}",
            context, text
        )));

        match self.llm.complete(&messages, Some(RESPONDER_PROMPT)).await {
            Ok(reply) => Ok(AgentReply::text(reply)),
            Err(e) => {
                tracing::warn!("responder call failed: {}", e);
                Ok(AgentReply::text(
                    "Sorry, I couldn't reach my language backend just now. Please try again in a moment.",
                ))
            }
        }
    }
}
