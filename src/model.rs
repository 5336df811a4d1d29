//! 数据模型
//!
//! 核心记录类型：Person / AgentProfile / Request / Task / MessageRecord / MemoryNote。
//! 所有 ID 为 `{前缀}_{uuid}` 字符串，时间戳统一使用 UTC。
//! Request 不做物理删除（审计需要），终态为 completed / cancelled。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 人员 ID
pub type PersonId = String;
/// 请求 ID
pub type RequestId = String;
/// 任务 ID
pub type TaskId = String;

fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4())
}

/// 请求状态
///
/// 状态只能单调前进：pending -> in_progress / waiting_response -> completed；
/// 任意非终态可转 cancelled。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// 已创建，等待处理
    Pending,
    /// 对方正在处理
    InProgress,
    /// 等待对方回复
    WaitingResponse,
    /// 已完成（response 必定已写入）
    Completed,
    /// 已取消
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::WaitingResponse => "waiting_response",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => RequestStatus::InProgress,
            "waiting_response" => RequestStatus::WaitingResponse,
            "completed" => RequestStatus::Completed,
            "cancelled" => RequestStatus::Cancelled,
            _ => RequestStatus::Pending,
        }
    }
}

/// 任务状态（接收方队列视角）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    /// 已搁置（如关联请求被取消）
    Deferred,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Deferred => "deferred",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => TaskStatus::InProgress,
            "completed" => TaskStatus::Completed,
            "deferred" => TaskStatus::Deferred,
            _ => TaskStatus::Pending,
        }
    }
}

/// 优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    pub fn parse(p: i32) -> Self {
        match p {
            0 => Priority::Low,
            2 => Priority::High,
            3 => Priority::Urgent,
            _ => Priority::Normal,
        }
    }
}

/// Agent 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
    /// 正在处理一条入站消息
    Busy,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Busy => "busy",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "inactive" => AgentStatus::Inactive,
            "busy" => AgentStatus::Busy,
            _ => AgentStatus::Active,
        }
    }
}

/// 消息类型（Agent 间通信日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    FollowUp,
    Info,
    System,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::FollowUp => "follow_up",
            MessageKind::Info => "info",
            MessageKind::System => "system",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "request" => MessageKind::Request,
            "response" => MessageKind::Response,
            "follow_up" => MessageKind::FollowUp,
            "system" => MessageKind::System,
            _ => MessageKind::Info,
        }
    }
}

/// 人员记录
///
/// 首次接触时创建；除档案字段外不可变；核心逻辑永不删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    /// 显示名
    pub name: String,
    /// 职位/角色
    pub role: Option<String>,
    pub team_id: Option<String>,
    /// 专长标签（用于路由提示）
    pub expertise: Vec<String>,
    /// 外部平台标识（如 IM 账号）
    pub platform_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Person {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id("person"),
            name: name.into(),
            role: None,
            team_id: None,
            expertise: Vec::new(),
            platform_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    pub fn with_expertise(mut self, tags: Vec<String>) -> Self {
        self.expertise = tags;
        self
    }

    pub fn with_platform_id(mut self, platform_id: impl Into<String>) -> Self {
        self.platform_id = Some(platform_id.into());
        self
    }
}

/// Agent 档案：与 Person 一一对应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub person_id: PersonId,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
}

impl AgentProfile {
    pub fn new(person_id: impl Into<String>) -> Self {
        Self {
            id: new_id("agent"),
            person_id: person_id.into(),
            status: AgentStatus::Active,
            created_at: Utc::now(),
        }
    }
}

/// 请求：一条已路由（或待路由）的委托
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub from_person_id: PersonId,
    /// 路由目标（路由完成前可为空）
    pub to_person_id: Option<PersonId>,
    pub to_team_id: Option<String>,
    /// 简短主题（<= 60 字符）
    pub subject: String,
    /// 整理后的完整请求内容
    pub description: String,
    /// 原始输入等自由上下文
    pub context: String,
    pub status: RequestStatus,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    /// 已发送的跟进次数，只增不减
    pub follow_up_count: u32,
    pub last_follow_up: Option<DateTime<Utc>>,
    /// 对方的答复；当且仅当 status == completed 时为 Some
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Request {
    pub fn new(
        from_person_id: impl Into<String>,
        subject: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("req"),
            from_person_id: from_person_id.into(),
            to_person_id: None,
            to_team_id: None,
            subject: subject.into(),
            description: description.into(),
            context: String::new(),
            status: RequestStatus::Pending,
            priority: Priority::default(),
            due_date: None,
            follow_up_count: 0,
            last_follow_up: None,
            response: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_target(mut self, person_id: impl Into<String>) -> Self {
        self.to_person_id = Some(person_id.into());
        self
    }

    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.to_team_id = Some(team_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// 任务：接收方队列中与某个 Request 对应的条目
///
/// 每个 (owner, request) 对只存在一个 Task；其完成由关联 Request 驱动。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner_person_id: PersonId,
    pub request_id: RequestId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// 由 Request 派生接收方任务
    pub fn mirror(request: &Request, owner_person_id: impl Into<String>) -> Self {
        Self {
            id: new_id("task"),
            owner_person_id: owner_person_id.into(),
            request_id: request.id.clone(),
            title: request.subject.clone(),
            description: request.description.clone(),
            status: TaskStatus::Pending,
            priority: request.priority,
            due_date: request.due_date,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// 消息日志：Agent 间通信的不可变记录，只追加
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub from_person_id: PersonId,
    pub to_person_id: Option<PersonId>,
    /// 关联的请求（可选）
    pub request_id: Option<RequestId>,
    pub kind: MessageKind,
    pub content: String,
    /// 是否对记忆系统可见
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(
        from_person_id: impl Into<String>,
        kind: MessageKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id("msg"),
            from_person_id: from_person_id.into(),
            to_person_id: None,
            request_id: None,
            kind,
            content: content.into(),
            is_public: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_recipient(mut self, person_id: impl Into<String>) -> Self {
        self.to_person_id = Some(person_id.into());
        self
    }

    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }
}

/// 记忆条目：一次写入，之后只读；按子串匹配检索
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryNote {
    pub id: String,
    pub owner_person_id: PersonId,
    /// 类别（fact / preference / summary 等自由字符串）
    pub kind: String,
    pub content: String,
    /// 来源说明（如产生该条目的对话或摘要任务）
    pub source: String,
    pub tags: Vec<String>,
    pub is_public: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MemoryNote {
    pub fn new(
        owner_person_id: impl Into<String>,
        kind: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id("note"),
            owner_person_id: owner_person_id.into(),
            kind: kind.into(),
            content: content.into(),
            source: String::new(),
            tags: Vec::new(),
            is_public: false,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_expiry(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// 占位检索：content 或 tag 含 query（忽略大小写），且未过期
    pub fn matches(&self, query: &str, now: DateTime<Utc>) -> bool {
        if let Some(expires) = self.expires_at {
            if expires <= now {
                return false;
            }
        }
        let q = query.to_lowercase();
        self.content.to_lowercase().contains(&q)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&q))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::WaitingResponse.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::InProgress,
            RequestStatus::WaitingResponse,
            RequestStatus::Completed,
            RequestStatus::Cancelled,
        ] {
            assert_eq!(RequestStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_task_mirror() {
        let request = Request::new("person_a", "Q4 report", "Send the Q4 report")
            .with_target("person_b")
            .with_priority(Priority::High);
        let task = Task::mirror(&request, "person_b");

        assert_eq!(task.owner_person_id, "person_b");
        assert_eq!(task.request_id, request.id);
        assert_eq!(task.title, "Q4 report");
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_memory_note_matches() {
        let now = Utc::now();
        let note = MemoryNote::new("person_a", "fact", "The Q4 report is due Friday")
            .with_tags(vec!["reports".to_string()]);

        assert!(note.matches("q4 REPORT", now));
        assert!(note.matches("reports", now));
        assert!(!note.matches("budget", now));

        let expired = MemoryNote::new("person_a", "fact", "old fact")
            .with_expiry(now - chrono::Duration::hours(1));
        assert!(!expired.matches("old", now));
    }
}
