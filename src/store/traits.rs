//! 记录存储抽象层
//!
//! 定义统一的 CRUD 接口，支持内存和 SQLite 两种实现。
//!
//! 三个复合操作必须原子执行（单写者语义）：
//! - `create_request_with_task`：Request 与镜像 Task 同生共死
//! - `complete_request`：状态检查 + 写响应 + 完成关联任务，按请求 ID 串行
//! - `record_follow_up`：派发前在锁内重新校验状态与次数

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    AgentProfile, AgentStatus, MemoryNote, MessageRecord, Person, Request, RequestStatus, Task,
};

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// 请求已处于终态（completed / cancelled），拒绝再次变更
    #[error("request already terminal: {0}")]
    AlreadyTerminal(String),

    /// (owner, request) 对已存在任务
    #[error("task already exists for request {0}")]
    DuplicateTask(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// 记录存储接口
///
/// 列表操作按 优先级降序、创建时间升序 排序（任务/请求队列约定）。
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ---- Person ----

    async fn create_person(&self, person: Person) -> Result<Person, StoreError>;

    async fn get_person(&self, id: &str) -> Result<Option<Person>, StoreError>;

    async fn list_people(&self) -> Result<Vec<Person>, StoreError>;

    /// 更新档案字段（按 id 整条覆盖）
    async fn update_person(&self, person: Person) -> Result<(), StoreError>;

    // ---- Agent ----

    async fn create_agent(&self, agent: AgentProfile) -> Result<AgentProfile, StoreError>;

    async fn get_agent_by_person(&self, person_id: &str)
        -> Result<Option<AgentProfile>, StoreError>;

    async fn set_agent_status(
        &self,
        person_id: &str,
        status: AgentStatus,
    ) -> Result<(), StoreError>;

    async fn list_agents(&self, status: Option<AgentStatus>)
        -> Result<Vec<AgentProfile>, StoreError>;

    // ---- Request ----

    /// 原子创建 Request + 接收方 Task；两者要么都存在要么都不存在
    async fn create_request_with_task(
        &self,
        request: Request,
        task: Task,
    ) -> Result<(Request, Task), StoreError>;

    async fn get_request(&self, id: &str) -> Result<Option<Request>, StoreError>;

    /// 某人发出的全部请求
    async fn list_requests_from(&self, person_id: &str) -> Result<Vec<Request>, StoreError>;

    /// 非终态间的状态迁移；请求已终态时返回 AlreadyTerminal
    async fn update_request_status(
        &self,
        id: &str,
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> Result<Request, StoreError>;

    /// 完成请求：写入响应、打完成时间戳、完成所有关联任务。
    /// 已终态（含 cancelled）返回 AlreadyTerminal，不做任何改动。
    async fn complete_request(
        &self,
        id: &str,
        response: &str,
        now: DateTime<Utc>,
    ) -> Result<(Request, Option<Task>), StoreError>;

    /// 取消请求：非终态 -> cancelled，关联未完成任务转 deferred
    async fn cancel_request(&self, id: &str, now: DateTime<Utc>)
        -> Result<Request, StoreError>;

    /// 跟进记账（CAS）：锁内重查状态与次数，合格则 count+1 并盖 last_follow_up；
    /// 选中后已变终态或额度用尽时返回 Ok(None)，调用方静默跳过
    async fn record_follow_up(
        &self,
        id: &str,
        max_follow_ups: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Request>, StoreError>;

    // ---- Task ----

    /// 创建镜像任务；同一 (owner, request) 已有任务时返回 DuplicateTask
    async fn create_task(&self, task: Task) -> Result<Task, StoreError>;

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError>;

    /// 某人待处理任务，优先级降序、创建时间升序
    async fn pending_tasks(&self, owner_person_id: &str) -> Result<Vec<Task>, StoreError>;

    // ---- Message ----

    async fn append_message(&self, message: MessageRecord)
        -> Result<MessageRecord, StoreError>;

    async fn messages_for_request(
        &self,
        request_id: &str,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    // ---- Memory ----

    async fn create_memory_note(&self, note: MemoryNote) -> Result<MemoryNote, StoreError>;

    /// 占位子串检索（忽略大小写，跳过已过期条目）
    async fn search_memory_notes(
        &self,
        owner_person_id: &str,
        query: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemoryNote>, StoreError>;
}

/// 队列排序：优先级降序，同级按创建时间升序
pub(crate) fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
    });
}

/// 同 sort_tasks，作用于请求列表
pub(crate) fn sort_requests(requests: &mut [Request]) {
    requests.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
    });
}
