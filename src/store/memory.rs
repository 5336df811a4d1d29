//! 内存存储
//!
//! 单个 RwLock 保护全部表；复合操作在一次写锁内完成，天然满足原子性要求。
//! 测试与无持久化部署的默认实现。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::traits::{sort_requests, sort_tasks, RecordStore, StoreError};
use crate::model::{
    AgentProfile, AgentStatus, MemoryNote, MessageRecord, Person, Request, RequestStatus, Task,
    TaskStatus,
};

#[derive(Default)]
struct Tables {
    people: HashMap<String, Person>,
    /// person_id -> AgentProfile（与 Person 一一对应）
    agents: HashMap<String, AgentProfile>,
    requests: HashMap<String, Request>,
    tasks: HashMap<String, Task>,
    messages: Vec<MessageRecord>,
    /// owner_person_id -> notes
    notes: HashMap<String, Vec<MemoryNote>>,
}

/// 内存版记录存储
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_person(&self, person: Person) -> Result<Person, StoreError> {
        let mut t = self.tables.write().await;
        t.people.insert(person.id.clone(), person.clone());
        Ok(person)
    }

    async fn get_person(&self, id: &str) -> Result<Option<Person>, StoreError> {
        Ok(self.tables.read().await.people.get(id).cloned())
    }

    async fn list_people(&self) -> Result<Vec<Person>, StoreError> {
        let t = self.tables.read().await;
        let mut people: Vec<_> = t.people.values().cloned().collect();
        people.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(people)
    }

    async fn update_person(&self, person: Person) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if !t.people.contains_key(&person.id) {
            return Err(StoreError::NotFound(person.id));
        }
        t.people.insert(person.id.clone(), person);
        Ok(())
    }

    async fn create_agent(&self, agent: AgentProfile) -> Result<AgentProfile, StoreError> {
        let mut t = self.tables.write().await;
        t.agents.insert(agent.person_id.clone(), agent.clone());
        Ok(agent)
    }

    async fn get_agent_by_person(
        &self,
        person_id: &str,
    ) -> Result<Option<AgentProfile>, StoreError> {
        Ok(self.tables.read().await.agents.get(person_id).cloned())
    }

    async fn set_agent_status(
        &self,
        person_id: &str,
        status: AgentStatus,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        match t.agents.get_mut(person_id) {
            Some(agent) => {
                agent.status = status;
                Ok(())
            }
            None => Err(StoreError::NotFound(person_id.to_string())),
        }
    }

    async fn list_agents(
        &self,
        status: Option<AgentStatus>,
    ) -> Result<Vec<AgentProfile>, StoreError> {
        let t = self.tables.read().await;
        let mut agents: Vec<_> = t
            .agents
            .values()
            .filter(|a| status.map(|s| a.status == s).unwrap_or(true))
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(agents)
    }

    async fn create_request_with_task(
        &self,
        request: Request,
        task: Task,
    ) -> Result<(Request, Task), StoreError> {
        let mut t = self.tables.write().await;
        t.requests.insert(request.id.clone(), request.clone());
        t.tasks.insert(task.id.clone(), task.clone());
        Ok((request, task))
    }

    async fn get_request(&self, id: &str) -> Result<Option<Request>, StoreError> {
        Ok(self.tables.read().await.requests.get(id).cloned())
    }

    async fn list_requests_from(&self, person_id: &str) -> Result<Vec<Request>, StoreError> {
        let t = self.tables.read().await;
        let mut requests: Vec<_> = t
            .requests
            .values()
            .filter(|r| r.from_person_id == person_id)
            .cloned()
            .collect();
        sort_requests(&mut requests);
        Ok(requests)
    }

    async fn update_request_status(
        &self,
        id: &str,
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> Result<Request, StoreError> {
        let mut t = self.tables.write().await;
        let request = t
            .requests
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if request.is_terminal() {
            return Err(StoreError::AlreadyTerminal(id.to_string()));
        }
        request.status = status;
        request.updated_at = now;
        Ok(request.clone())
    }

    async fn complete_request(
        &self,
        id: &str,
        response: &str,
        now: DateTime<Utc>,
    ) -> Result<(Request, Option<Task>), StoreError> {
        let mut t = self.tables.write().await;
        let request = t
            .requests
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if request.is_terminal() {
            return Err(StoreError::AlreadyTerminal(id.to_string()));
        }

        request.status = RequestStatus::Completed;
        request.response = Some(response.to_string());
        request.updated_at = now;
        request.completed_at = Some(now);
        let request = request.clone();

        let mut completed_task = None;
        for task in t.tasks.values_mut() {
            if task.request_id == id && task.status != TaskStatus::Completed {
                task.status = TaskStatus::Completed;
                task.completed_at = Some(now);
                if completed_task.is_none() {
                    completed_task = Some(task.clone());
                }
            }
        }

        Ok((request, completed_task))
    }

    async fn cancel_request(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Request, StoreError> {
        let mut t = self.tables.write().await;
        let request = t
            .requests
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if request.is_terminal() {
            return Err(StoreError::AlreadyTerminal(id.to_string()));
        }

        request.status = RequestStatus::Cancelled;
        request.updated_at = now;
        let request = request.clone();

        for task in t.tasks.values_mut() {
            if task.request_id == id && task.status != TaskStatus::Completed {
                task.status = TaskStatus::Deferred;
            }
        }

        Ok(request)
    }

    async fn record_follow_up(
        &self,
        id: &str,
        max_follow_ups: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Request>, StoreError> {
        let mut t = self.tables.write().await;
        let request = t
            .requests
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if request.is_terminal() || request.follow_up_count >= max_follow_ups {
            return Ok(None);
        }

        request.follow_up_count += 1;
        request.last_follow_up = Some(now);
        request.updated_at = now;
        Ok(Some(request.clone()))
    }

    async fn create_task(&self, task: Task) -> Result<Task, StoreError> {
        let mut t = self.tables.write().await;
        if !t.requests.contains_key(&task.request_id) {
            return Err(StoreError::NotFound(task.request_id));
        }
        let duplicate = t.tasks.values().any(|existing| {
            existing.owner_person_id == task.owner_person_id
                && existing.request_id == task.request_id
        });
        if duplicate {
            return Err(StoreError::DuplicateTask(task.request_id));
        }
        t.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.tables.read().await.tasks.get(id).cloned())
    }

    async fn pending_tasks(&self, owner_person_id: &str) -> Result<Vec<Task>, StoreError> {
        let t = self.tables.read().await;
        let mut tasks: Vec<_> = t
            .tasks
            .values()
            .filter(|t| t.owner_person_id == owner_person_id && t.status == TaskStatus::Pending)
            .cloned()
            .collect();
        sort_tasks(&mut tasks);
        Ok(tasks)
    }

    async fn append_message(
        &self,
        message: MessageRecord,
    ) -> Result<MessageRecord, StoreError> {
        let mut t = self.tables.write().await;
        t.messages.push(message.clone());
        Ok(message)
    }

    async fn messages_for_request(
        &self,
        request_id: &str,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.messages
            .iter()
            .filter(|m| m.request_id.as_deref() == Some(request_id))
            .cloned()
            .collect())
    }

    async fn create_memory_note(&self, note: MemoryNote) -> Result<MemoryNote, StoreError> {
        let mut t = self.tables.write().await;
        t.notes
            .entry(note.owner_person_id.clone())
            .or_default()
            .push(note.clone());
        Ok(note)
    }

    async fn search_memory_notes(
        &self,
        owner_person_id: &str,
        query: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemoryNote>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.notes
            .get(owner_person_id)
            .map(|notes| {
                notes
                    .iter()
                    .filter(|n| n.matches(query, now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
