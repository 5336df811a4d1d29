//! 请求 / 任务生命周期管理
//!
//! 持有状态机的唯一写入口：创建、分派、完成、取消。
//! 每个操作要么整体成功要么什么都不改（复合写交给存储层原子执行），
//! 成功后在同一调用内发布对应事件。

use std::sync::Arc;

use regex::Regex;
use std::sync::OnceLock;

use super::router::RoutingDecision;
use crate::events::{Event, EventBus};
use crate::model::{MessageKind, MessageRecord, Person, Request, Task};
use crate::org::OrgContext;
use crate::store::{RecordStore, StoreError};

/// createRequest 的结果
#[derive(Debug)]
pub enum CreateOutcome {
    /// 请求与镜像任务均已落库
    Created {
        request: Request,
        task: Task,
        target: Person,
    },
    /// 路由给出了目标，但解析不到具体的人（团队为空/不存在，或人员记录缺失）；
    /// 未创建任何记录
    NoTarget,
}

/// 生命周期管理器
pub struct LifecycleManager {
    store: Arc<dyn RecordStore>,
    events: Arc<EventBus>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn RecordStore>, events: Arc<EventBus>) -> Self {
        Self { store, events }
    }

    /// 根据路由决策创建请求：解析目标 -> 原子创建 Request + Task -> 记日志 -> 发事件。
    /// 目标解析失败时不创建任何记录。
    pub async fn create_request(
        &self,
        origin: &Person,
        decision: &RoutingDecision,
        raw_message: &str,
        org: &OrgContext,
    ) -> Result<CreateOutcome, StoreError> {
        let target = self.resolve_target(decision, org).await?;
        let target = match target {
            Some(t) => t,
            None => return Ok(CreateOutcome::NoTarget),
        };

        let mut request = Request::new(
            &origin.id,
            &decision.subject,
            &decision.formatted_request,
        )
        .with_target(&target.id)
        .with_context(raw_message);
        if let Some(team_id) = &decision.target_team_id {
            request = request.with_team(team_id);
        }

        let task = Task::mirror(&request, &target.id);
        let (request, task) = self
            .store
            .create_request_with_task(request, task)
            .await?;

        self.store
            .append_message(
                MessageRecord::new(&origin.id, MessageKind::Request, &request.description)
                    .with_recipient(&target.id)
                    .with_request(&request.id),
            )
            .await?;

        tracing::info!(
            request_id = %request.id,
            to = %target.name,
            "request created"
        );

        self.events.publish(&Event::RequestCreated {
            request: request.clone(),
            task: task.clone(),
            origin: origin.clone(),
            target: target.clone(),
        });

        Ok(CreateOutcome::Created {
            request,
            task,
            target,
        })
    }

    async fn resolve_target(
        &self,
        decision: &RoutingDecision,
        org: &OrgContext,
    ) -> Result<Option<Person>, StoreError> {
        if let Some(person_id) = &decision.target_person_id {
            return self.store.get_person(person_id).await;
        }

        if let Some(team_ref) = &decision.target_team_id {
            // 团队解析：取成员列表第一人；空团队视为未解析
            let member_id = org
                .resolve_team(team_ref)
                .and_then(|team| team.member_ids.first().cloned());
            return match member_id {
                Some(id) => self.store.get_person(&id).await,
                None => Ok(None),
            };
        }

        Ok(None)
    }

    /// 完成请求：仅非终态合法；二次调用返回 AlreadyTerminal，不覆盖已有响应
    pub async fn complete_request(
        &self,
        responder: &Person,
        request_id: &str,
        response_text: &str,
    ) -> Result<(Request, Option<Task>), StoreError> {
        let (request, task) = self
            .store
            .complete_request(request_id, response_text, chrono::Utc::now())
            .await?;

        self.store
            .append_message(
                MessageRecord::new(&responder.id, MessageKind::Response, response_text)
                    .with_recipient(&request.from_person_id)
                    .with_request(&request.id),
            )
            .await?;

        tracing::info!(request_id = %request.id, "request completed");

        self.events.publish(&Event::RequestCompleted {
            request: request.clone(),
            task: task.clone(),
            responder: responder.clone(),
        });

        Ok((request, task))
    }

    /// 取消请求：非终态 -> cancelled；关联未完成任务转 deferred
    pub async fn cancel_request(&self, request_id: &str) -> Result<Request, StoreError> {
        let request = self
            .store
            .cancel_request(request_id, chrono::Utc::now())
            .await?;
        tracing::info!(request_id = %request.id, "request cancelled");
        Ok(request)
    }

    /// 接收方镜像：为已存在的 Request 创建本地 Task（不复制 Request）。
    /// 同一 (owner, request) 的重复镜像被存储层拒绝。
    pub async fn receive_incoming(
        &self,
        request_id: &str,
        owner: &Person,
    ) -> Result<Task, StoreError> {
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;

        let task = self.store.create_task(Task::mirror(&request, &owner.id)).await?;

        self.events.publish(&Event::TaskCreated {
            task: task.clone(),
            request,
            owner: owner.clone(),
        });

        Ok(task)
    }
}

/// respond 意图的任务定位：默认取队首（已按优先级降序、创建时间升序排好），
/// 1 起始编号越界时回落到队首而不是报错
pub fn select_task<'a>(tasks: &'a [Task], task_number: Option<usize>) -> Option<&'a Task> {
    if tasks.is_empty() {
        return None;
    }
    let index = task_number
        .and_then(|n| n.checked_sub(1))
        .filter(|i| *i < tasks.len())
        .unwrap_or(0);
    tasks.get(index)
}

fn number_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)[.:\s]").unwrap())
}

fn strip_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+[.:\s]+").unwrap())
}

/// 从消息开头提取 1 起始的任务编号（如 "2. done" -> 2）
pub fn extract_task_number(message: &str) -> Option<usize> {
    number_prefix_re()
        .captures(message.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .filter(|n| *n > 0)
}

/// 去掉编号前缀后的正文（作为响应文本存储）
pub fn strip_task_number(message: &str) -> String {
    strip_prefix_re()
        .replace(message.trim(), "")
        .trim()
        .to_string()
}
