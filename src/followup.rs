//! 跟进调度器
//!
//! 周期性扫描每个活跃 Agent 的在途请求，对过期未动的请求生成并发送提醒。
//! 时间源抽象为 Clock trait，测试无需等待真实墙钟；选中后派发前由存储层
//! 在锁内重查状态与次数（record_follow_up），保证不给已完成的请求发提醒。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

use crate::events::{Event, EventBus};
use crate::llm::{ChatMessage, CompletionClient};
use crate::model::{MessageKind, MessageRecord, Person, Request};
use crate::store::{RecordStore, StoreError};

/// 跟进生成 system prompt
const FOLLOW_UP_PROMPT: &str = r#"Generate a polite but professional follow-up message for a pending request.
Keep it brief and action-oriented. Include:
- Brief context about the original request
- Clear ask for an update or response
- Offer to help if there are blockers"#;

/// 时间源抽象
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统墙钟
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 调度参数
#[derive(Debug, Clone)]
pub struct FollowUpConfig {
    /// 扫描间隔（秒）
    pub interval_secs: u64,
    /// 多久未动视为过期（小时）
    pub stale_after_hours: i64,
    /// 单个请求最多跟进几次
    pub max_follow_ups: u32,
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            stale_after_hours: 24,
            max_follow_ups: 3,
        }
    }
}

/// 跟进调度器
pub struct FollowUpScheduler {
    store: Arc<dyn RecordStore>,
    llm: Arc<dyn CompletionClient>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: FollowUpConfig,
}

impl FollowUpScheduler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        llm: Arc<dyn CompletionClient>,
        events: Arc<EventBus>,
        config: FollowUpConfig,
    ) -> Self {
        Self {
            store,
            llm,
            events,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// 注入自定义时间源（测试用）
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 选中条件：非终态、次数未用尽、距上次跟进（或创建）已满 stale_after
    fn is_due(&self, request: &Request, now: DateTime<Utc>) -> bool {
        if request.is_terminal() || request.follow_up_count >= self.config.max_follow_ups {
            return false;
        }
        let reference = request.last_follow_up.unwrap_or(request.created_at);
        now - reference >= Duration::hours(self.config.stale_after_hours)
    }

    /// 扫描某人发出的请求并派发到期跟进；返回实际发送条数
    pub async fn tick(&self, person_id: &str) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let origin = self
            .store
            .get_person(person_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(person_id.to_string()))?;

        let due: Vec<Request> = self
            .store
            .list_requests_from(person_id)
            .await?
            .into_iter()
            .filter(|r| self.is_due(r, now))
            .collect();

        let mut sent = 0;
        for request in due {
            // 目标必须能解析到在册接收方，否则跳过且不消耗次数
            let target_id = match &request.to_person_id {
                Some(id) => id.clone(),
                None => {
                    tracing::debug!(request_id = %request.id, "skipping follow-up: no target");
                    continue;
                }
            };
            if self.store.get_person(&target_id).await?.is_none()
                || self.store.get_agent_by_person(&target_id).await?.is_none()
            {
                tracing::debug!(
                    request_id = %request.id,
                    "skipping follow-up: target not reachable"
                );
                continue;
            }

            let content = self.generate(&request, &origin, now).await;

            // 派发前在存储锁内重查；选中后已完成/额度用尽则放弃
            let updated = match self
                .store
                .record_follow_up(&request.id, self.config.max_follow_ups, now)
                .await?
            {
                Some(r) => r,
                None => {
                    tracing::debug!(
                        request_id = %request.id,
                        "follow-up no longer eligible at dispatch time"
                    );
                    continue;
                }
            };

            let message = self
                .store
                .append_message(
                    MessageRecord::new(&origin.id, MessageKind::FollowUp, content)
                        .with_recipient(&target_id)
                        .with_request(&updated.id),
                )
                .await?;

            tracing::info!(
                request_id = %updated.id,
                count = updated.follow_up_count,
                "follow-up sent"
            );
            self.events.publish(&Event::MessageSent { message });
            sent += 1;
        }

        Ok(sent)
    }

    /// 生成提醒文本；补全失败时退回固定模板
    async fn generate(&self, request: &Request, from: &Person, now: DateTime<Utc>) -> String {
        let days_waiting = (now - request.created_at).num_days().max(0);
        let prompt = format!(
            "Generate a follow-up for this pending request:\n\nSubject: {}\nOriginal request: {}\nDays waiting: {}\nPrevious follow-ups: {}\n\nFrom: {}",
            request.subject, request.description, days_waiting, request.follow_up_count, from.name
        );

        match self
            .llm
            .complete(&[ChatMessage::user(prompt)], Some(FOLLOW_UP_PROMPT))
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) | Err(_) => {
                tracing::warn!(
                    request_id = %request.id,
                    "follow-up generation failed, using template"
                );
                format!(
                    "Just checking in on \"{}\" from {} day(s) ago. Any update? Let me know if something is blocking you.",
                    request.subject, days_waiting
                )
            }
        }
    }

    /// 周期循环：每 interval 扫一遍所有活跃 Agent；shutdown 信号置 true 时退出
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut timer =
            tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs));
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("follow-up scheduler stopped");
                        break;
                    }
                }
                _ = timer.tick() => {
                    self.scan_all().await;
                }
            }
        }
    }

    async fn scan_all(&self) {
        let agents = match self
            .store
            .list_agents(Some(crate::model::AgentStatus::Active))
            .await
        {
            Ok(agents) => agents,
            Err(e) => {
                tracing::warn!("follow-up scan failed to list agents: {}", e);
                return;
            }
        };

        for agent in agents {
            if let Err(e) = self.tick(&agent.person_id).await {
                tracing::warn!(person = %agent.person_id, "follow-up tick failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockCompletionClient;
    use crate::model::{AgentProfile, Task};
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    /// 手动时钟：测试里直接拨表
    struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn new(start: DateTime<Utc>) -> Self {
            Self {
                now: Mutex::new(start),
            }
        }

        fn set(&self, to: DateTime<Utc>) {
            *self.now.lock().unwrap() = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        scheduler: FollowUpScheduler,
        clock: Arc<ManualClock>,
        origin_id: String,
        request_id: String,
    }

    async fn fixture(llm: Arc<dyn CompletionClient>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(EventBus::new());

        let origin = Person::new("Alex");
        let target = Person::new("Sarah");
        store.create_person(origin.clone()).await.unwrap();
        store.create_person(target.clone()).await.unwrap();
        store.create_agent(AgentProfile::new(&origin.id)).await.unwrap();
        store.create_agent(AgentProfile::new(&target.id)).await.unwrap();

        let request = Request::new(&origin.id, "Q4 report", "Please send the Q4 report")
            .with_target(&target.id);
        let created_at = request.created_at;
        let task = Task::mirror(&request, &target.id);
        let request_id = request.id.clone();
        store.create_request_with_task(request, task).await.unwrap();

        let clock = Arc::new(ManualClock::new(created_at));
        let scheduler = FollowUpScheduler::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            llm,
            events,
            FollowUpConfig::default(),
        )
        .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);

        Fixture {
            store,
            scheduler,
            clock,
            origin_id: origin.id,
            request_id,
        }
    }

    #[tokio::test]
    async fn test_not_due_at_23h_due_at_24h() {
        let llm = Arc::new(MockCompletionClient::with_replies(&["Any update?"]));
        let f = fixture(llm).await;
        let created = f.store.get_request(&f.request_id).await.unwrap().unwrap().created_at;

        f.clock.set(created + Duration::hours(23));
        assert_eq!(f.scheduler.tick(&f.origin_id).await.unwrap(), 0);

        f.clock.set(created + Duration::hours(24));
        assert_eq!(f.scheduler.tick(&f.origin_id).await.unwrap(), 1);

        let request = f.store.get_request(&f.request_id).await.unwrap().unwrap();
        assert_eq!(request.follow_up_count, 1);
        assert!(request.last_follow_up.is_some());

        let messages = f.store.messages_for_request(&f.request_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MessageKind::FollowUp);
        assert_eq!(messages[0].content, "Any update?");
    }

    #[tokio::test]
    async fn test_never_selected_after_max_follow_ups() {
        let llm = Arc::new(MockCompletionClient::new());
        let f = fixture(llm).await;
        let created = f.store.get_request(&f.request_id).await.unwrap().unwrap().created_at;

        for i in 1..=3 {
            f.clock.set(created + Duration::hours(24 * i));
            assert_eq!(f.scheduler.tick(&f.origin_id).await.unwrap(), 1);
        }

        // 次数用尽后无论过多久都不再选中
        f.clock.set(created + Duration::days(365));
        assert_eq!(f.scheduler.tick(&f.origin_id).await.unwrap(), 0);

        let request = f.store.get_request(&f.request_id).await.unwrap().unwrap();
        assert_eq!(request.follow_up_count, 3);
    }

    #[tokio::test]
    async fn test_completed_request_not_followed_up() {
        let llm = Arc::new(MockCompletionClient::new());
        let f = fixture(llm).await;
        let created = f.store.get_request(&f.request_id).await.unwrap().unwrap().created_at;

        f.store
            .complete_request(&f.request_id, "done", created + Duration::hours(1))
            .await
            .unwrap();

        f.clock.set(created + Duration::hours(48));
        assert_eq!(f.scheduler.tick(&f.origin_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_target_skipped_without_counting() {
        let llm = Arc::new(MockCompletionClient::new());
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(EventBus::new());

        let origin = Person::new("Alex");
        store.create_person(origin.clone()).await.unwrap();
        store.create_agent(AgentProfile::new(&origin.id)).await.unwrap();

        // 目标人从未注册
        let request = Request::new(&origin.id, "ping", "please reply").with_target("person_ghost");
        let created = request.created_at;
        let task = Task::mirror(&request, "person_ghost");
        let request_id = request.id.clone();
        store.create_request_with_task(request, task).await.unwrap();

        let clock = Arc::new(ManualClock::new(created + Duration::hours(48)));
        let scheduler = FollowUpScheduler::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            llm,
            events,
            FollowUpConfig::default(),
        )
        .with_clock(clock);

        assert_eq!(scheduler.tick(&origin.id).await.unwrap(), 0);
        let request = store.get_request(&request_id).await.unwrap().unwrap();
        assert_eq!(request.follow_up_count, 0);
    }

    #[tokio::test]
    async fn test_generation_failure_uses_template() {
        // Mock 脚本为空时回显纯文本，非空即可用；这里换成空白回复逼出模板
        let llm = Arc::new(MockCompletionClient::with_replies(&["   "]));
        let f = fixture(llm).await;
        let created = f.store.get_request(&f.request_id).await.unwrap().unwrap().created_at;

        f.clock.set(created + Duration::hours(24));
        assert_eq!(f.scheduler.tick(&f.origin_id).await.unwrap(), 1);

        let messages = f.store.messages_for_request(&f.request_id).await.unwrap();
        assert!(messages[0].content.contains("Just checking in"));
    }
}
