//! 引擎端到端测试：Mock 补全客户端 + 内存存储走完整消息链路

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use courier::agent::AgentEngine;
    use courier::events::EventBus;
    use courier::llm::{CompletionClient, MockCompletionClient};
    use courier::model::{Person, Request, RequestStatus, Task, TaskStatus};
    use courier::org::{OrgContext, RoutingRule, Team};
    use courier::store::{MemoryStore, RecordStore, StoreError};

    struct Harness {
        engine: AgentEngine,
        mock: Arc<MockCompletionClient>,
        store: Arc<MemoryStore>,
        events_seen: Arc<Mutex<Vec<String>>>,
    }

    fn harness() -> Harness {
        let mock = Arc::new(MockCompletionClient::new());
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(EventBus::new());

        let events_seen = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events_seen);
        events.subscribe_all(move |event| {
            seen.lock().unwrap().push(event.kind().as_str().to_string());
        });

        let engine = AgentEngine::new(
            Arc::clone(&mock) as Arc<dyn CompletionClient>,
            Arc::clone(&store) as Arc<dyn RecordStore>,
            events,
        );

        Harness {
            engine,
            mock,
            store,
            events_seen,
        }
    }

    async fn seed_request(
        store: &MemoryStore,
        from: &Person,
        to: &Person,
        subject: &str,
    ) -> Request {
        let request = Request::new(&from.id, subject, subject).with_target(&to.id);
        let task = Task::mirror(&request, &to.id);
        let (request, _) = store
            .create_request_with_task(request, task)
            .await
            .unwrap();
        request
    }

    #[tokio::test]
    async fn test_request_routed_to_person_creates_request_and_task() {
        let h = harness();
        let alex = h.engine.attach("Alex", None).await.unwrap();
        let sarah = h.engine.attach("Sarah", None).await.unwrap();

        h.mock.push_reply(r#"{"intent": "request"}"#);
        h.mock.push_reply(format!(
            r#"{{"target_person_id": "{}", "target_team_id": null, "confidence": 0.9, "reasoning": "Sarah owns reporting", "formatted_request": "Please send over the Q4 report.", "subject": "Q4 report"}}"#,
            sarah.id
        ));

        let reply = h
            .engine
            .handle_message(&alex.id, "I need the Q4 report")
            .await
            .unwrap();

        assert_eq!(reply.action.as_deref(), Some("request_created"));
        assert!(reply.text.contains("Sarah"));

        let outgoing = h.store.list_requests_from(&alex.id).await.unwrap();
        assert_eq!(outgoing.len(), 1);
        let request = &outgoing[0];
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.to_person_id.as_deref(), Some(sarah.id.as_str()));
        assert_eq!(request.subject, "Q4 report");
        assert_eq!(request.description, "Please send over the Q4 report.");
        assert_eq!(request.context, "I need the Q4 report");

        let tasks = h.store.pending_tasks(&sarah.id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].request_id, request.id);
        assert_eq!(tasks[0].status, TaskStatus::Pending);

        let seen = h.events_seen.lock().unwrap();
        assert!(seen.contains(&"request.created".to_string()));
    }

    #[tokio::test]
    async fn test_tasks_with_empty_queue_is_fixed_reply_and_mutates_nothing() {
        let h = harness();
        let alex = h.engine.attach("Alex", None).await.unwrap();

        h.mock.push_reply(r#"{"intent": "tasks"}"#);
        let reply = h.engine.handle_message(&alex.id, "tasks").await.unwrap();

        assert_eq!(reply.text, "🎉 No pending tasks! You're all caught up.");
        assert!(reply.action.is_none());
        assert!(h.store.list_requests_from(&alex.id).await.unwrap().is_empty());
        assert!(h.store.pending_tasks(&alex.id).await.unwrap().is_empty());
        assert!(h.events_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_respond_out_of_range_index_falls_back_to_first_task() {
        let h = harness();
        let alex = h.engine.attach("Alex", None).await.unwrap();
        let sarah = h.engine.attach("Sarah", None).await.unwrap();
        let request = seed_request(&h.store, &alex, &sarah, "Q4 report").await;

        // 只有 1 个待办，但用户回了 "2. done"
        h.mock
            .push_reply(r#"{"intent": "respond", "task_number": 2}"#);
        let reply = h.engine.handle_message(&sarah.id, "2. done").await.unwrap();

        assert_eq!(reply.action.as_deref(), Some("task_completed"));
        assert!(reply.text.contains("Alex"));

        let stored = h.store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Completed);
        assert_eq!(stored.response.as_deref(), Some("done"));
        assert!(stored.completed_at.is_some());

        assert!(h.store.pending_tasks(&sarah.id).await.unwrap().is_empty());
        assert!(h
            .events_seen
            .lock()
            .unwrap()
            .contains(&"request.completed".to_string()));
    }

    #[tokio::test]
    async fn test_empty_team_target_creates_nothing() {
        let h = harness();
        let alex = h.engine.attach("Alex", None).await.unwrap();

        h.engine
            .set_org_context(OrgContext {
                teams: vec![Team {
                    id: "team_legal".to_string(),
                    name: "Legal".to_string(),
                    member_ids: vec![],
                    expertise: vec![],
                }],
                ..Default::default()
            })
            .await;

        h.mock.push_reply(r#"{"intent": "request"}"#);
        h.mock.push_reply(
            r#"{"target_person_id": null, "target_team_id": "Legal", "confidence": 0.7, "reasoning": "legal question", "formatted_request": "Review the contract.", "subject": "Contract review"}"#,
        );

        let reply = h
            .engine
            .handle_message(&alex.id, "Someone should review this contract")
            .await
            .unwrap();

        assert!(reply
            .text
            .contains("couldn't locate the specific person"));
        assert!(reply.action.is_none());
        assert!(h.store.list_requests_from(&alex.id).await.unwrap().is_empty());
        assert!(h.events_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_routing_asks_for_clarification() {
        let h = harness();
        let alex = h.engine.attach("Alex", None).await.unwrap();

        h.mock.push_reply(r#"{"intent": "request"}"#);
        // 路由回复不可解析 -> 零置信度决策 -> 请用户澄清
        h.mock.push_reply("I have no idea, sorry");

        let reply = h
            .engine
            .handle_message(&alex.id, "handle the thing")
            .await
            .unwrap();

        assert!(reply.text.contains("who should handle this"));
        assert!(h.store.list_requests_from(&alex.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_double_completion_second_call_rejected() {
        let h = harness();
        let alex = h.engine.attach("Alex", None).await.unwrap();
        let sarah = h.engine.attach("Sarah", None).await.unwrap();
        let request = seed_request(&h.store, &alex, &sarah, "Q4 report").await;

        h.engine
            .lifecycle()
            .complete_request(&sarah, &request.id, "first answer")
            .await
            .unwrap();

        let second = h
            .engine
            .lifecycle()
            .complete_request(&sarah, &request.id, "second answer")
            .await;
        assert!(matches!(second, Err(StoreError::AlreadyTerminal(_))));

        let stored = h.store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(stored.response.as_deref(), Some("first answer"));

        // 只发布了一次 request.completed
        let seen = h.events_seen.lock().unwrap();
        assert_eq!(
            seen.iter().filter(|k| *k == "request.completed").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_respond_with_no_pending_tasks() {
        let h = harness();
        let sarah = h.engine.attach("Sarah", None).await.unwrap();

        h.mock.push_reply(r#"{"intent": "respond", "task_number": 1}"#);
        let reply = h.engine.handle_message(&sarah.id, "1. done").await.unwrap();
        assert_eq!(
            reply.text,
            "You don't have any pending tasks to respond to."
        );
    }

    #[tokio::test]
    async fn test_routing_rule_prefilter_skips_router_call() {
        let h = harness();
        let alex = h.engine.attach("Alex", None).await.unwrap();
        let kim = h.engine.attach("Kim", None).await.unwrap();

        h.engine
            .set_org_context(OrgContext {
                rules: vec![RoutingRule {
                    pattern: "invoice".to_string(),
                    target_person_id: Some(kim.id.clone()),
                    target_team_id: None,
                    priority: 10,
                }],
                ..Default::default()
            })
            .await;

        h.mock.push_reply(r#"{"intent": "request"}"#);
        let reply = h
            .engine
            .handle_message(&alex.id, "Please process this invoice")
            .await
            .unwrap();

        assert_eq!(reply.action.as_deref(), Some("request_created"));
        // 只有分类器调了一次补全；路由被规则预过滤短路
        assert_eq!(h.mock.call_count(), 1);

        let tasks = h.store.pending_tasks(&kim.id).await.unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_status_lists_active_requests() {
        let h = harness();
        let alex = h.engine.attach("Alex", None).await.unwrap();
        let sarah = h.engine.attach("Sarah", None).await.unwrap();
        seed_request(&h.store, &alex, &sarah, "Q4 report").await;

        h.mock.push_reply(r#"{"intent": "status"}"#);
        let reply = h.engine.handle_message(&alex.id, "status?").await.unwrap();

        assert!(reply.text.contains("Your Active Requests (1)"));
        assert!(reply.text.contains("Q4 report"));
        assert!(reply.text.contains("Sarah"));
    }

    #[tokio::test]
    async fn test_classifier_failure_falls_back_to_general_reply() {
        let h = harness();
        let alex = h.engine.attach("Alex", None).await.unwrap();

        // 分类回复格式非法 -> general；随后 responder 调用拿到第二条回复
        h.mock.push_reply("not json at all");
        h.mock.push_reply("Happy to help! What do you need?");

        let reply = h.engine.handle_message(&alex.id, "hey there").await.unwrap();
        assert_eq!(reply.text, "Happy to help! What do you need?");
        assert!(reply.action.is_none());
    }

    #[tokio::test]
    async fn test_attach_is_idempotent_per_person() {
        let h = harness();
        let first = h.engine.attach("Alex", Some("im_alex")).await.unwrap();
        let second = h.engine.attach("Alex", Some("im_alex")).await.unwrap();
        assert_eq!(first.id, second.id);

        let people = h.store.list_people().await.unwrap();
        assert_eq!(people.len(), 1);
        assert!(h
            .store
            .get_agent_by_person(&first.id)
            .await
            .unwrap()
            .is_some());
    }
}
