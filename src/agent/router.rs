//! 请求路由
//!
//! 根据组织上下文决定一条请求该交给谁：先按路由规则做程序化预过滤，
//! 未命中再发一次补全调用让模型挑目标并改写请求。模型最多只能给出
//! person / team 之一；输出不可解析时返回零置信度决策（两个目标均空、
//! formatted_request 原样回传），由调用方转为"请用户澄清"。

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::classifier::from_json_loose;
use crate::llm::{ChatMessage, CompletionClient};
use crate::model::Person;
use crate::org::OrgContext;

/// 路由 system prompt
const ROUTER_PROMPT: &str = r#"You are a communication routing agent for an enterprise team. Your job is to analyze requests and determine WHO should handle them based on organizational context.

Given a user's message and organizational context (teams, people, their roles and expertise), determine:
1. Which person or team is best suited to handle this request
2. Why they're the right choice
3. How to formulate a clear, actionable request

Always respond in JSON format:
{
  "target_person_id": "person id or null if unknown",
  "target_team_id": "team id or null",
  "confidence": 0.0-1.0,
  "reasoning": "brief explanation of why this target",
  "formatted_request": "clear, professional version of the request",
  "subject": "short subject line (max 60 chars)"
}

Pick at most ONE of target_person_id / target_team_id. If you cannot determine a specific target, set confidence to 0 and explain in reasoning."#;

/// 路由决策
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub target_person_id: Option<String>,
    pub target_team_id: Option<String>,
    /// [0, 1]
    pub confidence: f32,
    pub reasoning: String,
    /// 整理后的请求文本；不可解析时等于原始消息
    pub formatted_request: String,
    pub subject: String,
}

impl RoutingDecision {
    /// 零置信度兜底：目标全空，调用方应请用户澄清
    pub fn unresolved(message: &str) -> Self {
        Self {
            target_person_id: None,
            target_team_id: None,
            confidence: 0.0,
            reasoning: String::new(),
            formatted_request: message.to_string(),
            subject: truncate_subject(message),
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.target_person_id.is_none() && self.target_team_id.is_none()
    }
}

/// 模型回复的 JSON 结构（字段全部可缺省）
#[derive(Debug, Deserialize)]
struct RouterReply {
    #[serde(default)]
    target_person_id: Option<String>,
    #[serde(default)]
    target_team_id: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    formatted_request: Option<String>,
    #[serde(default)]
    subject: Option<String>,
}

/// 路由器
pub struct Router {
    llm: Arc<dyn CompletionClient>,
}

impl Router {
    pub fn new(llm: Arc<dyn CompletionClient>) -> Self {
        Self { llm }
    }

    /// 决定目标；`people` 为除发送者外的全部已知人员
    pub async fn route(
        &self,
        sender: &Person,
        message: &str,
        org: &OrgContext,
        people: &[Person],
    ) -> RoutingDecision {
        if let Some(decision) = match_rule(message, org) {
            tracing::debug!(
                matched = %decision.target_person_id.as_deref()
                    .or(decision.target_team_id.as_deref())
                    .unwrap_or("-"),
                "routing rule matched, skipping completion call"
            );
            return decision;
        }

        let prompt = build_routing_prompt(sender, message, org, people);
        let reply = match self
            .llm
            .complete(&[ChatMessage::user(prompt)], Some(ROUTER_PROMPT))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("router call failed, returning unresolved decision: {}", e);
                return RoutingDecision::unresolved(message);
            }
        };

        match from_json_loose::<RouterReply>(&reply) {
            Some(parsed) => normalize(parsed, message),
            None => {
                tracing::warn!("unparsable routing reply, returning unresolved decision");
                RoutingDecision::unresolved(message)
            }
        }
    }
}

/// 规则预过滤：priority 降序取首个 pattern 命中且带目标的规则，命中则不调模型
fn match_rule(message: &str, org: &OrgContext) -> Option<RoutingDecision> {
    let mut rules: Vec<_> = org
        .rules
        .iter()
        .filter(|r| r.target_person_id.is_some() || r.target_team_id.is_some())
        .collect();
    rules.sort_by(|a, b| b.priority.cmp(&a.priority));

    for rule in rules {
        let re = match Regex::new(&format!("(?i){}", rule.pattern)) {
            Ok(re) => re,
            Err(e) => {
                tracing::warn!("invalid routing rule pattern {:?}: {}", rule.pattern, e);
                continue;
            }
        };
        if re.is_match(message) {
            // 与模型路径同一约束：最多一个目标，person 优先
            let (person, team) = if rule.target_person_id.is_some() {
                (rule.target_person_id.clone(), None)
            } else {
                (None, rule.target_team_id.clone())
            };
            return Some(RoutingDecision {
                target_person_id: person,
                target_team_id: team,
                confidence: 0.9,
                reasoning: format!("matched routing rule: {}", rule.pattern),
                formatted_request: message.to_string(),
                subject: truncate_subject(message),
            });
        }
    }
    None
}

fn build_routing_prompt(
    sender: &Person,
    message: &str,
    org: &OrgContext,
    people: &[Person],
) -> String {
    let org_context = serde_json::json!({
        "people": people.iter().map(|p| serde_json::json!({
            "id": p.id,
            "name": p.name,
            "role": p.role,
            "team_id": p.team_id,
            "expertise": p.expertise,
        })).collect::<Vec<_>>(),
        "teams": org.teams.iter().map(|t| serde_json::json!({
            "id": t.id,
            "name": t.name,
            "expertise": t.expertise,
        })).collect::<Vec<_>>(),
        "routing_rules": org.rules,
    });

    format!(
        "Route this request from {} ({}):\n\n\"{}\"\n\nOrganizational context:\n{}",
        sender.name,
        sender.role.as_deref().unwrap_or("team member"),
        message,
        serde_json::to_string_pretty(&org_context).unwrap_or_default()
    )
}

fn normalize(reply: RouterReply, message: &str) -> RoutingDecision {
    let target_person_id = reply.target_person_id.filter(|s| !s.trim().is_empty());
    // 最多一个目标：person 优先
    let target_team_id = if target_person_id.is_some() {
        None
    } else {
        reply.target_team_id.filter(|s| !s.trim().is_empty())
    };

    RoutingDecision {
        target_person_id,
        target_team_id,
        confidence: reply.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        reasoning: reply.reasoning.unwrap_or_default(),
        formatted_request: reply
            .formatted_request
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| message.to_string()),
        subject: reply
            .subject
            .filter(|s| !s.trim().is_empty())
            .map(|s| truncate_subject(&s))
            .unwrap_or_else(|| truncate_subject(message)),
    }
}

/// 主题行截断到 60 个字符（按字符边界）
pub(crate) fn truncate_subject(text: &str) -> String {
    let cleaned = text.trim().replace('\n', " ");
    cleaned.chars().take(60).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockCompletionClient;
    use crate::org::{RoutingRule, Team};

    fn sender() -> Person {
        Person::new("Alex").with_role("engineer")
    }

    #[tokio::test]
    async fn test_route_to_person() {
        let llm = Arc::new(MockCompletionClient::with_replies(&[
            r#"{"target_person_id": "person_sarah", "target_team_id": null, "confidence": 0.85, "reasoning": "finance expertise", "formatted_request": "Please send the Q4 report.", "subject": "Q4 report"}"#,
        ]));
        let router = Router::new(llm);

        let decision = router
            .route(&sender(), "I need the Q4 report", &OrgContext::default(), &[])
            .await;

        assert_eq!(decision.target_person_id.as_deref(), Some("person_sarah"));
        assert!(decision.target_team_id.is_none());
        assert!((decision.confidence - 0.85).abs() < f32::EPSILON);
        assert_eq!(decision.formatted_request, "Please send the Q4 report.");
    }

    #[tokio::test]
    async fn test_at_most_one_target() {
        let llm = Arc::new(MockCompletionClient::with_replies(&[
            r#"{"target_person_id": "person_a", "target_team_id": "team_b", "confidence": 0.5}"#,
        ]));
        let router = Router::new(llm);

        let decision = router
            .route(&sender(), "help", &OrgContext::default(), &[])
            .await;

        assert!(decision.target_person_id.is_some());
        assert!(decision.target_team_id.is_none());
    }

    #[tokio::test]
    async fn test_unparsable_reply_yields_unresolved() {
        let llm = Arc::new(MockCompletionClient::with_replies(&["no json here"]));
        let router = Router::new(llm);

        let message = "do the thing";
        let decision = router
            .route(&sender(), message, &OrgContext::default(), &[])
            .await;

        assert!(decision.is_unresolved());
        assert_eq!(decision.confidence, 0.0);
        assert_eq!(decision.formatted_request, message);
    }

    #[tokio::test]
    async fn test_rule_prefilter_skips_llm() {
        let llm = Arc::new(MockCompletionClient::new());
        let router = Router::new(Arc::clone(&llm) as Arc<dyn CompletionClient>);

        let org = OrgContext {
            teams: vec![Team {
                id: "team_legal".to_string(),
                name: "Legal".to_string(),
                member_ids: vec!["person_kim".to_string()],
                expertise: vec![],
            }],
            rules: vec![RoutingRule {
                pattern: "contract|nda".to_string(),
                target_team_id: Some("team_legal".to_string()),
                target_person_id: None,
                priority: 10,
            }],
            ..Default::default()
        };

        let decision = router
            .route(&sender(), "Can someone review this NDA?", &org, &[])
            .await;

        assert_eq!(decision.target_team_id.as_deref(), Some("team_legal"));
        assert!((decision.confidence - 0.9).abs() < f32::EPSILON);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_higher_priority_rule_wins() {
        let llm = Arc::new(MockCompletionClient::new());
        let router = Router::new(llm);

        let org = OrgContext {
            rules: vec![
                RoutingRule {
                    pattern: "report".to_string(),
                    target_person_id: Some("person_low".to_string()),
                    target_team_id: None,
                    priority: 1,
                },
                RoutingRule {
                    pattern: "report".to_string(),
                    target_person_id: Some("person_high".to_string()),
                    target_team_id: None,
                    priority: 5,
                },
            ],
            ..Default::default()
        };

        let decision = router.route(&sender(), "weekly report", &org, &[]).await;
        assert_eq!(decision.target_person_id.as_deref(), Some("person_high"));
    }

    #[test]
    fn test_truncate_subject() {
        let long = "a".repeat(100);
        assert_eq!(truncate_subject(&long).chars().count(), 60);
        assert_eq!(truncate_subject("short"), "short");
    }
}
