//! 组织上下文
//!
//! 由适配层注入的只读快照：团队、频道、路由规则。核心只在路由时读取，
//! 不负责刷新；频道对核心逻辑不透明，仅原样传递。

use serde::{Deserialize, Serialize};

use crate::model::PersonId;

/// 团队
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    /// 成员列表；团队路由时取第一个成员
    pub member_ids: Vec<PersonId>,
    #[serde(default)]
    pub expertise: Vec<String>,
}

/// 频道（核心不读取内容）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
}

/// 路由规则：pattern 为不区分大小写的正则；priority 大者优先
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingRule {
    pub pattern: String,
    #[serde(default)]
    pub target_person_id: Option<PersonId>,
    #[serde(default)]
    pub target_team_id: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

/// 组织快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrgContext {
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

impl OrgContext {
    pub fn find_team(&self, team_id: &str) -> Option<&Team> {
        self.teams.iter().find(|t| t.id == team_id)
    }

    /// 按名称查团队（路由结果有时给的是名字而非 ID）
    pub fn find_team_by_name(&self, name: &str) -> Option<&Team> {
        self.teams
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// 解析团队引用（先按 ID，再按名称）
    pub fn resolve_team(&self, reference: &str) -> Option<&Team> {
        self.find_team(reference)
            .or_else(|| self.find_team_by_name(reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_team() {
        let org = OrgContext {
            teams: vec![Team {
                id: "team_legal".to_string(),
                name: "Legal".to_string(),
                member_ids: vec!["person_a".to_string()],
                expertise: vec![],
            }],
            ..Default::default()
        };

        assert!(org.resolve_team("team_legal").is_some());
        assert!(org.resolve_team("legal").is_some());
        assert!(org.resolve_team("Finance").is_none());
    }
}
