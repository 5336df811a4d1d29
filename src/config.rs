//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COURIER__*` 覆盖
//! （双下划线表示嵌套，如 `COURIER__LLM__MODEL=gpt-4o`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::followup::FollowUpConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub follow_up: FollowUpSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端端点与模型
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI 兼容端点；未设置时用官方默认
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// [session] 段：会话上下文轮数与空闲驱逐
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionSection {
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_max_context_turns() -> usize {
    20
}

fn default_idle_timeout_secs() -> u64 {
    3600
}

/// [follow_up] 段：扫描间隔、过期阈值、跟进上限
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FollowUpSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: i64,
    #[serde(default = "default_max_follow_ups")]
    pub max_follow_ups: u32,
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_stale_after_hours() -> i64 {
    24
}

fn default_max_follow_ups() -> u32 {
    3
}

impl From<&FollowUpSection> for FollowUpConfig {
    fn from(section: &FollowUpSection) -> Self {
        Self {
            interval_secs: section.interval_secs,
            stale_after_hours: section.stale_after_hours,
            max_follow_ups: section.max_follow_ups,
        }
    }
}

/// [store] 段：SQLite 路径；未设置时用内存存储
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreSection {
    pub sqlite_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection {
                provider: default_provider(),
                model: default_model(),
                base_url: None,
            },
            session: SessionSection {
                max_context_turns: default_max_context_turns(),
                idle_timeout_secs: default_idle_timeout_secs(),
            },
            follow_up: FollowUpSection {
                interval_secs: default_interval_secs(),
                stale_after_hours: default_stale_after_hours(),
                max_follow_ups: default_max_follow_ups(),
            },
            store: StoreSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 COURIER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 COURIER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COURIER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
