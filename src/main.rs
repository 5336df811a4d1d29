//! Courier - Rust 团队沟通智能体系统
//!
//! 入口：初始化日志、装配存储 / LLM / 引擎，启动跟进调度器与会话清理，
//! 然后运行一个极薄的终端 REPL 适配层（读入一行、调引擎、打印回复与事件）。

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use courier::agent::AgentEngine;
use courier::config::load_config;
use courier::events::{Event, EventBus};
use courier::followup::{FollowUpConfig, FollowUpScheduler};
use courier::llm::{CompletionClient, OpenAiClient};
use courier::org::OrgContext;
use courier::store::{MemoryStore, RecordStore, SqliteStore};

/// 创建记录存储：配置了 sqlite_path 则持久化，失败或未配置退回内存
fn create_store(sqlite_path: Option<&Path>) -> Arc<dyn RecordStore> {
    if let Some(path) = sqlite_path {
        match SqliteStore::open(path) {
            Ok(store) => {
                tracing::info!("Using SQLite record store: {:?}", path);
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!("Failed to open SQLite store, falling back to memory: {}", e);
            }
        }
    }
    tracing::info!("Using in-memory record store");
    Arc::new(MemoryStore::new())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).context("Failed to load config")?;

    let store = create_store(cfg.store.sqlite_path.as_deref());
    let llm: Arc<dyn CompletionClient> = Arc::new(OpenAiClient::new(
        cfg.llm.base_url.as_deref(),
        &cfg.llm.model,
        None,
    ));
    let events = Arc::new(EventBus::new());

    // 适配层视角：把生命周期事件直接打到终端
    events.subscribe_all(|event| match event {
        Event::RequestCreated {
            request, target, ..
        } => println!("📨 [request.created] \"{}\" -> {}", request.subject, target.name),
        Event::RequestCompleted { request, .. } => {
            println!("✅ [request.completed] \"{}\"", request.subject)
        }
        Event::TaskCreated { task, owner, .. } => {
            println!("🗒  [task.created] \"{}\" for {}", task.title, owner.name)
        }
        Event::MessageSent { message } => {
            println!("🔔 [message.sent] {}", message.content)
        }
    });

    let engine = Arc::new(
        AgentEngine::new(Arc::clone(&llm), Arc::clone(&store), Arc::clone(&events))
            .with_session_limits(cfg.session.max_context_turns, cfg.session.idle_timeout_secs),
    );

    // 组织快照由适配层提供：可选的 config/org.json
    if let Ok(raw) = std::fs::read_to_string("config/org.json") {
        match serde_json::from_str::<OrgContext>(&raw) {
            Ok(org) => {
                tracing::info!(
                    "Loaded org context: {} teams, {} rules",
                    org.teams.len(),
                    org.rules.len()
                );
                engine.set_org_context(org).await;
            }
            Err(e) => tracing::warn!("Ignoring invalid config/org.json: {}", e),
        }
    }

    // 跟进调度器
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler = Arc::new(FollowUpScheduler::new(
        Arc::clone(&store),
        Arc::clone(&llm),
        Arc::clone(&events),
        FollowUpConfig::from(&cfg.follow_up),
    ));
    let scheduler_handle = tokio::spawn(Arc::clone(&scheduler).run(shutdown_rx));

    // 空闲会话清理
    let cleanup_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            timer.tick().await;
            let store = cleanup_engine.store();
            cleanup_engine.registry().cleanup_expired(store.as_ref()).await;
        }
    });

    let name = cfg.app.name.as_deref().unwrap_or("Courier");
    println!("{} ready. Type your name to sign in (Ctrl-D to quit).", name);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print!("name> ");
    std::io::stdout().flush().ok();

    let person = match lines.next_line().await? {
        Some(line) if !line.trim().is_empty() => engine
            .attach(line.trim(), None)
            .await
            .context("Failed to register person")?,
        _ => {
            let _ = shutdown_tx.send(true);
            return Ok(());
        }
    };
    println!("Hi {}! Tell me what you need, or try \"tasks\" / \"status\".", person.name);

    loop {
        print!("{}> ", person.name);
        std::io::stdout().flush().ok();

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }

        match engine.handle_message(&person.id, line).await {
            Ok(reply) => println!("{}", reply.text),
            Err(e) => println!("Something went wrong on my side ({}). Your message was not lost, please try again.", e),
        }
    }

    let _ = shutdown_tx.send(true);
    scheduler_handle.abort();
    Ok(())
}
