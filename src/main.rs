//! Libris REPL
//!
//! 入口：初始化日志、加载配置、装配 Agent，从标准输入逐行读取问题并输出回答。

use anyhow::Context;
use libris::config::load_config;
use libris::core::SessionContext;
use libris::{create_agent_components, observability};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn id_from_env(key: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    let components = create_agent_components(&cfg)
        .await
        .context("Failed to create agent")?;

    let indexed = components
        .sync
        .reindex_all()
        .await
        .context("Failed to index catalog")?;
    tracing::info!(records = indexed, "catalog indexed");

    let session = SessionContext::new(id_from_env("LIBRIS_SESSION_ID"), id_from_env("LIBRIS_USER_ID"));
    tracing::info!(session_id = %session.session_id, user_id = %session.user_id, "session ready");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    stdout.write_all(format!("{} ready. Type a question, or /quit.\n> ", cfg.app.name).as_bytes()).await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "/quit" || line == "/exit" {
            break;
        }
        if !line.is_empty() {
            let reply = components.agent.submit_turn(&session, line).await;
            stdout.write_all(format!("{}\n", reply.answer).as_bytes()).await?;
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }
    Ok(())
}
