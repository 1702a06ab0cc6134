//! 异步 SQLite 记忆存储（sqlx）
//!
//! 使用 sqlx 提供完全异步的数据库操作，避免在 async 上下文中阻塞。
//! 需要启用 `async-sqlite` feature。

#[cfg(feature = "async-sqlite")]
mod sqlx_impl {
    use std::path::Path;

    use async_trait::async_trait;
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
    use sqlx::Row;

    use crate::core::StoreError;
    use crate::memory::{MemoryStore, Message, Role, ToolCall};

    fn backend(e: sqlx::Error) -> StoreError {
        StoreError::Backend(e.to_string())
    }

    /// 异步 SQLite 记忆存储
    pub struct SqliteMemoryStore {
        pool: SqlitePool,
    }

    impl SqliteMemoryStore {
        pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
            let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&db_url)
                .await
                .map_err(backend)?;

            let store = Self { pool };
            store.init_tables().await.map_err(backend)?;
            Ok(store)
        }

        /// 从连接池创建（与目录存储共用同一个数据库文件时使用）
        pub fn from_pool(pool: SqlitePool) -> Self {
            Self { pool }
        }

        async fn init_tables(&self) -> Result<(), sqlx::Error> {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS conversation_summaries (
                    session_id TEXT PRIMARY KEY,
                    summary TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
            )
            .execute(&self.pool)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS conversation_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    tool_calls TEXT,
                    tool_name TEXT,
                    created_at TEXT NOT NULL
                )",
            )
            .execute(&self.pool)
            .await?;

            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_messages_session ON conversation_messages(session_id)",
            )
            .execute(&self.pool)
            .await?;

            Ok(())
        }

        pub async fn close(&self) {
            self.pool.close().await;
        }
    }

    #[async_trait]
    impl MemoryStore for SqliteMemoryStore {
        async fn load_summary(&self, session_id: &str) -> Result<String, StoreError> {
            let row = sqlx::query("SELECT summary FROM conversation_summaries WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
            Ok(row.map(|r| r.get("summary")).unwrap_or_default())
        }

        async fn save_summary(&self, session_id: &str, summary: &str) -> Result<(), StoreError> {
            sqlx::query(
                "INSERT INTO conversation_summaries (session_id, summary, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(session_id) DO UPDATE SET summary = excluded.summary, updated_at = excluded.updated_at",
            )
            .bind(session_id)
            .bind(summary)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
            Ok(())
        }

        async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
            let rows = sqlx::query(
                "SELECT role, content, tool_calls, tool_name FROM conversation_messages
                 WHERE session_id = ? ORDER BY id ASC",
            )
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

            rows.into_iter()
                .map(|row| {
                    let role_str: String = row.get("role");
                    let role = Role::parse(&role_str)
                        .ok_or_else(|| StoreError::Corrupt(format!("message role {role_str}")))?;
                    let calls: Option<String> = row.get("tool_calls");
                    let tool_calls: Vec<ToolCall> = match calls {
                        Some(json) => serde_json::from_str(&json)
                            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                        None => Vec::new(),
                    };
                    Ok(Message {
                        role,
                        content: row.get("content"),
                        tool_calls,
                        tool_name: row.get("tool_name"),
                    })
                })
                .collect()
        }

        /// 批量保存消息（事务）
        async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError> {
            let mut tx = self.pool.begin().await.map_err(backend)?;
            let now = chrono::Utc::now().to_rfc3339();

            for message in messages {
                let calls = if message.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        serde_json::to_string(&message.tool_calls)
                            .map_err(|e| StoreError::Backend(e.to_string()))?,
                    )
                };
                sqlx::query(
                    "INSERT INTO conversation_messages (session_id, role, content, tool_calls, tool_name, created_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(session_id)
                .bind(message.role.as_str())
                .bind(&message.content)
                .bind(calls)
                .bind(&message.tool_name)
                .bind(&now)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            }

            tx.commit().await.map_err(backend)?;
            Ok(())
        }

        async fn clear_messages(&self, session_id: &str) -> Result<(), StoreError> {
            sqlx::query("DELETE FROM conversation_messages WHERE session_id = ?")
                .bind(session_id)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            Ok(())
        }
    }
}

#[cfg(feature = "async-sqlite")]
pub use sqlx_impl::SqliteMemoryStore;
