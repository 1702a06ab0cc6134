//! 会话记忆存储：滚动摘要 + 短期消息日志
//!
//! 摘要每个会话一条，整体替换；短期日志按追加顺序读取，压缩后整体清空。

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::core::StoreError;
use crate::memory::Message;

/// 记忆存储后端
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// 尚无摘要时返回空串
    async fn load_summary(&self, session_id: &str) -> Result<String, StoreError>;
    async fn save_summary(&self, session_id: &str, summary: &str) -> Result<(), StoreError>;
    async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError>;
    /// 原子追加（全部写入或全部不写）
    async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError>;
    async fn clear_messages(&self, session_id: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
struct SessionMemory {
    summary: String,
    messages: Vec<Message>,
}

/// 进程内记忆存储
#[derive(Default)]
pub struct InMemoryMemoryStore {
    sessions: RwLock<HashMap<String, SessionMemory>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn load_summary(&self, session_id: &str) -> Result<String, StoreError> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        Ok(sessions
            .get(session_id)
            .map(|s| s.summary.clone())
            .unwrap_or_default())
    }

    async fn save_summary(&self, session_id: &str, summary: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.entry(session_id.to_string()).or_default().summary = summary.to_string();
        Ok(())
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        Ok(sessions
            .get(session_id)
            .map(|s| s.messages.clone())
            .unwrap_or_default())
    }

    async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_default()
            .messages
            .extend_from_slice(messages);
        Ok(())
    }

    async fn clear_messages(&self, session_id: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(s) = sessions.get_mut(session_id) {
            s.messages.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = InMemoryMemoryStore::new();
        store
            .append_messages("s1", &[Message::user("hi"), Message::assistant("hello")])
            .await
            .unwrap();
        store.save_summary("s2", "The user asked about Dune.").await.unwrap();

        assert_eq!(store.load_messages("s1").await.unwrap().len(), 2);
        assert!(store.load_messages("s2").await.unwrap().is_empty());
        assert_eq!(store.load_summary("s1").await.unwrap(), "");

        store.clear_messages("s1").await.unwrap();
        assert!(store.load_messages("s1").await.unwrap().is_empty());
    }
}
