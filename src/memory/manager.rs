//! 会话记忆管理：加载、追加、阈值压缩
//!
//! 短期日志条数达到阈值时，用摘要模型把「旧摘要 + 短期日志」合并成新的第三人称摘要，
//! 保存后清空短期日志。压缩在回复产生之后执行，失败只记日志，下一次检查时重试。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::core::{AgentError, StoreError};
use crate::llm::{LlmClient, LlmError};
use crate::memory::{MemoryStore, Message, Role};

const SUMMARY_INSTRUCTIONS: &str = "You are a conversation summarization agent. Your task is to take an existing summary and a new block of conversation and create a new, concise, and updated summary.
The summary should be in the third person and capture the key information and user intent.";

/// 一次 load 的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMemory {
    pub summary: String,
    pub history: Vec<Message>,
}

/// 压缩结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactOutcome {
    /// 未达阈值
    BelowThreshold(usize),
    /// 短期日志为空
    Empty,
    /// 已合并 n 条消息
    Compacted(usize),
}

/// 构造摘要 prompt
pub fn summary_prompt(existing_summary: &str, messages: &[Message]) -> String {
    let block = messages
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .map(|m| {
            let who = if m.role == Role::User { "Human" } else { "AI" };
            format!("{who}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n");
    let existing = if existing_summary.trim().is_empty() {
        "None."
    } else {
        existing_summary
    };
    format!(
        "{SUMMARY_INSTRUCTIONS}\n\nExisting Summary:\n---\n{existing}\n---\n\nNew Conversation Block:\n---\n{block}\n---\n\nPlease provide the new, updated summary based on the information above."
    )
}

pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    summarizer: Arc<dyn LlmClient>,
    threshold: usize,
    storage_timeout: Duration,
    llm_timeout: Duration,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn MemoryStore>, summarizer: Arc<dyn LlmClient>, threshold: usize) -> Self {
        Self {
            store,
            summarizer,
            threshold: threshold.max(1),
            storage_timeout: Duration::from_secs(10),
            llm_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeouts(mut self, storage_secs: u64, llm_secs: u64) -> Self {
        self.storage_timeout = Duration::from_secs(storage_secs);
        self.llm_timeout = Duration::from_secs(llm_secs);
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        timeout(self.storage_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.storage_timeout.as_secs()))?
    }

    pub async fn load(&self, session_id: &str) -> Result<SessionMemory, StoreError> {
        let summary = self.bounded(self.store.load_summary(session_id)).await?;
        let history = self.bounded(self.store.load_messages(session_id)).await?;
        Ok(SessionMemory { summary, history })
    }

    pub async fn append(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        self.bounded(self.store.append_messages(session_id, messages))
            .await
    }

    /// 达到阈值才压缩
    pub async fn maybe_compact(&self, session_id: &str) -> Result<CompactOutcome, AgentError> {
        let messages = self.bounded(self.store.load_messages(session_id)).await?;
        if messages.len() < self.threshold {
            return Ok(CompactOutcome::BelowThreshold(messages.len()));
        }
        self.compact_messages(session_id, messages).await
    }

    /// 无条件压缩；日志为空时不做任何事
    pub async fn compact(&self, session_id: &str) -> Result<CompactOutcome, AgentError> {
        let messages = self.bounded(self.store.load_messages(session_id)).await?;
        self.compact_messages(session_id, messages).await
    }

    async fn compact_messages(
        &self,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<CompactOutcome, AgentError> {
        if messages.is_empty() {
            return Ok(CompactOutcome::Empty);
        }
        let existing = self.bounded(self.store.load_summary(session_id)).await?;
        let prompt = summary_prompt(&existing, &messages);

        let completion = timeout(
            self.llm_timeout,
            self.summarizer.complete(&[Message::system(prompt)]),
        )
        .await
        .map_err(|_| LlmError::Timeout(self.llm_timeout.as_secs()))??;

        let summary = completion.text.trim().to_string();
        if summary.is_empty() {
            return Err(AgentError::LlmError(LlmError::ApiError(
                "summarizer returned empty text".to_string(),
            )));
        }

        self.bounded(self.store.save_summary(session_id, &summary))
            .await?;
        self.bounded(self.store.clear_messages(session_id)).await?;
        tracing::info!(session_id, merged = messages.len(), "conversation compacted into summary");
        Ok(CompactOutcome::Compacted(messages.len()))
    }
}
