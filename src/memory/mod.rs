//! 记忆层：消息模型、会话存储（内存 / SQLite）与阈值压缩

pub mod async_persistence;
pub mod conversation;
pub mod manager;
pub mod store;

#[cfg(feature = "async-sqlite")]
pub use async_persistence::SqliteMemoryStore;
pub use conversation::{render_transcript, Message, Role, ToolCall};
pub use manager::{summary_prompt, CompactOutcome, MemoryManager, SessionMemory};
pub use store::{InMemoryMemoryStore, MemoryStore};
