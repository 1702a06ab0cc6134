//! LLM 层：补全与嵌入能力抽象、实现（OpenAI 兼容 / Groq / Mock / 特征哈希）与进程级句柄

pub mod embedding;
pub mod groq;
pub mod handle;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{EmbeddingProvider, HashEmbedder, OpenAiEmbedder};
pub use groq::{create_groq_client, GROQ_INSTANT, GROQ_VERSATILE};
pub use handle::{
    SharedHandle, COMPLETION_HANDLE, EMBEDDING_HANDLE, SUMMARY_HANDLE, TOPIC_HANDLE,
};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{Completion, LlmClient, LlmError};
