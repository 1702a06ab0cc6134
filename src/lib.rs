//! Libris - Rust 图书馆智能助手
//!
//! 模块划分：
//! - **agent**: 入站回合管线（会话锁、记忆加载、回合、压缩）与组件装配
//! - **catalog**: 目录存储协作方（内存 / SQLite）与嵌入同步
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、会话上下文
//! - **llm**: 补全与嵌入能力抽象与实现（OpenAI 兼容 / Groq / Mock / 特征哈希）
//! - **memory**: 短期消息 + 滚动摘要，阈值压缩
//! - **observability**: 日志初始化
//! - **react**: Planner 与推理/执行状态机
//! - **retrieval**: 嵌入 + 相似度排序
//! - **tools**: 五个类型化工具、注册表与执行器

pub mod agent;
pub mod catalog;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod retrieval;
pub mod tools;

pub use agent::{create_agent_components, AgentComponents, LibraryAgent, TurnReply, TurnStatus};
