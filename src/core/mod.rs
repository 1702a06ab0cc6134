//! 核心层：错误与恢复、会话上下文与会话级串行化

pub mod error;
pub mod recovery;
pub mod session;

pub use error::{AgentError, RecoveryAction, StoreError, ToolError};
pub use recovery::RecoveryEngine;
pub use session::{SessionContext, SessionLocks};
