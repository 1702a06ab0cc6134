//! 会话上下文与会话级串行化
//!
//! SessionContext 由调用方（已完成认证的 HTTP 层等）提供，核心只读不建；
//! SessionLocks 保证同一会话的回合按顺序执行，不同会话之间互不等待。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// 当前回合的会话身份：session_id 在一次登录内稳定，user_id 为已认证用户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// 每个会话一把异步锁；全局 map 只在取锁时短暂持有
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取会话锁；返回的 guard 持有期间同一会话的其它回合会等待
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(session_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// 丢弃没有回合在跑的会话锁（会话登出后由调用方触发）
    pub fn release_idle(&self) -> usize {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_session_is_serialized() {
        let locks = Arc::new(SessionLocks::new());
        let guard = locks.acquire("s1").await;

        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = locks2.acquire("s1").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_sessions_do_not_block() {
        let locks = SessionLocks::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_release_idle_keeps_held_locks() {
        let locks = SessionLocks::new();
        let held = locks.acquire("held").await;
        drop(locks.acquire("idle").await);
        assert_eq!(locks.release_idle(), 1);
        assert_eq!(locks.len(), 1);
        drop(held);
    }
}
