//! 进程级惰性单例：补全与嵌入能力句柄
//!
//! 生命周期：进程内首次使用时初始化一次，之后只读共享，直至进程退出。
//! 多个会话并发首次使用时只会触发一次初始化，其余调用方等待同一个进行中的初始化；
//! 初始化失败不会缓存，下一次调用重新尝试。

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::llm::{EmbeddingProvider, LlmClient};

/// 惰性初始化、初始化后只读的共享句柄
pub struct SharedHandle<T: ?Sized> {
    cell: OnceCell<Arc<T>>,
}

impl<T: ?Sized> SharedHandle<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    /// 获取句柄；未初始化时执行 init，并发调用方等待同一次 init
    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>, E>>,
    {
        self.cell.get_or_try_init(init).await.cloned()
    }

    /// 已初始化时返回句柄
    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

impl<T: ?Sized> Default for SharedHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 推理使用的补全能力
pub static COMPLETION_HANDLE: SharedHandle<dyn LlmClient> = SharedHandle::new();
/// 摘要专用补全能力（可配置为更小更快的模型）
pub static SUMMARY_HANDLE: SharedHandle<dyn LlmClient> = SharedHandle::new();
/// 学习计划主题抽取使用的补全能力
pub static TOPIC_HANDLE: SharedHandle<dyn LlmClient> = SharedHandle::new();
/// 检索子系统使用的嵌入能力
pub static EMBEDDING_HANDLE: SharedHandle<dyn EmbeddingProvider> = SharedHandle::new();

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_first_use_initializes_once() {
        let handle: Arc<SharedHandle<String>> = Arc::new(SharedHandle::new());
        let inits = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let handle = handle.clone();
            let inits = inits.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .get_or_try_init(|| async {
                        inits.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok::<_, String>(Arc::new("model".to_string()))
                    })
                    .await
                    .unwrap()
            }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap().as_str(), "model");
        }
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert!(handle.is_initialized());
    }

    #[tokio::test]
    async fn test_failed_init_is_retried() {
        let handle: SharedHandle<u32> = SharedHandle::new();
        let first = handle
            .get_or_try_init(|| async { Err::<Arc<u32>, _>("boom") })
            .await;
        assert!(first.is_err());
        assert!(handle.get().is_none());

        let second = handle
            .get_or_try_init(|| async { Ok::<_, &str>(Arc::new(7)) })
            .await
            .unwrap();
        assert_eq!(*second, 7);
    }
}
