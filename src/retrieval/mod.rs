//! 检索子系统：文本嵌入 + 相似度排序
//!
//! 嵌入句柄在进程内只读共享；每次嵌入调用都有超时。
//! 结果按距离升序（相似度不增），同分按向量记录的插入顺序。

pub mod metric;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::timeout;

use crate::catalog::{CatalogItem, CatalogStore};
use crate::core::StoreError;
use crate::llm::{EmbeddingProvider, LlmError};

pub use metric::{rank_by_distance, DistanceMetric};

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] LlmError),

    #[error("vector index unavailable: {0}")]
    Store(#[from] StoreError),
}

/// 带相似度的检索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedItem {
    #[serde(flatten)]
    pub item: CatalogItem,
    pub similarity: f32,
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn CatalogStore>,
    metric: DistanceMetric,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn CatalogStore>,
        metric: DistanceMetric,
        timeout_secs: u64,
    ) -> Self {
        Self {
            embedder,
            store,
            metric,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let vector = timeout(self.timeout, self.embedder.embed(text))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))??;
        Ok(vector)
    }

    /// 取与 vector 最相似的 k 条；similarity = 1 - distance
    pub async fn rank_by_similarity(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RankedItem>, RetrievalError> {
        let nearest = self.store.nearest(vector, self.metric, k).await?;
        Ok(nearest
            .into_iter()
            .map(|(item, distance)| RankedItem {
                item,
                similarity: self.metric.similarity(distance),
            })
            .collect())
    }

    /// embed + rank
    pub async fn search(&self, text: &str, k: usize) -> Result<Vec<RankedItem>, RetrievalError> {
        let vector = self.embed(text).await?;
        let ranked = self.rank_by_similarity(&vector, k).await?;
        tracing::debug!(query = %text, hits = ranked.len(), "similarity search");
        Ok(ranked)
    }
}
