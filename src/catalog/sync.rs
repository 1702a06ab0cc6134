//! 向量记录同步
//!
//! 目录变更后调用：重新生成某本书的嵌入并 upsert；书已不存在时删除孤立记录；
//! 作者 / 类型改名只改反范式化字段，不重新嵌入。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::catalog::store::CatalogStore;
use crate::catalog::types::EmbeddingRecord;
use crate::core::{AgentError, StoreError};
use crate::llm::{EmbeddingProvider, LlmError};

/// 同步结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Upserted,
    /// 书已删除，孤立向量记录随之删除
    RemovedOrphan,
    /// 书不存在且没有记录
    Skipped,
}

pub struct EmbeddingSync {
    store: Arc<dyn CatalogStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
}

impl EmbeddingSync {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            store,
            embedder,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        timeout(self.timeout, self.embedder.embed(text))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))?
    }

    pub async fn sync_book(&self, book_id: &str) -> Result<SyncOutcome, AgentError> {
        let Some(details) = self.store.book_details(book_id).await? else {
            let removed = self.store.delete_embedding(book_id).await?;
            if removed {
                tracing::info!(book_id, "removed orphaned embedding record");
                return Ok(SyncOutcome::RemovedOrphan);
            }
            return Ok(SyncOutcome::Skipped);
        };

        let embedding = self.embed(&details.embedding_text()).await?;
        self.store
            .upsert_embedding(EmbeddingRecord {
                book_id: details.book.id.clone(),
                embedding,
                title: details.book.title.clone(),
                author: details.author.clone(),
                genre: details.genre.clone(),
                summary: details.book.summary.clone(),
            })
            .await?;
        tracing::debug!(book_id, model = self.embedder.model(), "embedding upserted");
        Ok(SyncOutcome::Upserted)
    }

    /// 删除图书（连同向量记录与副本）
    pub async fn delete_book(&self, book_id: &str) -> Result<bool, StoreError> {
        let removed = self.store.delete_book(book_id).await?;
        if removed {
            tracing::info!(book_id, "book and embedding record deleted");
        }
        Ok(removed)
    }

    pub async fn rename_author(&self, author_id: &str, name: &str) -> Result<usize, StoreError> {
        self.store.rename_author(author_id, name).await?;
        let n = self.store.set_embedding_author(author_id, name).await?;
        tracing::info!(author_id, updated = n, "author name propagated to embeddings");
        Ok(n)
    }

    pub async fn rename_genre(&self, genre_id: &str, name: &str) -> Result<usize, StoreError> {
        self.store.rename_genre(genre_id, name).await?;
        let n = self.store.set_embedding_genre(genre_id, name).await?;
        tracing::info!(genre_id, updated = n, "genre name propagated to embeddings");
        Ok(n)
    }

    /// 全量重建；单本失败只记日志，返回成功条数
    pub async fn reindex_all(&self) -> Result<usize, StoreError> {
        let ids = self.store.book_ids().await?;
        let mut ok = 0;
        for id in &ids {
            match self.sync_book(id).await {
                Ok(SyncOutcome::Upserted) => ok += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(book_id = %id, error = %e, "reindex failed for book"),
            }
        }
        tracing::info!(total = ids.len(), indexed = ok, "catalog reindexed");
        Ok(ok)
    }
}
