//! 精确检索：按书名 / 作者 / 类型子串过滤向量记录表（AND），限制条数

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::catalog::{CatalogFilter, CatalogStore};
use crate::core::{SessionContext, ToolError};
use crate::tools::schema::{parameters_schema, FilteredSearchArgs, ToolArgs, FILTERED_SEARCH};
use crate::tools::Tool;

pub const NO_MATCHES: &str = "No books were found matching the specified criteria.";

pub struct FilteredSearchTool {
    store: Arc<dyn CatalogStore>,
    limit: usize,
}

impl FilteredSearchTool {
    pub fn new(store: Arc<dyn CatalogStore>, limit: usize) -> Self {
        Self {
            store,
            limit: limit.max(1),
        }
    }
}

#[async_trait]
impl Tool for FilteredSearchTool {
    fn name(&self) -> &str {
        FILTERED_SEARCH
    }

    fn description(&self) -> &str {
        "Use this tool for precise lookups when a user provides a specific book title, author name, or genre. This is the correct tool for questions like 'Do you have Project Hail Mary?' or 'Show me books by Brandon Sanderson in the fantasy genre'. It is NOT for recommendations or topic-based searches."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<FilteredSearchArgs>()
    }

    async fn execute(&self, args: ToolArgs, _ctx: &SessionContext) -> Result<String, ToolError> {
        let ToolArgs::FilteredSearch(a) = args else {
            return Err(ToolArgs::mismatch(FILTERED_SEARCH));
        };
        let filter = CatalogFilter {
            title: a.title,
            author: a.author,
            genre: a.genre,
        };
        if filter.is_empty() {
            return Err(ToolError::validation(
                FILTERED_SEARCH,
                "at least one of title, author or genre is required",
            ));
        }

        let items = self
            .store
            .filter_embeddings(&filter, self.limit)
            .await
            .map_err(|e| ToolError::external(FILTERED_SEARCH, e))?;
        if items.is_empty() {
            return Ok(NO_MATCHES.to_string());
        }
        serde_json::to_string_pretty(&items).map_err(|e| ToolError::external(FILTERED_SEARCH, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EmbeddingRecord, InMemoryCatalog};

    async fn seeded(n: usize) -> Arc<InMemoryCatalog> {
        let store = Arc::new(InMemoryCatalog::new());
        for i in 0..n {
            store
                .upsert_embedding(EmbeddingRecord {
                    book_id: format!("b{i}"),
                    embedding: vec![1.0],
                    title: format!("Mistborn {i}"),
                    author: "Brandon Sanderson".into(),
                    genre: "Fantasy".into(),
                    summary: String::new(),
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_limit_and_json_shape() {
        let tool = FilteredSearchTool::new(seeded(12).await, 10);
        let ctx = SessionContext::new("s", "u");
        let out = tool
            .execute(
                ToolArgs::FilteredSearch(FilteredSearchArgs {
                    author: Some("sanderson".into()),
                    genre: Some("FANTASY".into()),
                    ..Default::default()
                }),
                &ctx,
            )
            .await
            .unwrap();
        let items: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(items.len(), 10);
        assert_eq!(items[0]["id"], "b0");
    }

    #[tokio::test]
    async fn test_no_match_message() {
        let tool = FilteredSearchTool::new(seeded(2).await, 10);
        let ctx = SessionContext::new("s", "u");
        let out = tool
            .execute(
                ToolArgs::FilteredSearch(FilteredSearchArgs {
                    title: Some("Dune".into()),
                    ..Default::default()
                }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out, NO_MATCHES);
    }

    /// 空条件在查询前被拒绝
    #[tokio::test]
    async fn test_empty_criteria_is_validation_error() {
        let tool = FilteredSearchTool::new(seeded(1).await, 10);
        let ctx = SessionContext::new("s", "u");
        let err = tool
            .execute(ToolArgs::FilteredSearch(FilteredSearchArgs::default()), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
    }
}
