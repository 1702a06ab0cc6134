//! 语义检索：嵌入主题文本，按相似度取前 k 条

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{SessionContext, ToolError};
use crate::retrieval::Retriever;
use crate::tools::schema::{parameters_schema, ToolArgs, TopicSearchArgs, TOPIC_SEARCH};
use crate::tools::Tool;

pub struct TopicSearchTool {
    retriever: Arc<Retriever>,
    top_k: usize,
}

impl TopicSearchTool {
    pub fn new(retriever: Arc<Retriever>, top_k: usize) -> Self {
        Self {
            retriever,
            top_k: top_k.max(1),
        }
    }
}

#[async_trait]
impl Tool for TopicSearchTool {
    fn name(&self) -> &str {
        TOPIC_SEARCH
    }

    fn description(&self) -> &str {
        "Searches for books based on a general topic, concept, or description. Use this for broad, semantic queries like 'books about space exploration' or 'what are some funny fantasy novels?'. This is for recommendations, not for finding specific books by title or author."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<TopicSearchArgs>()
    }

    async fn execute(&self, args: ToolArgs, _ctx: &SessionContext) -> Result<String, ToolError> {
        let ToolArgs::TopicSearch(TopicSearchArgs { topic }) = args else {
            return Err(ToolArgs::mismatch(TOPIC_SEARCH));
        };
        let ranked = self
            .retriever
            .search(topic.trim(), self.top_k)
            .await
            .map_err(|e| ToolError::external(TOPIC_SEARCH, e))?;
        serde_json::to_string_pretty(&ranked).map_err(|e| ToolError::external(TOPIC_SEARCH, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogStore, EmbeddingRecord, InMemoryCatalog};
    use crate::llm::HashEmbedder;
    use crate::retrieval::DistanceMetric;

    #[tokio::test]
    async fn test_similarities_non_increasing() {
        let store = Arc::new(InMemoryCatalog::new());
        let embedder = HashEmbedder::default();
        let books = [
            ("b1", "Gardening for beginners"),
            ("b2", "Rockets, orbits and space exploration"),
            ("b3", "A history of space flight"),
            ("b4", "Knitting patterns"),
            ("b5", "Exploration of deep oceans"),
            ("b6", "Bread baking"),
        ];
        for (id, title) in books {
            store
                .upsert_embedding(EmbeddingRecord {
                    book_id: id.into(),
                    embedding: embedder.embed_now(title),
                    title: title.into(),
                    author: "x".into(),
                    genre: "y".into(),
                    summary: String::new(),
                })
                .await
                .unwrap();
        }
        let retriever = Arc::new(Retriever::new(
            Arc::new(embedder),
            store,
            DistanceMetric::Cosine,
            5,
        ));
        let tool = TopicSearchTool::new(retriever, 5);
        let out = tool
            .execute(
                ToolArgs::TopicSearch(TopicSearchArgs {
                    topic: "space exploration".into(),
                }),
                &SessionContext::new("s", "u"),
            )
            .await
            .unwrap();
        let items: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(items[0]["id"], "b2");
        let sims: Vec<f64> = items
            .iter()
            .map(|i| i["similarity"].as_f64().unwrap())
            .collect();
        assert!(sims.windows(2).all(|w| w[0] >= w[1]));
    }
}
