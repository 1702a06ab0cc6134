//! 学习计划：从大纲文本抽取主题，逐个主题做语义检索
//!
//! StudyPlanner 同时作为独立入口（上传大纲）与 study_plan 工具的实现。

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;

use crate::core::{SessionContext, ToolError};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::retrieval::{RankedItem, Retriever};
use crate::tools::extract::TextExtractor;
use crate::tools::schema::{parameters_schema, StudyPlanArgs, ToolArgs, STUDY_PLAN};
use crate::tools::Tool;

/// 学习计划结果：主题 → 相关图书
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyPlan {
    pub summary: String,
    pub topics: BTreeMap<String, Vec<RankedItem>>,
}

/// 学习计划参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StudyPlanLimits {
    pub top_k: usize,
    pub max_topics: usize,
    pub max_chars: usize,
}

impl Default for StudyPlanLimits {
    fn default() -> Self {
        Self {
            top_k: 3,
            max_topics: 12,
            max_chars: 5000,
        }
    }
}

pub fn topic_prompt(syllabus: &str, max_chars: usize) -> String {
    let excerpt: String = syllabus.chars().take(max_chars).collect();
    format!(
        "Extract the key academic topics and subjects from this syllabus text.\nReturn them as a comma-separated list only, with no commentary:\n\n{excerpt}"
    )
}

/// 解析逗号分隔的主题列表：去空白、去尾部句点、不区分大小写去重
pub fn parse_topics(text: &str, max_topics: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split([',', '\n'])
        .map(|t| t.trim().trim_end_matches('.').trim())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .take(max_topics)
        .map(String::from)
        .collect()
}

pub struct StudyPlanner {
    llm: Arc<dyn LlmClient>,
    retriever: Arc<Retriever>,
    extractor: Arc<dyn TextExtractor>,
    limits: StudyPlanLimits,
    llm_timeout: Duration,
}

impl StudyPlanner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        retriever: Arc<Retriever>,
        extractor: Arc<dyn TextExtractor>,
        limits: StudyPlanLimits,
    ) -> Self {
        Self {
            llm,
            retriever,
            extractor,
            limits,
            llm_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_llm_timeout(mut self, secs: u64) -> Self {
        self.llm_timeout = Duration::from_secs(secs);
        self
    }

    /// 从文件生成（上传入口）
    pub async fn generate_from_file(&self, path: &Path) -> Result<StudyPlan, ToolError> {
        let text = self
            .extractor
            .extract(path)
            .await
            .map_err(|e| ToolError::external(STUDY_PLAN, e))?;
        self.generate(&text).await
    }

    pub async fn generate(&self, syllabus: &str) -> Result<StudyPlan, ToolError> {
        if syllabus.trim().is_empty() {
            return Err(ToolError::validation(STUDY_PLAN, "the syllabus text is empty"));
        }
        let prompt = topic_prompt(syllabus, self.limits.max_chars);
        let completion = timeout(self.llm_timeout, self.llm.complete(&[Message::user(prompt)]))
            .await
            .map_err(|_| ToolError::Timeout(STUDY_PLAN.to_string()))?
            .map_err(|e| ToolError::external(STUDY_PLAN, e))?;

        let topics = parse_topics(&completion.text, self.limits.max_topics);
        if topics.is_empty() {
            return Ok(StudyPlan {
                summary: "No topics detected in the syllabus.".to_string(),
                topics: BTreeMap::new(),
            });
        }

        let mut plan = BTreeMap::new();
        for topic in &topics {
            let ranked = self
                .retriever
                .search(topic, self.limits.top_k)
                .await
                .map_err(|e| ToolError::external(STUDY_PLAN, e))?;
            plan.insert(topic.clone(), ranked);
        }
        tracing::info!(topics = topics.len(), "study plan generated");
        Ok(StudyPlan {
            summary: format!("Generated study plan for {} topics.", topics.len()),
            topics: plan,
        })
    }
}

pub struct StudyPlanTool {
    planner: Arc<StudyPlanner>,
}

impl StudyPlanTool {
    pub fn new(planner: Arc<StudyPlanner>) -> Self {
        Self { planner }
    }
}

#[async_trait]
impl Tool for StudyPlanTool {
    fn name(&self) -> &str {
        STUDY_PLAN
    }

    fn description(&self) -> &str {
        "Generates a structured study plan from a syllabus, given either as text or as a path to an uploaded file (exactly one of them). It extracts the key topics and maps each one to relevant library books using semantic similarity search."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<StudyPlanArgs>()
    }

    async fn execute(&self, args: ToolArgs, _ctx: &SessionContext) -> Result<String, ToolError> {
        let ToolArgs::StudyPlan(a) = args else {
            return Err(ToolArgs::mismatch(STUDY_PLAN));
        };
        let non_blank = |s: Option<String>| s.filter(|s| !s.trim().is_empty());
        let plan = match (non_blank(a.syllabus_text), non_blank(a.file_path)) {
            (Some(text), None) => self.planner.generate(&text).await?,
            (None, Some(path)) => self.planner.generate_from_file(Path::new(path.trim())).await?,
            _ => {
                return Err(ToolError::validation(
                    STUDY_PLAN,
                    "provide exactly one of syllabus_text or file_path",
                ))
            }
        };
        serde_json::to_string_pretty(&plan).map_err(|e| ToolError::external(STUDY_PLAN, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogStore, EmbeddingRecord, InMemoryCatalog};
    use crate::llm::{Completion, HashEmbedder, MockLlmClient};
    use crate::retrieval::DistanceMetric;
    use crate::tools::extract::PlainTextExtractor;

    async fn planner(reply: &str) -> (StudyPlanner, Arc<MockLlmClient>) {
        let store = Arc::new(InMemoryCatalog::new());
        let embedder = HashEmbedder::default();
        for (id, title) in [
            ("b1", "Linear algebra done right"),
            ("b2", "Introduction to probability"),
            ("b3", "Organic chemistry"),
        ] {
            store
                .upsert_embedding(EmbeddingRecord {
                    book_id: id.into(),
                    embedding: embedder.embed_now(title),
                    title: title.into(),
                    author: "a".into(),
                    genre: "Textbook".into(),
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
        let llm = Arc::new(MockLlmClient::scripted(vec![Ok(Completion::text(reply))]));
        let planner = StudyPlanner::new(
            llm.clone(),
            retriever,
            Arc::new(PlainTextExtractor),
            StudyPlanLimits::default(),
        );
        (planner, llm)
    }

    #[test]
    fn test_parse_topics_dedupes() {
        assert_eq!(
            parse_topics("Linear algebra, probability,  Linear Algebra , statistics.", 10),
            vec!["Linear algebra", "probability", "statistics"]
        );
        assert!(parse_topics(" , ", 10).is_empty());
        assert_eq!(parse_topics("a, b, c", 2).len(), 2);
    }

    #[tokio::test]
    async fn test_generate_maps_topics_to_books() {
        let (planner, llm) = planner("linear algebra, probability").await;
        let syllabus = "Week 1: vectors. ".repeat(600);
        let plan = planner.generate(&syllabus).await.unwrap();
        assert_eq!(plan.summary, "Generated study plan for 2 topics.");
        assert_eq!(plan.topics["linear algebra"][0].item.id, "b1");
        assert_eq!(plan.topics["probability"][0].item.id, "b2");
        assert!(plan.topics["probability"].len() <= 3);

        // 只把前 5000 个字符交给模型
        let prompt = llm.last_prompt_text();
        let excerpt = prompt.split("\n\n").nth(1).unwrap();
        assert_eq!(excerpt.chars().count(), 5000);
    }

    #[tokio::test]
    async fn test_no_topics() {
        let (planner, _) = planner("  ").await;
        let plan = planner.generate("Some syllabus").await.unwrap();
        assert!(plan.topics.is_empty());
        assert_eq!(plan.summary, "No topics detected in the syllabus.");
    }

    #[tokio::test]
    async fn test_missing_file_is_external_error() {
        let (planner, _) = planner("x").await;
        let err = planner
            .generate_from_file(Path::new("/definitely/not/here.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::External { .. }));
    }
}
