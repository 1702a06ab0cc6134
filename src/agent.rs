//! Agent 运行时
//!
//! LibraryAgent::submit_turn 是唯一的入站接口：
//! 会话锁 -> 加载记忆 -> 推理/执行回合 -> 追加 user + 最终回复 -> 按阈值压缩。
//! create_agent_components 按配置构建补全、嵌入、存储与工具，供 REPL 或其他前端共享。

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::catalog::{CatalogStore, EmbeddingSync, InMemoryCatalog};
use crate::config::AppConfig;
use crate::core::{AgentError, SessionContext, SessionLocks};
use crate::llm::{
    create_groq_client, EmbeddingProvider, HashEmbedder, LlmClient, MockLlmClient, OpenAiClient,
    OpenAiEmbedder, COMPLETION_HANDLE, EMBEDDING_HANDLE, GROQ_INSTANT, SUMMARY_HANDLE,
    TOPIC_HANDLE,
};
use crate::memory::{CompactOutcome, InMemoryMemoryStore, MemoryManager, MemoryStore, Message};
use crate::react::{load_instructions, Planner, ReactEvent, TurnEngine, TurnInput};
use crate::retrieval::{DistanceMetric, Retriever};
use crate::tools::{
    AcquisitionRequestTool, FilteredSearchTool, PlainTextExtractor, StatusLookupTool,
    StudyPlanLimits, StudyPlanTool, StudyPlanner, ToolExecutor, ToolRegistry, TopicSearchTool,
    ValidationRules,
};

/// 推理确定性输出；摘要与主题抽取略放宽
const REASONING_TEMPERATURE: f32 = 0.0;
const AUXILIARY_TEMPERATURE: f32 = 0.2;

/// 回合失败时返回给调用方的唯一文案，不暴露内部细节
pub const GENERIC_FAILURE: &str = "Sorry, something went wrong on our side. Please try again later.";
pub const EMPTY_QUERY: &str = "Query is required.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Answered,
    Failed,
    Cancelled,
    /// 输入不合法，未进入回合
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnReply {
    pub answer: String,
    pub status: TurnStatus,
}

impl TurnReply {
    fn failed(status: TurnStatus) -> Self {
        Self {
            answer: GENERIC_FAILURE.to_string(),
            status,
        }
    }
}

/// 图书馆助手：回合引擎 + 记忆管理 + 会话级串行化
pub struct LibraryAgent {
    engine: TurnEngine,
    memory: MemoryManager,
    locks: SessionLocks,
}

impl LibraryAgent {
    pub fn new(engine: TurnEngine, memory: MemoryManager) -> Self {
        Self {
            engine,
            memory,
            locks: SessionLocks::new(),
        }
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn engine(&self) -> &TurnEngine {
        &self.engine
    }

    /// 处理一条用户消息
    pub async fn submit_turn(&self, session: &SessionContext, query: &str) -> TurnReply {
        self.submit_turn_with_cancel(session, query, &CancellationToken::new(), None)
            .await
    }

    /// 可取消、可推送过程事件的版本；取消或失败时不写入任何记忆
    pub async fn submit_turn_with_cancel(
        &self,
        session: &SessionContext,
        query: &str,
        cancel: &CancellationToken,
        event_tx: Option<&UnboundedSender<ReactEvent>>,
    ) -> TurnReply {
        let query = query.trim();
        if query.is_empty() {
            return TurnReply {
                answer: EMPTY_QUERY.to_string(),
                status: TurnStatus::Rejected,
            };
        }

        // 同一会话的回合串行执行
        let _guard = self.locks.acquire(&session.session_id).await;

        match self.run_locked(session, query, cancel, event_tx).await {
            Ok(answer) => TurnReply {
                answer,
                status: TurnStatus::Answered,
            },
            Err(AgentError::Cancelled) => {
                tracing::info!(session_id = %session.session_id, "turn cancelled");
                TurnReply::failed(TurnStatus::Cancelled)
            }
            Err(e) => {
                tracing::error!(session_id = %session.session_id, error = %e, "turn failed");
                TurnReply::failed(TurnStatus::Failed)
            }
        }
    }

    async fn run_locked(
        &self,
        session: &SessionContext,
        query: &str,
        cancel: &CancellationToken,
        event_tx: Option<&UnboundedSender<ReactEvent>>,
    ) -> Result<String, AgentError> {
        let memory = self.memory.load(&session.session_id).await?;
        tracing::info!(
            session_id = %session.session_id,
            history = memory.history.len(),
            has_summary = !memory.summary.is_empty(),
            "turn started"
        );

        let reply = self
            .engine
            .run_turn(
                TurnInput {
                    session,
                    summary: &memory.summary,
                    history: &memory.history,
                    user_message: query,
                },
                cancel,
                event_tx,
            )
            .await?;

        self.memory
            .append(&session.session_id, &[Message::user(query), reply.clone()])
            .await?;

        // 压缩失败只记录日志，下一回合重试
        match self.memory.maybe_compact(&session.session_id).await {
            Ok(CompactOutcome::Compacted(n)) => {
                tracing::info!(session_id = %session.session_id, messages = n, "memory compacted")
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session_id = %session.session_id, error = %e, "compaction failed")
            }
        }

        Ok(reply.content)
    }
}

/// 按配置构建的全部组件：agent 之外，目录存储、嵌入同步与学习计划入口也对外开放
pub struct AgentComponents {
    pub agent: LibraryAgent,
    pub catalog: Arc<dyn CatalogStore>,
    pub sync: Arc<EmbeddingSync>,
    pub study_planner: Arc<StudyPlanner>,
}

fn has_env(key: &str) -> bool {
    std::env::var(key).map(|v| !v.trim().is_empty()).unwrap_or(false)
}

/// 按 provider 创建补全客户端；缺少 API Key 时退回 Mock
pub(crate) fn create_llm_from_config(
    cfg: &AppConfig,
    model: Option<&str>,
    temperature: f32,
) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    match provider.as_str() {
        "groq" if has_env("GROQ_API_KEY") || has_env("OPENAI_API_KEY") => {
            tracing::info!("Using Groq LLM ({})", model.unwrap_or("default"));
            Arc::new(
                create_groq_client(cfg.llm.base_url.as_deref(), model).with_temperature(temperature),
            )
        }
        "openai" if has_env("OPENAI_API_KEY") => {
            let model = model.unwrap_or("gpt-4o-mini");
            tracing::info!("Using OpenAI LLM ({})", model);
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), model, None)
                    .with_temperature(temperature),
            )
        }
        "mock" => Arc::new(MockLlmClient::new()),
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}

fn create_embedder_from_config(cfg: &AppConfig) -> Arc<dyn EmbeddingProvider> {
    match cfg.embedding.provider.to_lowercase().as_str() {
        "openai" if has_env("OPENAI_API_KEY") => {
            tracing::info!("Using OpenAI embeddings ({})", cfg.embedding.model);
            Arc::new(OpenAiEmbedder::new(
                cfg.embedding.base_url.as_deref(),
                &cfg.embedding.model,
                None,
            ))
        }
        "hash" => Arc::new(HashEmbedder::new(cfg.embedding.dimensions)),
        other => {
            tracing::warn!(provider = %other, "Embedding provider unavailable, using hash embeddings");
            Arc::new(HashEmbedder::new(cfg.embedding.dimensions))
        }
    }
}

async fn create_stores(
    cfg: &AppConfig,
) -> anyhow::Result<(Arc<dyn CatalogStore>, Arc<dyn MemoryStore>)> {
    match cfg.storage.backend.to_lowercase().as_str() {
        "memory" => Ok((
            Arc::new(InMemoryCatalog::new()),
            Arc::new(InMemoryMemoryStore::new()),
        )),
        #[cfg(feature = "async-sqlite")]
        "sqlite" => {
            let path = &cfg.storage.sqlite_path;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let catalog = crate::catalog::SqliteCatalog::new(path)
                .await
                .context("Failed to open catalog database")?;
            let memory = crate::memory::SqliteMemoryStore::new(path)
                .await
                .context("Failed to open memory database")?;
            tracing::info!(path = %path.display(), "Using SQLite storage");
            Ok((Arc::new(catalog), Arc::new(memory)))
        }
        #[cfg(not(feature = "async-sqlite"))]
        "sqlite" => anyhow::bail!("sqlite storage requires the async-sqlite feature"),
        other => anyhow::bail!("unknown storage backend: {other}"),
    }
}

/// 按配置创建全部组件；补全与嵌入句柄为进程级单例，重复调用复用首次初始化的实例
pub async fn create_agent_components(cfg: &AppConfig) -> anyhow::Result<AgentComponents> {
    let llm = COMPLETION_HANDLE
        .get_or_try_init(|| async {
            Ok::<_, anyhow::Error>(create_llm_from_config(
                cfg,
                cfg.llm.model.as_deref(),
                REASONING_TEMPERATURE,
            ))
        })
        .await?;
    let topic_extractor = TOPIC_HANDLE
        .get_or_try_init(|| async {
            Ok::<_, anyhow::Error>(create_llm_from_config(
                cfg,
                cfg.llm.model.as_deref(),
                AUXILIARY_TEMPERATURE,
            ))
        })
        .await?;
    let summarizer = SUMMARY_HANDLE
        .get_or_try_init(|| async {
            let model = cfg
                .llm
                .summary_model
                .as_deref()
                .or(cfg.llm.model.as_deref())
                .or(Some(GROQ_INSTANT).filter(|_| cfg.llm.provider.eq_ignore_ascii_case("groq")));
            Ok::<_, anyhow::Error>(create_llm_from_config(cfg, model, AUXILIARY_TEMPERATURE))
        })
        .await?;
    let embedder = EMBEDDING_HANDLE
        .get_or_try_init(|| async { Ok::<_, anyhow::Error>(create_embedder_from_config(cfg)) })
        .await?;

    let metric = DistanceMetric::parse(&cfg.embedding.metric)
        .with_context(|| format!("unknown distance metric: {}", cfg.embedding.metric))?;
    let (catalog, memory_store) = create_stores(cfg).await?;

    let retriever = Arc::new(Retriever::new(
        embedder.clone(),
        catalog.clone(),
        metric,
        cfg.embedding.timeout_secs,
    ));
    let study_planner = Arc::new(
        StudyPlanner::new(
            topic_extractor.clone(),
            retriever.clone(),
            Arc::new(PlainTextExtractor),
            StudyPlanLimits {
                top_k: cfg.tools.study_plan_top_k,
                max_topics: cfg.tools.study_plan_max_topics,
                max_chars: cfg.tools.syllabus_max_chars,
            },
        )
        .with_llm_timeout(cfg.llm.timeouts.request),
    );

    let mut registry = ToolRegistry::new().with_rules(ValidationRules {
        topic_min_chars: cfg.tools.topic_min_chars,
    });
    registry.register(StatusLookupTool::new(catalog.clone()));
    registry.register(FilteredSearchTool::new(catalog.clone(), cfg.tools.filter_limit));
    registry.register(TopicSearchTool::new(retriever, cfg.tools.topic_top_k));
    registry.register(AcquisitionRequestTool::new(catalog.clone()));
    registry.register(StudyPlanTool::new(study_planner.clone()));

    let instructions = load_instructions(cfg.app.system_prompt_path.as_deref());
    let planner = Planner::new(llm, instructions, &registry).with_timeout(cfg.llm.timeouts.request);
    let executor = ToolExecutor::new(registry, cfg.tools.tool_timeout_secs)
        .with_max_concurrent(cfg.tools.max_concurrent_tools);
    let engine = TurnEngine::new(planner, executor).with_max_iterations(cfg.agent.max_iterations);

    let memory = MemoryManager::new(memory_store, summarizer, cfg.memory.summarize_threshold)
        .with_timeouts(cfg.memory.storage_timeout_secs, cfg.llm.timeouts.request);

    let sync = Arc::new(EmbeddingSync::new(
        catalog.clone(),
        embedder,
        cfg.embedding.timeout_secs,
    ));

    Ok(AgentComponents {
        agent: LibraryAgent::new(engine, memory),
        catalog,
        sync,
        study_planner,
    })
}
