//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LIBRIS__*` 覆盖（双下划线表示嵌套，如 `LIBRIS__LLM__PROVIDER=openai`）。
//! 每个键都有默认值，空配置也可运行（mock 补全 + 哈希嵌入 + 内存存储）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub agent: AgentSection,
    pub memory: MemorySection,
    pub tools: ToolsSection,
    pub storage: StorageSection,
}

/// [app] 段：应用名、行为指令文件
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// 覆盖默认行为指令的文本文件
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            system_prompt_path: None,
        }
    }
}

fn default_app_name() -> String {
    "libris".to_string()
}

/// [llm] 段：补全后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：groq / openai / mock；缺少 API Key 时退回 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 未设置时使用各后端的默认模型
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 摘要与主题抽取使用的模型，未设置时与 model 相同
    pub summary_model: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            summary_model: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "groq".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [embedding] 段：嵌入后端、维度、距离度量
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSection {
    /// openai / hash
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// cosine / inner_product / l2
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            base_url: None,
            dimensions: default_dimensions(),
            metric: default_metric(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_metric() -> String {
    "cosine".to_string()
}

fn default_embedding_timeout() -> u64 {
    30
}

/// [agent] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 单回合最大推理步数
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_max_iterations() -> usize {
    crate::react::DEFAULT_MAX_ITERATIONS
}

/// [memory] 段：压缩阈值与存储超时
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    /// 短期消息数达到此值时压缩为摘要
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold: usize,
    #[serde(default = "default_storage_timeout")]
    pub storage_timeout_secs: u64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            summarize_threshold: default_summarize_threshold(),
            storage_timeout_secs: default_storage_timeout(),
        }
    }
}

fn default_summarize_threshold() -> usize {
    10
}

fn default_storage_timeout() -> u64 {
    10
}

/// [tools] 段：工具超时、并发与各工具参数
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 同一推理步内最多并发执行的工具调用数
    #[serde(default = "default_max_concurrent_tools")]
    pub max_concurrent_tools: usize,
    #[serde(default = "default_filter_limit")]
    pub filter_limit: usize,
    #[serde(default = "default_topic_top_k")]
    pub topic_top_k: usize,
    #[serde(default = "default_topic_min_chars")]
    pub topic_min_chars: usize,
    #[serde(default = "default_study_plan_top_k")]
    pub study_plan_top_k: usize,
    #[serde(default = "default_study_plan_max_topics")]
    pub study_plan_max_topics: usize,
    #[serde(default = "default_syllabus_max_chars")]
    pub syllabus_max_chars: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            max_concurrent_tools: default_max_concurrent_tools(),
            filter_limit: default_filter_limit(),
            topic_top_k: default_topic_top_k(),
            topic_min_chars: default_topic_min_chars(),
            study_plan_top_k: default_study_plan_top_k(),
            study_plan_max_topics: default_study_plan_max_topics(),
            syllabus_max_chars: default_syllabus_max_chars(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_tools() -> usize {
    3
}

fn default_filter_limit() -> usize {
    10
}

fn default_topic_top_k() -> usize {
    5
}

fn default_topic_min_chars() -> usize {
    3
}

fn default_study_plan_top_k() -> usize {
    3
}

fn default_study_plan_max_topics() -> usize {
    12
}

fn default_syllabus_max_chars() -> usize {
    5000
}

/// [storage] 段：memory / sqlite（需要 async-sqlite feature）
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data/libris.db")
}

/// 从 config 目录加载配置，环境变量 LIBRIS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LIBRIS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LIBRIS")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
