//! 工具参数：每个工具一个强类型结构体，schemars 生成参数 Schema
//!
//! 解析顺序：`{"tool": ..., "args": ...}` → ToolArgs（类型错误即校验失败）→ validate（约束检查）。
//! acquisition_request 的 user_id 不出现在 Schema 中，由注册表从 SessionContext 注入。

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::core::{SessionContext, ToolError};
use crate::memory::ToolCall;

pub const STATUS_LOOKUP: &str = "status_lookup";
pub const FILTERED_SEARCH: &str = "filtered_search";
pub const TOPIC_SEARCH: &str = "topic_search";
pub const ACQUISITION_REQUEST: &str = "acquisition_request";
pub const STUDY_PLAN: &str = "study_plan";

/// 请求书名的最大长度（字符）
pub const MAX_TITLE_CHARS: usize = 255;

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct StatusLookupArgs {
    /// The exact title (or part of it) or the UUID of the book to check.
    pub identifier: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, JsonSchema)]
pub struct FilteredSearchArgs {
    /// The title of the book to search for.
    #[serde(default)]
    pub title: Option<String>,
    /// The name of the author to search for.
    #[serde(default)]
    pub author: Option<String>,
    /// The genre to search for.
    #[serde(default)]
    pub genre: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct TopicSearchArgs {
    /// The user's topic or concept query.
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct AcquisitionRequestArgs {
    /// The title of the requested book.
    pub title: String,
    /// The author of the requested book, if known.
    #[serde(default)]
    pub author: Option<String>,
    /// The genre of the requested book, if known.
    #[serde(default)]
    pub genre: Option<String>,
    /// Any additional notes or reason for the request.
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    #[schemars(skip)]
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, JsonSchema)]
pub struct StudyPlanArgs {
    /// The text content of the syllabus.
    #[serde(default, alias = "syllabusText")]
    pub syllabus_text: Option<String>,
    /// Path to the uploaded syllabus file.
    #[serde(default, alias = "filePath")]
    pub file_path: Option<String>,
}

/// 工具调用的强类型参数
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ToolArgs {
    StatusLookup(StatusLookupArgs),
    FilteredSearch(FilteredSearchArgs),
    TopicSearch(TopicSearchArgs),
    AcquisitionRequest(AcquisitionRequestArgs),
    StudyPlan(StudyPlanArgs),
}

/// 运行时约束（来自配置）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRules {
    pub topic_min_chars: usize,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self { topic_min_chars: 3 }
    }
}

fn blank(s: &Option<String>) -> bool {
    s.as_deref().map(str::trim).unwrap_or("").is_empty()
}

impl ToolArgs {
    /// 按工具名解析参数；调用方需先确认工具已注册
    pub fn parse(call: &ToolCall, ctx: &SessionContext) -> Result<Self, ToolError> {
        let mut args = match &call.args {
            Value::Object(map) => map.clone(),
            Value::Null => Default::default(),
            other => {
                return Err(ToolError::validation(
                    &call.tool,
                    format!("arguments must be a JSON object, got {other}"),
                ))
            }
        };
        if call.tool == ACQUISITION_REQUEST {
            // 永远以会话身份为准
            args.insert("user_id".into(), Value::String(ctx.user_id.clone()));
        }
        let tagged = serde_json::json!({ "tool": call.tool, "args": args });
        serde_json::from_value(tagged).map_err(|e| ToolError::validation(&call.tool, e.to_string()))
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolArgs::StatusLookup(_) => STATUS_LOOKUP,
            ToolArgs::FilteredSearch(_) => FILTERED_SEARCH,
            ToolArgs::TopicSearch(_) => TOPIC_SEARCH,
            ToolArgs::AcquisitionRequest(_) => ACQUISITION_REQUEST,
            ToolArgs::StudyPlan(_) => STUDY_PLAN,
        }
    }

    /// 约束检查
    pub fn validate(&self, rules: &ValidationRules, ctx: &SessionContext) -> Result<(), ToolError> {
        let tool = self.tool_name();
        match self {
            ToolArgs::StatusLookup(a) => {
                if a.identifier.trim().is_empty() {
                    return Err(ToolError::validation(tool, "identifier must not be empty"));
                }
            }
            ToolArgs::FilteredSearch(a) => {
                if blank(&a.title) && blank(&a.author) && blank(&a.genre) {
                    return Err(ToolError::validation(
                        tool,
                        "at least one of title, author or genre is required",
                    ));
                }
            }
            ToolArgs::TopicSearch(a) => {
                if a.topic.trim().chars().count() < rules.topic_min_chars {
                    return Err(ToolError::validation(
                        tool,
                        format!(
                            "topic must be at least {} characters long",
                            rules.topic_min_chars
                        ),
                    ));
                }
            }
            ToolArgs::AcquisitionRequest(a) => {
                if a.title.trim().is_empty() {
                    return Err(ToolError::validation(tool, "title must not be empty"));
                }
                if a.user_id.is_empty() || a.user_id != ctx.user_id {
                    return Err(ToolError::validation(
                        tool,
                        "the request must carry the current session's user id",
                    ));
                }
            }
            ToolArgs::StudyPlan(a) => match (blank(&a.syllabus_text), blank(&a.file_path)) {
                (true, true) => {
                    return Err(ToolError::validation(
                        tool,
                        "provide either syllabus_text or file_path",
                    ))
                }
                (false, false) => {
                    return Err(ToolError::validation(
                        tool,
                        "provide only one of syllabus_text or file_path",
                    ))
                }
                _ => {}
            },
        }
        Ok(())
    }

    /// 工具收到了不属于自己的参数变体
    pub fn mismatch(expected: &str) -> ToolError {
        ToolError::validation(expected, "arguments were parsed for a different tool")
    }
}

/// 参数 Schema（供 system prompt 中的工具清单使用）
pub fn parameters_schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> SessionContext {
        SessionContext::new("s1", "user-42")
    }

    fn parse(tool: &str, args: Value) -> Result<ToolArgs, ToolError> {
        ToolArgs::parse(&ToolCall::new(tool, args), &ctx())
    }

    #[test]
    fn test_user_id_is_injected_over_model_value() {
        let args = parse(
            ACQUISITION_REQUEST,
            json!({"title": "Dune", "user_id": "someone-else"}),
        )
        .unwrap();
        let ToolArgs::AcquisitionRequest(a) = &args else {
            panic!("wrong variant");
        };
        assert_eq!(a.user_id, "user-42");
        assert!(args.validate(&ValidationRules::default(), &ctx()).is_ok());
    }

    #[test]
    fn test_type_error_is_validation() {
        let err = parse(STATUS_LOOKUP, json!({"identifier": 5})).unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
        let err = parse(TOPIC_SEARCH, json!({})).unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
    }

    #[test]
    fn test_empty_filter_rejected() {
        let args = parse(FILTERED_SEARCH, json!({"title": "  "})).unwrap();
        assert!(args.validate(&ValidationRules::default(), &ctx()).is_err());
    }

    #[test]
    fn test_topic_min_length() {
        let rules = ValidationRules::default();
        let short = parse(TOPIC_SEARCH, json!({"topic": "ai"})).unwrap();
        assert!(short.validate(&rules, &ctx()).is_err());
        let ok = parse(TOPIC_SEARCH, json!({"topic": "space"})).unwrap();
        assert!(ok.validate(&rules, &ctx()).is_ok());
    }

    #[test]
    fn test_study_plan_needs_exactly_one_source() {
        let rules = ValidationRules::default();
        let both = parse(
            STUDY_PLAN,
            json!({"syllabus_text": "Week 1", "file_path": "/tmp/s.txt"}),
        )
        .unwrap();
        assert!(both.validate(&rules, &ctx()).is_err());
        let none = parse(STUDY_PLAN, json!({})).unwrap();
        assert!(none.validate(&rules, &ctx()).is_err());
        let camel = parse(STUDY_PLAN, json!({"syllabusText": "Week 1: Algebra"})).unwrap();
        assert!(camel.validate(&rules, &ctx()).is_ok());
    }

    #[test]
    fn test_schema_hides_user_id() {
        let schema = parameters_schema::<AcquisitionRequestArgs>().to_string();
        assert!(schema.contains("title"));
        assert!(!schema.contains("user_id"));
    }
}
