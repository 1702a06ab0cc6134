//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找；
//! 注册表边界完成名称解析、会话身份注入、类型解析与约束校验，工具本身只处理已校验的参数。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{SessionContext, ToolError};
use crate::memory::ToolCall;
use crate::tools::schema::{ToolArgs, ValidationRules};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 判断何时调用）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value;

    /// 执行工具；args 已通过校验
    async fn execute(&self, args: ToolArgs, ctx: &SessionContext) -> Result<String, ToolError>;
}

/// 工具注册表：按名称有序存储，保证 prompt 中的工具清单稳定
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    rules: ValidationRules,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 工具清单 JSON（名称、描述、参数 schema）
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }

    /// 名称解析 → 身份注入 → 类型解析 → 约束校验
    pub fn prepare(
        &self,
        call: &ToolCall,
        ctx: &SessionContext,
    ) -> Result<(Arc<dyn Tool>, ToolArgs), ToolError> {
        let tool = self
            .get(&call.tool)
            .ok_or_else(|| ToolError::UnknownTool(call.tool.clone()))?;
        let args = ToolArgs::parse(call, ctx)?;
        args.validate(&self.rules, ctx)?;
        Ok((tool, args))
    }

    pub async fn execute(&self, call: &ToolCall, ctx: &SessionContext) -> Result<String, ToolError> {
        let (tool, args) = self.prepare(call, ctx)?;
        tool.execute(args, ctx).await
    }
}
