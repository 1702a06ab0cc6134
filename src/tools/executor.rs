//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时；单个调用在超时内执行，每次调用输出结构化审计日志（JSON）。
//! 同一推理步的多个调用并发执行（Semaphore 限制并发数），结果按请求顺序返回。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::core::{SessionContext, ToolError};
use crate::memory::{Message, ToolCall};
use crate::tools::ToolRegistry;

/// 单个工具调用的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub tool: String,
    pub result: Result<String, ToolError>,
}

impl ToolOutcome {
    /// 转为 tool 消息；失败时为人类可读的错误描述
    pub fn into_message(self) -> Message {
        let content = match self.result {
            Ok(content) => content,
            Err(e) => e.observation(),
        };
        Message::tool_result(self.tool, content)
    }
}

/// 工具执行器：对每次调用施加超时，并限制同一步内的并发数
///
/// 并发上限按推理步计：每次 execute_all 新建信号量，不同会话之间不共享。
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    max_concurrent: usize,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout: Duration::from_secs(timeout_secs),
            max_concurrent: 3,
        }
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// 执行单个调用；超时返回 ToolError::Timeout；输出 JSON 审计日志
    pub async fn execute(&self, call: &ToolCall, ctx: &SessionContext) -> Result<String, ToolError> {
        self.execute_with_permits(call, ctx, None).await
    }

    async fn execute_with_permits(
        &self,
        call: &ToolCall,
        ctx: &SessionContext,
        permits: Option<&Semaphore>,
    ) -> Result<String, ToolError> {
        let start = Instant::now();
        let result = match permits {
            Some(sem) => match sem.acquire().await {
                Ok(_permit) => self.run_with_timeout(call, ctx).await,
                Err(e) => Err(ToolError::external(&call.tool, e)),
            },
            None => self.run_with_timeout(call, ctx).await,
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::Validation { .. }) | Err(ToolError::UnknownTool(_)) => "invalid",
            Err(ToolError::Timeout(_)) => "timeout",
            Err(ToolError::External { .. }) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "session_id": ctx.session_id,
            "tool": call.tool,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    async fn run_with_timeout(&self, call: &ToolCall, ctx: &SessionContext) -> Result<String, ToolError> {
        timeout(self.timeout, self.registry.execute(call, ctx))
            .await
            .unwrap_or_else(|_| Err(ToolError::Timeout(call.tool.clone())))
    }

    /// 并发执行一步内的全部调用，结果与 calls 一一对应
    pub async fn execute_all(&self, calls: &[ToolCall], ctx: &SessionContext) -> Vec<ToolOutcome> {
        let permits = Semaphore::new(self.max_concurrent);
        let permits = &permits;
        let futures = calls.iter().map(|call| async move {
            ToolOutcome {
                tool: call.tool.clone(),
                result: self.execute_with_permits(call, ctx, Some(permits)).await,
            }
        });
        join_all(futures).await
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::schema::{parameters_schema, StatusLookupArgs, ToolArgs, STATUS_LOOKUP};
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;

    /// identifier 形如 "<毫秒>:<文本>"，按给定时长睡眠后返回文本
    struct SleepyTool;

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            STATUS_LOOKUP
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            parameters_schema::<StatusLookupArgs>()
        }

        async fn execute(&self, args: ToolArgs, _ctx: &SessionContext) -> Result<String, ToolError> {
            let ToolArgs::StatusLookup(a) = args else {
                return Err(ToolArgs::mismatch(STATUS_LOOKUP));
            };
            let (ms, text) = a.identifier.split_once(':').unwrap_or(("0", a.identifier.as_str()));
            tokio::time::sleep(Duration::from_millis(ms.parse().unwrap_or(0))).await;
            Ok(text.to_string())
        }
    }

    fn executor(timeout_secs: u64) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(SleepyTool);
        ToolExecutor::new(registry, timeout_secs).with_max_concurrent(4)
    }

    #[tokio::test]
    async fn test_results_keep_request_order() {
        let ex = executor(5);
        let ctx = SessionContext::new("s", "u");
        let calls = vec![
            ToolCall::new(STATUS_LOOKUP, json!({"identifier": "120:first"})),
            ToolCall::new(STATUS_LOOKUP, json!({"identifier": "10:second"})),
            ToolCall::new("missing_tool", json!({})),
            ToolCall::new(STATUS_LOOKUP, json!({"identifier": "60:fourth"})),
        ];
        let outcomes = ex.execute_all(&calls, &ctx).await;
        let messages: Vec<Message> = outcomes.into_iter().map(ToolOutcome::into_message).collect();
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");
        assert!(messages[2].content.starts_with("Error: Unknown tool: missing_tool"));
        assert_eq!(messages[3].content, "fourth");
        assert_eq!(messages[2].tool_name.as_deref(), Some("missing_tool"));
    }

    #[tokio::test]
    async fn test_timeout_becomes_tool_error() {
        let ex = executor(1);
        let ctx = SessionContext::new("s", "u");
        let call = ToolCall::new(STATUS_LOOKUP, json!({"identifier": "1500:late"}));
        let err = ex.execute(&call, &ctx).await.unwrap_err();
        assert_eq!(err, ToolError::Timeout(STATUS_LOOKUP.into()));
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_permits() {
        let ex = Arc::new(executor(30).with_max_concurrent(3));
        let slow = vec![ToolCall::new(STATUS_LOOKUP, json!({"identifier": "1500:slow"})); 3];
        let a = {
            let ex = ex.clone();
            tokio::spawn(async move {
                let ctx = SessionContext::new("sess-a", "u");
                ex.execute_all(&slow, &ctx).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let ctx = SessionContext::new("sess-b", "u");
        let quick = [ToolCall::new(STATUS_LOOKUP, json!({"identifier": "0:quick"}))];
        let start = Instant::now();
        let outcomes = ex.execute_all(&quick, &ctx).await;
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(outcomes[0].result, Ok("quick".to_string()));
        assert!(!a.is_finished());

        let slow_outcomes = a.await.unwrap();
        assert!(slow_outcomes.iter().all(|o| o.result == Ok("slow".to_string())));
    }

    #[tokio::test]
    async fn test_step_concurrency_is_bounded() {
        let ex = executor(30).with_max_concurrent(2);
        let ctx = SessionContext::new("s", "u");
        let calls = vec![ToolCall::new(STATUS_LOOKUP, json!({"identifier": "200:x"})); 4];
        let start = Instant::now();
        ex.execute_all(&calls, &ctx).await;
        // 4 个调用、并发 2，至少两轮
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
