//! 推理/执行主循环
//!
//! Reasoning -> (有工具调用) Acting -> Reasoning ... -> Done；支持 RetryWithPrompt、Cancel、最大步数限制。
//! 可选 event_tx：向前端推送 StepUpdate / Thinking / ToolCall / Observation / MessageChunk / MessageDone。

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine, SessionContext};
use crate::memory::{Message, ToolCall};
use crate::react::planner::{PlannerOutput, PromptInput};
use crate::react::{Planner, ReactEvent};
use crate::tools::ToolExecutor;

/// 单回合默认最大推理步数
pub const DEFAULT_MAX_ITERATIONS: usize = 8;
/// 流式回复时每段字符数
const CHUNK_CHARS: usize = 6;
/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 回合状态机
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Reasoning,
    Acting(Vec<ToolCall>),
    Done(Message),
}

/// 一个回合的输入：已持久化的记忆 + 新的用户消息
pub struct TurnInput<'a> {
    pub session: &'a SessionContext,
    pub summary: &'a str,
    pub history: &'a [Message],
    pub user_message: &'a str,
}

fn send_event(tx: Option<&UnboundedSender<ReactEvent>>, ev: ReactEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 推理/执行引擎：Planner + ToolExecutor + RecoveryEngine，外加步数上限
pub struct TurnEngine {
    planner: Planner,
    executor: ToolExecutor,
    recovery: RecoveryEngine,
    max_iterations: usize,
}

impl TurnEngine {
    pub fn new(planner: Planner, executor: ToolExecutor) -> Self {
        Self {
            planner,
            executor,
            recovery: RecoveryEngine::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n.max(1);
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// 执行一个回合，返回最终 assistant 消息
    ///
    /// 取消在每次推理前检查；推理中的补全调用随取消被丢弃，已开始的工具调用会执行完毕。
    /// 回合内的工具往返只存在于本函数，不写入记忆。
    pub async fn run_turn(
        &self,
        input: TurnInput<'_>,
        cancel: &CancellationToken,
        event_tx: Option<&UnboundedSender<ReactEvent>>,
    ) -> Result<Message, AgentError> {
        let user_message = Message::user(input.user_message);
        let (init_prompt, init_completion, _) = self.planner.token_usage();

        let mut working: Vec<Message> = Vec::new();
        let mut correction: Option<String> = None;
        let mut step = 0;
        let mut phase = Phase::Reasoning;

        loop {
            phase = match phase {
                Phase::Reasoning => {
                    if cancel.is_cancelled() {
                        send_event(event_tx, ReactEvent::Error { text: "Cancelled".to_string() });
                        return Err(AgentError::Cancelled);
                    }
                    if step >= self.max_iterations {
                        tracing::warn!(
                            session_id = %input.session.session_id,
                            max = self.max_iterations,
                            "iteration bound reached"
                        );
                        send_event(event_tx, ReactEvent::Error {
                            text: format!("Reached {} reasoning steps", self.max_iterations),
                        });
                        return Err(AgentError::MaxIterations(self.max_iterations));
                    }
                    step += 1;
                    send_event(event_tx, ReactEvent::StepUpdate {
                        step,
                        max_steps: self.max_iterations,
                    });
                    send_event(event_tx, ReactEvent::Thinking);

                    let prompt = PromptInput {
                        session: input.session,
                        summary: input.summary,
                        history: input.history,
                        user_message: &user_message,
                        working: &working,
                        correction: correction.as_deref(),
                    };
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(AgentError::Cancelled),
                        r = self.planner.reason(&prompt) => r,
                    };

                    match result {
                        Ok(PlannerOutput::Response(text)) => Phase::Done(Message::assistant(text)),
                        Ok(PlannerOutput::ToolCalls { thought, calls }) => {
                            correction = None;
                            if !thought.is_empty() {
                                send_event(event_tx, ReactEvent::ThinkingContent {
                                    text: thought.clone(),
                                });
                            }
                            working.push(Message::assistant_with_calls(thought, calls.clone()));
                            Phase::Acting(calls)
                        }
                        Err(e) => match self.recovery.handle(&e) {
                            RecoveryAction::RetryWithPrompt(prompt) => {
                                tracing::warn!(error = %e, "malformed completion, retrying");
                                send_event(event_tx, ReactEvent::Recovery {
                                    action: "RetryWithPrompt".to_string(),
                                    detail: prompt.clone(),
                                });
                                correction = Some(prompt);
                                Phase::Reasoning
                            }
                            RecoveryAction::Abort => {
                                send_event(event_tx, ReactEvent::Recovery {
                                    action: "Abort".to_string(),
                                    detail: e.to_string(),
                                });
                                send_event(event_tx, ReactEvent::Error { text: e.to_string() });
                                return Err(e);
                            }
                        },
                    }
                }

                Phase::Acting(calls) => {
                    for call in &calls {
                        send_event(event_tx, ReactEvent::ToolCall {
                            tool: call.tool.clone(),
                            args: call.args.clone(),
                        });
                    }
                    let outcomes = self.executor.execute_all(&calls, input.session).await;
                    for outcome in outcomes {
                        match &outcome.result {
                            Ok(content) => send_event(event_tx, ReactEvent::Observation {
                                tool: outcome.tool.clone(),
                                preview: preview(content, OBSERVATION_PREVIEW_CHARS),
                            }),
                            Err(e) => {
                                tracing::warn!(tool = %outcome.tool, error = %e, "tool failed");
                                send_event(event_tx, ReactEvent::ToolFailure {
                                    tool: outcome.tool.clone(),
                                    reason: e.to_string(),
                                });
                            }
                        }
                        working.push(outcome.into_message());
                    }
                    Phase::Reasoning
                }

                Phase::Done(message) => {
                    let chars: Vec<char> = message.content.chars().collect();
                    for chunk in chars.chunks(CHUNK_CHARS) {
                        send_event(event_tx, ReactEvent::MessageChunk {
                            text: chunk.iter().collect(),
                        });
                    }
                    send_event(event_tx, ReactEvent::MessageDone);

                    let (cur_prompt, cur_completion, cur_total) = self.planner.token_usage();
                    send_event(event_tx, ReactEvent::TokenUsage {
                        prompt_tokens: cur_prompt.saturating_sub(init_prompt),
                        completion_tokens: cur_completion.saturating_sub(init_completion),
                        cumulative_total: cur_total,
                    });
                    tracing::info!(
                        session_id = %input.session.session_id,
                        steps = step,
                        "turn answered"
                    );
                    return Ok(message);
                }
            };
        }
    }
}
