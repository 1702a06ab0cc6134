//! 认知层：Planner（prompt 与工具调用解析）、推理/执行状态机、过程事件

pub mod events;
pub mod loop_;
pub mod planner;

pub use events::ReactEvent;
pub use loop_::{Phase, TurnEngine, TurnInput, DEFAULT_MAX_ITERATIONS};
pub use planner::{load_instructions, parse_llm_output, Planner, PlannerOutput, DEFAULT_INSTRUCTIONS};
