//! 能力注册表：五个强类型、带 Schema 校验的工具，以及执行器与文件提取协作方

pub mod acquisition_request;
pub mod executor;
pub mod extract;
pub mod filtered_search;
pub mod registry;
pub mod schema;
pub mod status_lookup;
pub mod study_plan;
pub mod topic_search;

pub use acquisition_request::AcquisitionRequestTool;
pub use executor::{ToolExecutor, ToolOutcome};
pub use extract::{ExtractError, PlainTextExtractor, TextExtractor};
pub use filtered_search::FilteredSearchTool;
pub use registry::{Tool, ToolRegistry};
pub use schema::{ToolArgs, ValidationRules};
pub use status_lookup::StatusLookupTool;
pub use study_plan::{StudyPlan, StudyPlanLimits, StudyPlanTool, StudyPlanner};
pub use topic_search::TopicSearchTool;
