//! 采购请求：记录用户对馆藏缺失图书的请求
//!
//! 书名 + 作者（不区分大小写）已存在时返回原请求状态，不重复写入。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::catalog::{CatalogStore, NewAcquisitionRequest, RequestOutcome};
use crate::core::{SessionContext, ToolError};
use crate::tools::schema::{
    parameters_schema, AcquisitionRequestArgs, ToolArgs, ACQUISITION_REQUEST, MAX_TITLE_CHARS,
};
use crate::tools::Tool;

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub struct AcquisitionRequestTool {
    store: Arc<dyn CatalogStore>,
}

impl AcquisitionRequestTool {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for AcquisitionRequestTool {
    fn name(&self) -> &str {
        ACQUISITION_REQUEST
    }

    fn description(&self) -> &str {
        "Records a user's request for a book that the library does not have. Only call this after the user explicitly agreed to the request. The user id is filled in automatically. After calling it, tell the user whether the request was recorded or already existed."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<AcquisitionRequestArgs>()
    }

    async fn execute(&self, args: ToolArgs, ctx: &SessionContext) -> Result<String, ToolError> {
        let ToolArgs::AcquisitionRequest(a) = args else {
            return Err(ToolArgs::mismatch(ACQUISITION_REQUEST));
        };
        if a.user_id != ctx.user_id {
            return Err(ToolError::validation(
                ACQUISITION_REQUEST,
                "the request must carry the current session's user id",
            ));
        }
        let title: String = a.title.trim().chars().take(MAX_TITLE_CHARS).collect();

        let outcome = self
            .store
            .record_request(NewAcquisitionRequest {
                title: title.clone(),
                author: non_blank(a.author),
                genre: non_blank(a.genre),
                notes: non_blank(a.notes),
                requested_by: a.user_id,
            })
            .await
            .map_err(|e| ToolError::external(ACQUISITION_REQUEST, e))?;

        Ok(match outcome {
            RequestOutcome::Created(req) => {
                tracing::info!(request_id = %req.id, title = %req.title, "acquisition request recorded");
                format!(
                    "Your request for \"{}\" has been recorded (status: {}). Thank you!",
                    req.title,
                    req.status.as_str()
                )
            }
            RequestOutcome::Existing(req) => format!(
                "A request for \"{}\" already exists (status: {}, requested at {}). No new request was created.",
                req.title,
                req.status.as_str(),
                req.created_at
            ),
        })
    }
}
