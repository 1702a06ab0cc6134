//! 副本状态查询：标识符形如 UUID 时按 id 查，否则按书名子串查第一条

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::catalog::CatalogStore;
use crate::core::{SessionContext, ToolError};
use crate::tools::schema::{parameters_schema, StatusLookupArgs, ToolArgs, STATUS_LOOKUP};
use crate::tools::Tool;

static UUID_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn looks_like_uuid(s: &str) -> bool {
    UUID_RE
        .get_or_init(|| Regex::new(r"(?i)^[0-9a-f-]{36}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(s))
}

pub struct StatusLookupTool {
    store: Arc<dyn CatalogStore>,
}

impl StatusLookupTool {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for StatusLookupTool {
    fn name(&self) -> &str {
        STATUS_LOOKUP
    }

    fn description(&self) -> &str {
        "Checks the status of all physical copies of a specific book. Use this when a user asks if a book is 'available', 'in stock', or when it is 'due'. Provide the book's title or its UUID. Returns the status (Available, Maintenance, Loaned, Reserved) and due date of every copy; present it clearly to the user."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<StatusLookupArgs>()
    }

    async fn execute(&self, args: ToolArgs, _ctx: &SessionContext) -> Result<String, ToolError> {
        let ToolArgs::StatusLookup(StatusLookupArgs { identifier }) = args else {
            return Err(ToolArgs::mismatch(STATUS_LOOKUP));
        };
        let identifier = identifier.trim();

        let book = if looks_like_uuid(identifier) {
            self.store
                .book_details(identifier)
                .await
                .map_err(|e| ToolError::external(STATUS_LOOKUP, e))?
                .map(|d| d.book)
        } else {
            self.store
                .find_book_by_title(identifier)
                .await
                .map_err(|e| ToolError::external(STATUS_LOOKUP, e))?
        };
        let Some(book) = book else {
            return Ok(format!("No book found matching identifier \"{identifier}\"."));
        };

        let instances = self
            .store
            .instances_for(&book.id)
            .await
            .map_err(|e| ToolError::external(STATUS_LOOKUP, e))?;
        if instances.is_empty() {
            return Ok(format!("No copies found for \"{}\".", book.title));
        }

        let lines: Vec<String> = instances
            .iter()
            .map(|i| {
                format!(
                    "ID: {}, Imprint: {}, Status: {}, Due date: {}",
                    i.id,
                    i.imprint,
                    i.status.as_str(),
                    i.due_date.as_deref().unwrap_or("N/A")
                )
            })
            .collect();
        Ok(format!(
            "Book: \"{}\" (id: {})\n\nCopies:\n{}",
            book.title,
            book.id,
            lines.join("\n")
        ))
    }
}
