use serde_json::{json, Map, Value};

use super::{limit_arg, required_str_arg, ToolContext, ToolDefinition};
use crate::error::ToolError;

pub(super) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "search_documents",
        description: "Search the shop's reference documents (policies, FAQs, manuals) \
                      and return matching excerpts.",
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Text to search for"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of documents to return (default 5)"
                }
            },
            "required": ["query"]
        }),
    }
}

pub(super) async fn run(args: &Map<String, Value>, ctx: &ToolContext) -> Result<Value, ToolError> {
    let query = required_str_arg(args, "query")?;
    let limit = limit_arg(args, "limit", 5, 20);

    let hits = ctx
        .documents
        .search(query, limit)
        .await
        .map_err(|err| ToolError::Execution(err.to_string()))?;

    Ok(json!({ "count": hits.len(), "results": hits }))
}
