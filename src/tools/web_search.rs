use serde_json::{json, Map, Value};

use super::{limit_arg, required_str_arg, ToolContext, ToolDefinition};
use crate::error::ToolError;

const SERPAPI_URL: &str = "https://serpapi.com/search.json";

pub(super) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "web_search",
        description: "Search the web for current information that is not in the catalog \
                      or the shop's documents.",
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "num": {
                    "type": "integer",
                    "description": "Number of results (default 5)"
                }
            },
            "required": ["query"]
        }),
    }
}

pub(super) async fn run(args: &Map<String, Value>, ctx: &ToolContext) -> Result<Value, ToolError> {
    let query = required_str_arg(args, "query")?;
    let num = limit_arg(args, "num", 5, 10);
    let Some(api_key) = ctx.serpapi_key.as_deref() else {
        return Err(ToolError::Execution("SERPAPI_KEY not configured".to_string()));
    };

    let num_text = num.to_string();
    let response = ctx
        .http
        .get(SERPAPI_URL)
        .query(&[
            ("engine", "google"),
            ("q", query),
            ("num", num_text.as_str()),
            ("api_key", api_key),
        ])
        .send()
        .await
        .map_err(|err| ToolError::Execution(format!("search request failed: {err}")))?;
    if !response.status().is_success() {
        let status = response.status();
        return Err(ToolError::Execution(format!("search returned {status}")));
    }
    let payload = response
        .json::<Value>()
        .await
        .map_err(|err| ToolError::Execution(format!("search parse failed: {err}")))?;

    Ok(json!({ "results": organic_results(&payload, num) }))
}

fn organic_results(payload: &Value, num: usize) -> Vec<Value> {
    payload
        .get("organic_results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .take(num)
                .map(|r| {
                    json!({
                        "title": r.get("title").and_then(Value::as_str).unwrap_or(""),
                        "link": r.get("link").and_then(Value::as_str).unwrap_or(""),
                        "snippet": r.get("snippet").and_then(Value::as_str).unwrap_or(""),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
